//! Evaluation metrics

use thiserror::Error;

use crate::{
    dataloader::DataLoader,
    nn::{Module, NNError},
    tensor::TensorError,
};

#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("Accuracy is undefined for a loader without examples")]
    EmptyLoader,
    #[error(transparent)]
    Model(#[from] NNError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Number of positions where the prediction equals the label
pub fn count_correct(predictions: &[usize], labels: &[usize]) -> usize {
    predictions
        .iter()
        .zip(labels.iter())
        .filter(|(p, l)| p == l)
        .count()
}

/// Fraction of examples in one pass of `loader` whose highest scoring class is the label.
/// Leaves the model in eval mode.
pub fn compute_accuracy<M>(model: &mut M, loader: &mut DataLoader) -> Result<f32, MetricsError>
where
    M: Module + ?Sized,
{
    model.eval();
    let mut correct = 0;
    let mut total = 0;

    for batch in loader.iter() {
        let predictions = model.predict(&batch.features)?.argmax_rows()?;
        correct += count_correct(&predictions, &batch.labels);
        total += batch.len();
    }

    if total == 0 {
        return Err(MetricsError::EmptyLoader);
    }
    log::debug!("{} of {} examples correct", correct, total);
    Ok(correct as f32 / total as f32)
}
