//! Datasets of labelled feature rows, the toy point sets and plotting utilities
//!
//! By convention class 0 is plotted in red and class 1 is plotted in blue.

use std::error::Error;

use plotters::{
    chart::ChartBuilder,
    prelude::{BitMapBackend, Circle, IntoDrawingArea, Rectangle},
    style::{BLUE, Color, RED, RGBColor, WHITE},
};
use thiserror::Error;

use crate::{
    nn::Module,
    tensor::{Tensor, TensorError},
};

/// Errors for datasets
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("Labels must have the same length as the data")]
    LengthMismatch { label_len: usize, data_len: usize },
    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Features must be a [samples, features] matrix")]
    NotAMatrix(#[from] TensorError),
}

/// A fixed feature matrix paired with one class label per row
/// Takes inspiration from the PyTorch TensorDataset
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.TensorDataset>
#[derive(Debug, Clone, PartialEq)]
pub struct ToyDataset {
    features: Tensor,
    labels: Vec<usize>,
}

impl ToyDataset {
    pub fn new(features: Tensor, labels: Vec<usize>) -> Result<Self, DatasetError> {
        let (data_len, _) = features.dims2()?;
        if data_len != labels.len() {
            return Err(DatasetError::LengthMismatch {
                label_len: labels.len(),
                data_len,
            });
        }
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Width of a feature row
    pub fn num_features(&self) -> usize {
        self.features.shape()[1]
    }

    /// One more than the largest label, 0 for an empty dataset
    pub fn num_classes(&self) -> usize {
        self.labels.iter().max().map_or(0, |m| m + 1)
    }

    pub fn features(&self) -> &Tensor {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Returns the feature row and label at `index`
    pub fn get(&self, index: usize) -> Result<(&[f32], usize), DatasetError> {
        if index >= self.len() {
            return Err(DatasetError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let n_features = self.num_features();
        let row = &self.features.data()[index * n_features..(index + 1) * n_features];
        Ok((row, self.labels[index]))
    }
}

/// Five 2-D points, three of class 0 in the upper left and two of class 1 in the lower right
pub fn toy_train_set() -> ToyDataset {
    let features = Tensor::new(
        vec![-1.2, 3.1, -0.9, 2.9, -0.5, 2.6, 2.3, -1.1, 2.7, -1.5],
        vec![5, 2],
    )
    .expect("literal shape is consistent");
    ToyDataset::new(features, vec![0, 0, 0, 1, 1]).expect("literal labels match rows")
}

/// One held out point per class
pub fn toy_test_set() -> ToyDataset {
    let features =
        Tensor::new(vec![-0.8, 2.8, 2.6, -1.6], vec![2, 2]).expect("literal shape is consistent");
    ToyDataset::new(features, vec![0, 1]).expect("literal labels match rows")
}

const GRID_MIN: f32 = -4.0;
const GRID_MAX: f32 = 4.0;

/// Plots the points of a 2-D dataset coloured by class
pub fn plot_data(dataset: &ToyDataset, file_name: &str, title: &str) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(format!("Dataset: {}", title), ("sans-serif", 40))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(GRID_MIN..GRID_MAX, GRID_MIN..GRID_MAX)?;

    chart.configure_mesh().draw()?;
    chart.draw_series(points(dataset)?)?;

    root_area.present()?;
    log::info!("Data plot has been saved to '{}'.", file_name);

    Ok(())
}

/// Plots the decision boundary for a given model on a given dataset by sampling a grid of points and evaluating the model
pub fn plot_decision_boundary(
    model: &dyn Module,
    dataset: &ToyDataset,
    file_name: &str,
    title: &str,
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(format!("Decision Boundary for {}", title), ("sans-serif", 40))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(GRID_MIN..GRID_MAX, GRID_MIN..GRID_MAX)?;

    chart.configure_mesh().draw()?;

    let red_bg = RGBColor(255, 200, 200);
    let blue_bg = RGBColor(200, 200, 255);

    let step = 0.10;
    let n_steps = ((GRID_MAX - GRID_MIN) / step).round() as usize;
    let grid_points = (0..n_steps)
        .flat_map(|xi| {
            let x = GRID_MIN + xi as f32 * step;
            (0..n_steps).map(move |yi| [x, GRID_MIN + yi as f32 * step])
        })
        .collect::<Vec<_>>();

    // evaluate the whole grid as one batch
    let grid = Tensor::from_rows(&grid_points)?;
    let predictions = model.predict(&grid)?.argmax_rows()?;

    chart.draw_series(grid_points.iter().zip(predictions).map(|(&[x, y], pred)| {
        let color = if pred == 0 { red_bg } else { blue_bg };
        Rectangle::new(
            [
                (x - step / 2.0, y - step / 2.0),
                (x + step / 2.0, y + step / 2.0),
            ],
            color.filled(),
        )
    }))?;

    chart.draw_series(points(dataset)?)?;

    root_area.present()?;
    log::info!("Decision boundary plot saved to '{}'.", file_name);
    Ok(())
}

fn points(dataset: &ToyDataset) -> Result<Vec<Circle<(f32, f32), i32>>, DatasetError> {
    (0..dataset.len())
        .map(|i| {
            let (row, label) = dataset.get(i)?;
            let color = if label == 0 { RED } else { BLUE };
            Ok(Circle::new((row[0], row[1]), 4, color.filled()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toy_sets() {
        let train = toy_train_set();
        assert_eq!(train.len(), 5);
        assert_eq!(train.num_features(), 2);
        assert_eq!(train.num_classes(), 2);
        assert_eq!(train.get(3).unwrap(), (&[2.3, -1.1][..], 1));

        let test = toy_test_set();
        assert_eq!(test.len(), 2);
        assert_eq!(test.get(0).unwrap(), (&[-0.8, 2.8][..], 0));
    }

    #[test]
    fn test_get_out_of_range() {
        let train = toy_train_set();
        assert_eq!(
            train.get(5),
            Err(DatasetError::IndexOutOfRange { index: 5, len: 5 })
        );
    }

    #[test]
    fn test_length_mismatch() {
        let features = Tensor::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let dataset = ToyDataset::new(features, vec![0, 1, 0]);
        assert_eq!(
            dataset,
            Err(DatasetError::LengthMismatch {
                label_len: 3,
                data_len: 2
            })
        );
    }

    #[test]
    fn test_features_must_be_matrix() {
        let dataset = ToyDataset::new(Tensor::from_vec(vec![1.0, 2.0]), vec![0, 1]);
        assert!(matches!(dataset, Err(DatasetError::NotAMatrix(_))));
    }
}
