//! Training loop

use thiserror::Error;

use crate::{
    dataloader::{Batch, DataLoader},
    loss::{CrossEntropyLoss, LossError},
    nn::{Module, NNError},
    optim::Optim,
};

/// Errors that abort a training run
#[derive(Debug, Error, PartialEq)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] NNError),
    #[error(transparent)]
    Loss(#[from] LossError),
    #[error("Loss became {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f32 },
}

/// Hyperparameters of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    pub momentum: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            learning_rate: 0.5,
            momentum: 0.0,
        }
    }
}

/// Where a [`Trainer`] is in its run. Epoch and batch indices are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainState {
    EpochStart { epoch: usize },
    BatchIterate { epoch: usize, batch: usize },
    EpochEnd { epoch: usize },
    Done,
}

/// Losses of every batch of one epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub batch_losses: Vec<f32>,
}

impl EpochReport {
    pub fn mean_loss(&self) -> Option<f32> {
        if self.batch_losses.is_empty() {
            return None;
        }
        Some(self.batch_losses.iter().sum::<f32>() / self.batch_losses.len() as f32)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub epochs: Vec<EpochReport>,
}

impl TrainReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epochs
            .iter()
            .rev()
            .find_map(|e| e.batch_losses.last().copied())
    }
}

/// Runs minibatch gradient descent for a fixed number of epochs
pub struct Trainer {
    config: TrainConfig,
    state: TrainState,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Self {
        Self {
            config,
            state: TrainState::EpochStart { epoch: 0 },
        }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    /// Trains `model` on every batch of `loader`, `config.epochs` times. The model is in
    /// train mode during an epoch and in eval mode once the epoch is over.
    ///
    /// Any error halts the run immediately, the parameters keep the updates made so far.
    pub fn fit<M, O>(
        &mut self,
        model: &mut M,
        optim: &mut O,
        loader: &mut DataLoader,
    ) -> Result<TrainReport, TrainError>
    where
        M: Module + ?Sized,
        O: Optim + ?Sized,
    {
        let epochs = self.config.epochs;
        let n_batches = loader.len();
        let mut report = TrainReport::default();

        for epoch in 0..epochs {
            self.state = TrainState::EpochStart { epoch };
            model.train();
            let mut batch_losses = Vec::with_capacity(n_batches);

            for (batch_idx, batch) in loader.iter().enumerate() {
                self.state = TrainState::BatchIterate {
                    epoch,
                    batch: batch_idx,
                };
                let loss = Self::step(model, optim, &batch)?;
                if !loss.is_finite() {
                    return Err(TrainError::NonFiniteLoss {
                        epoch,
                        batch: batch_idx,
                        loss,
                    });
                }
                log::info!(
                    "Epoch: {:03}/{:03} | Batch {:03}/{:03} | Train Loss: {:.2}",
                    epoch + 1,
                    epochs,
                    batch_idx,
                    n_batches,
                    loss
                );
                batch_losses.push(loss);
            }

            self.state = TrainState::EpochEnd { epoch };
            model.eval();
            let epoch_report = EpochReport {
                epoch,
                batch_losses,
            };
            if let Some(mean) = epoch_report.mean_loss() {
                log::debug!("epoch: {}, mean loss: {}", epoch + 1, mean);
            }
            report.epochs.push(epoch_report);
        }

        self.state = TrainState::Done;
        Ok(report)
    }

    /// One parameter update on one batch, returns the loss before the update
    fn step<M, O>(model: &mut M, optim: &mut O, batch: &Batch) -> Result<f32, TrainError>
    where
        M: Module + ?Sized,
        O: Optim + ?Sized,
    {
        let logits = model.forward(&batch.features)?;
        let loss = CrossEntropyLoss::call(&logits, &batch.labels)?;

        optim.zero_grad();
        loss.backward();
        optim.step();

        // the graph of this batch (every intermediate node) is freed here
        Ok(loss.data())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::{
        datasets::{ToyDataset, toy_train_set},
        metrics::compute_accuracy,
        nn::{Classifier, Mode, StateDict},
        optim::SGD,
        tensor::Tensor,
    };

    fn run(seed: u64, config: TrainConfig) -> (TrainReport, StateDict, Classifier) {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let mut loader = DataLoader::new(toy_train_set(), 2)
            .unwrap()
            .shuffle(Pcg64Mcg::from_rng(&mut rng))
            .drop_last(true);
        let mut model = Classifier::new(2, 2, &mut rng).unwrap();
        let mut optim = SGD::new(model.parameters(), config.learning_rate);
        let mut trainer = Trainer::new(config);
        assert_eq!(trainer.state(), TrainState::EpochStart { epoch: 0 });

        let report = trainer.fit(&mut model, &mut optim, &mut loader).unwrap();
        assert_eq!(trainer.state(), TrainState::Done);
        (report, model.state_dict(), model)
    }

    #[test]
    fn test_report_shape() {
        let (report, _, model) = run(123, TrainConfig::default());
        assert_eq!(report.epochs.len(), 3);
        // 5 samples, batch size 2, last partial batch dropped
        assert!(report.epochs.iter().all(|e| e.batch_losses.len() == 2));
        assert!(
            report
                .epochs
                .iter()
                .flat_map(|e| &e.batch_losses)
                .all(|l| l.is_finite() && *l >= 0.0)
        );
        assert_eq!(model.mode(), Mode::Eval);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let (report_a, params_a, _) = run(123, TrainConfig::default());
        let (report_b, params_b, _) = run(123, TrainConfig::default());
        assert_eq!(report_a, report_b);
        assert_eq!(params_a, params_b);

        let (_, params_c, _) = run(7, TrainConfig::default());
        assert_ne!(params_a, params_c);
    }

    #[test]
    fn test_updates_parameters() {
        let (_, trained, _) = run(123, TrainConfig::default());
        let (_, untouched, _) = run(
            123,
            TrainConfig {
                epochs: 0,
                ..TrainConfig::default()
            },
        );
        assert_ne!(untouched, trained);
    }

    #[test]
    fn test_separates_toy_data() {
        let config = TrainConfig {
            epochs: 30,
            ..TrainConfig::default()
        };
        let (report, _, mut model) = run(123, config);
        let first = report.epochs[0].mean_loss().unwrap();
        let last = report.epochs[29].mean_loss().unwrap();
        assert!(last < first, "loss went from {} to {}", first, last);

        let mut loader = DataLoader::new(toy_train_set(), 2).unwrap();
        assert_eq!(compute_accuracy(&mut model, &mut loader).unwrap(), 1.0);
    }

    #[test]
    fn test_bad_labels_halt_training() {
        let features = Tensor::from_rows(&[[0.0, 1.0], [1.0, 0.0]]).unwrap();
        let dataset = ToyDataset::new(features, vec![0, 5]).unwrap();
        let mut loader = DataLoader::new(dataset, 2).unwrap();
        let mut model = Classifier::new(2, 2, &mut Pcg64Mcg::seed_from_u64(0)).unwrap();
        let mut optim = SGD::new(model.parameters(), 0.5);
        let mut trainer = Trainer::new(TrainConfig::default());

        let err = trainer
            .fit(&mut model, &mut optim, &mut loader)
            .unwrap_err();
        assert_eq!(
            err,
            TrainError::Loss(LossError::LabelOutOfRange {
                label: 5,
                n_classes: 2
            })
        );
        assert_eq!(
            trainer.state(),
            TrainState::BatchIterate { epoch: 0, batch: 0 }
        );
    }
}
