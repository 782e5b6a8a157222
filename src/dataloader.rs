//! Data loader

use rand::seq::SliceRandom;
use rand_pcg::Pcg64Mcg;
use thiserror::Error;

use crate::{datasets::ToyDataset, tensor::Tensor};

/// Errors for the dataloader
#[derive(Debug, Error, PartialEq)]
pub enum DataLoaderError {
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,
}

/// A group of samples processed together, features are `[batch_size, n_features]`
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub features: Tensor,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Data loader, returns batches of data and labels optionally shuffled
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
///
/// Shuffling draws from the loader's own generator, so two loaders built from
/// generators with the same seed produce the same batch order.
pub struct DataLoader {
    dataset: ToyDataset,
    batch_size: usize,
    drop_last: bool,
    // `None` iterates in dataset order
    rng: Option<Pcg64Mcg>,
}

impl DataLoader {
    pub fn new(dataset: ToyDataset, batch_size: usize) -> Result<Self, DataLoaderError> {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        Ok(Self {
            dataset,
            batch_size,
            drop_last: false,
            rng: None,
        })
    }

    /// Reshuffle the sample order at the start of every pass using `rng`
    pub fn shuffle(mut self, rng: Pcg64Mcg) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Discard the final batch of a pass when it would be smaller than the batch size
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn dataset(&self) -> &ToyDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches in one pass
    pub fn len(&self) -> usize {
        if self.drop_last {
            self.dataset.len() / self.batch_size
        } else {
            self.dataset.len().div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new pass over the dataset
    pub fn iter(&mut self) -> DataLoaderIterator<'_> {
        let mut indices = (0..self.dataset.len()).collect::<Vec<_>>();
        if let Some(rng) = self.rng.as_mut() {
            indices.shuffle(rng);
            log::debug!("shuffled sample order: {:?}", indices);
        }
        DataLoaderIterator {
            dataset: &self.dataset,
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            indices,
            curr_iter: 0,
        }
    }
}

/// An iterator which returns mini batches of data and labels until the end of the dataset
pub struct DataLoaderIterator<'a> {
    dataset: &'a ToyDataset,
    batch_size: usize,
    drop_last: bool,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl Iterator for DataLoaderIterator<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.indices.len().saturating_sub(self.curr_iter);
        if remaining == 0 || (self.drop_last && remaining < self.batch_size) {
            return None;
        }
        let end = self.curr_iter + remaining.min(self.batch_size);
        let batch_indices = &self.indices[self.curr_iter..end];
        self.curr_iter = end;

        let n_features = self.dataset.num_features();
        let mut features = Vec::with_capacity(batch_indices.len() * n_features);
        let mut labels = Vec::with_capacity(batch_indices.len());
        for &i in batch_indices {
            let (row, label) = self
                .dataset
                .get(i)
                .expect("indices are a permutation of 0..len");
            features.extend_from_slice(row);
            labels.push(label);
        }
        let features = Tensor::new(features, vec![labels.len(), n_features])
            .expect("every row has n_features values");
        Some(Batch { features, labels })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn dataset(n: usize) -> ToyDataset {
        let rows = (0..n).map(|i| [i as f32, -(i as f32)]).collect::<Vec<_>>();
        ToyDataset::new(Tensor::from_rows(&rows).unwrap(), (0..n).map(|i| i % 2).collect()).unwrap()
    }

    #[test]
    fn test_dataloader() {
        let mut dataloader = DataLoader::new(dataset(2), 2).unwrap();
        let mut iter = dataloader.iter();
        assert_eq!(
            iter.next(),
            Some(Batch {
                features: Tensor::from_rows(&[[0.0, 0.0], [1.0, -1.0]]).unwrap(),
                labels: vec![0, 1],
            })
        );
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_partial_last_batch() {
        let mut dataloader = DataLoader::new(dataset(5), 2).unwrap();
        assert_eq!(dataloader.len(), 3);
        let sizes = dataloader.iter().map(|b| b.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);

        let mut dataloader = DataLoader::new(dataset(5), 2).unwrap().drop_last(true);
        assert_eq!(dataloader.len(), 2);
        let sizes = dataloader.iter().map(|b| b.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2]);
    }

    #[test]
    fn test_batch_counts() {
        for n in 0..12 {
            for batch_size in 1..6 {
                let mut keep = DataLoader::new(dataset(n), batch_size).unwrap();
                assert_eq!(keep.iter().count(), n.div_ceil(batch_size));
                assert_eq!(keep.len(), n.div_ceil(batch_size));

                let mut drop = DataLoader::new(dataset(n), batch_size)
                    .unwrap()
                    .drop_last(true);
                assert_eq!(drop.iter().count(), n / batch_size);
                assert!(drop.iter().all(|b| b.len() == batch_size));
            }
        }
    }

    #[test]
    fn test_dataloader_shuffle() {
        let seed = 42;
        let rng = || Pcg64Mcg::seed_from_u64(seed);
        let mut a = DataLoader::new(dataset(6), 2).unwrap().shuffle(rng());
        let mut b = DataLoader::new(dataset(6), 2).unwrap().shuffle(rng());

        let first_a = a.iter().collect::<Vec<_>>();
        let first_b = b.iter().collect::<Vec<_>>();
        assert_eq!(first_a, first_b);

        // every sample is seen exactly once per pass
        let mut labels_seen = first_a
            .iter()
            .flat_map(|batch| batch.features.rows().unwrap().map(|r| r[0] as usize))
            .collect::<Vec<_>>();
        labels_seen.sort();
        assert_eq!(labels_seen, (0..6).collect::<Vec<_>>());

        // subsequent passes stay in lockstep
        assert_eq!(a.iter().collect::<Vec<_>>(), b.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_reshuffles_every_pass() {
        let mut dataloader = DataLoader::new(dataset(6), 2)
            .unwrap()
            .shuffle(Pcg64Mcg::seed_from_u64(1));

        let orders = (0..6)
            .map(|_| {
                dataloader
                    .iter()
                    .flat_map(|batch| {
                        batch
                            .features
                            .rows()
                            .unwrap()
                            .map(|r| r[0] as usize)
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        for order in &orders {
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(sorted, (0..6).collect::<Vec<_>>());
        }
        assert!(
            orders.windows(2).any(|w| w[0] != w[1]),
            "every pass came out as {:?}",
            orders[0]
        );
    }

    #[test]
    fn test_dataloader_errors() {
        assert_eq!(
            DataLoader::new(dataset(2), 0).err(),
            Some(DataLoaderError::ZeroBatchSize)
        );
    }
}
