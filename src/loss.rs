//! Loss function(s)

use thiserror::Error;

use crate::values::Value;

/// Errors for loss computation
#[derive(Debug, Error, PartialEq)]
pub enum LossError {
    #[error("Cannot compute a loss over an empty batch")]
    EmptyBatch,
    #[error("Got {n_logits} rows of logits but {n_labels} labels")]
    BatchSizeMismatch { n_logits: usize, n_labels: usize },
    #[error("Label {label} out of range for {n_classes} classes")]
    LabelOutOfRange { label: usize, n_classes: usize },
}

/// Mean cross-entropy between unnormalized class scores and integer class labels,
/// equivalent to `torch.nn.functional.cross_entropy`
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// `logits` holds one row of class scores per sample, `labels` the true class per sample
    pub fn call<T>(logits: &[T], labels: &[usize]) -> Result<Value, LossError>
    where
        T: AsRef<[Value]>,
    {
        if logits.is_empty() {
            return Err(LossError::EmptyBatch);
        }
        if logits.len() != labels.len() {
            return Err(LossError::BatchSizeMismatch {
                n_logits: logits.len(),
                n_labels: labels.len(),
            });
        }
        let loss = logits
            .iter()
            .zip(labels.iter())
            .map(|(row, &label)| Self::sample_loss(row.as_ref(), label))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .sum::<Value>();
        Ok(loss / Value::new(logits.len() as f32))
    }

    /// `-log softmax(row)[label] = logsumexp(row) - row[label]`
    fn sample_loss(row: &[Value], label: usize) -> Result<Value, LossError> {
        let target = row.get(label).ok_or(LossError::LabelOutOfRange {
            label,
            n_classes: row.len(),
        })?;
        // shifting by the row max keeps exp from overflowing. The shift is a constant
        // and cancels out of the gradient
        let max = Value::new(
            row.iter()
                .map(Value::data)
                .fold(f32::NEG_INFINITY, f32::max),
        );
        let sum_exp = row.iter().map(|v| (v - &max).exp()).sum::<Value>();
        let log_sum_exp = &max + &sum_exp.ln();
        Ok(&log_sum_exp - target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    fn values(data: &[f32]) -> Vec<Value> {
        data.iter().map(|&v| Value::new(v)).collect()
    }

    #[test]
    fn test_cross_entropy_loss() {
        let logits = vec![values(&[1.0, 2.0]), values(&[0.5, -0.5])];
        let loss = CrossEntropyLoss::call(&logits, &[1, 0]).unwrap();

        // -ln(softmax([1, 2])[1]) = ln(1 + e^-1)
        // -ln(softmax([0.5, -0.5])[0]) = ln(1 + e^-1)
        let expected = (1.0 + (-1.0f32).exp()).ln();
        assert_eq_float!(loss.data(), expected, 1e-5);

        loss.backward();
        // dloss / dz_i = (softmax(z)_i - onehot_i) / N
        let p = 1.0 / (1.0 + 1.0f32.exp());
        assert_eq_float!(logits[0][0].grad(), p / 2.0, 1e-5);
        assert_eq_float!(logits[0][1].grad(), -p / 2.0, 1e-5);
        assert_eq_float!(logits[1][0].grad(), -p / 2.0, 1e-5);
        assert_eq_float!(logits[1][1].grad(), p / 2.0, 1e-5);
    }

    #[test]
    fn test_large_logits_are_stable() {
        let logits = vec![values(&[1000.0, 0.0]), values(&[-1000.0, 1000.0])];
        let loss = CrossEntropyLoss::call(&logits, &[0, 0]).unwrap();
        assert!(loss.data().is_finite());
        // first row is ~0, second row is ~2000
        assert_eq_float!(loss.data(), 1000.0, 1e-2);

        loss.backward();
        assert!(logits.iter().flatten().all(|v| v.grad().is_finite()));
    }

    #[test]
    fn test_zero_for_confident_correct_prediction() {
        let logits = vec![values(&[100.0, 0.0, 0.0])];
        let loss = CrossEntropyLoss::call(&logits, &[0]).unwrap();
        assert_eq_float!(loss.data(), 0.0);
    }

    #[test]
    fn test_monotonic_in_true_class_probability() {
        // lowering the true class score lowers its probability
        let losses = [3.0, 1.0, 0.0, -1.0, -3.0]
            .iter()
            .map(|&score| {
                let logits = vec![values(&[score, 0.0])];
                CrossEntropyLoss::call(&logits, &[0]).unwrap().data()
            })
            .collect::<Vec<_>>();
        assert!(losses.windows(2).all(|w| w[0] < w[1]), "{:?}", losses);
    }

    #[test]
    fn test_permutation_invariant() {
        let rows = [[0.3, -1.2, 2.0], [1.5, 0.1, -0.4], [-0.7, 0.9, 0.2]];
        let labels = [2, 0, 1];
        let logits = rows.iter().map(|r| values(r)).collect::<Vec<_>>();
        let loss = CrossEntropyLoss::call(&logits, &labels).unwrap();

        let order = [2, 0, 1];
        let permuted = order.iter().map(|&i| values(&rows[i])).collect::<Vec<_>>();
        let permuted_labels = order.iter().map(|&i| labels[i]).collect::<Vec<_>>();
        let permuted_loss = CrossEntropyLoss::call(&permuted, &permuted_labels).unwrap();

        assert_eq_float!(loss.data(), permuted_loss.data(), 1e-5);
    }

    #[test]
    fn test_errors() {
        let empty: Vec<Vec<Value>> = vec![];
        assert_eq!(
            CrossEntropyLoss::call(&empty, &[]).unwrap_err(),
            LossError::EmptyBatch
        );

        let logits = vec![values(&[1.0, 2.0])];
        assert_eq!(
            CrossEntropyLoss::call(&logits, &[0, 1]).unwrap_err(),
            LossError::BatchSizeMismatch {
                n_logits: 1,
                n_labels: 2
            }
        );
        assert_eq!(
            CrossEntropyLoss::call(&logits, &[2]).unwrap_err(),
            LossError::LabelOutOfRange {
                label: 2,
                n_classes: 2
            }
        );
    }
}
