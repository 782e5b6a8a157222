//! Dense row-major `f32` tensors tagged with the device they live on
//!
//! Tensors hold plain data (features, batches, detached logits, parameters for saving).
//! Anything that needs gradients goes through [`crate::values::Value`] instead.

use std::{
    cmp::Ordering,
    fmt::{self, Display},
};

use thiserror::Error;

/// Errors for tensor construction and arithmetic
#[derive(Debug, Error, PartialEq)]
pub enum TensorError {
    #[error("Shape {shape:?} needs {expected} elements, got {got}")]
    DataLength {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },
    #[error("Shape mismatch: {lhs:?} vs {rhs:?}")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },
    #[error("Tensors live on different devices: {lhs} and {rhs}")]
    DeviceMismatch { lhs: Device, rhs: Device },
    #[error("Device {0} is not available")]
    DeviceUnavailable(Device),
    #[error("Expected a rank {expected} tensor, got shape {shape:?}")]
    Rank { expected: usize, shape: Vec<usize> },
    #[error("Rows must all have the same length, got lengths {0:?}")]
    RaggedRows(Vec<usize>),
}

/// Where the data of a tensor lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Accelerator,
}

impl Device {
    pub fn is_available(&self) -> bool {
        match self {
            Device::Cpu => true,
            Device::Accelerator => accelerator_available(),
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Whether an accelerator backend is compiled in. There is none, so all work runs on the CPU.
pub fn accelerator_available() -> bool {
    false
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    device: Device,
}

impl Tensor {
    /// Creates a CPU tensor, `data` is row-major and must fill `shape` exactly
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self, TensorError> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(TensorError::DataLength {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            shape,
            device: Device::Cpu,
        })
    }

    /// 1-D tensor
    pub fn from_vec(data: Vec<f32>) -> Self {
        let shape = vec![data.len()];
        Self {
            data,
            shape,
            device: Device::Cpu,
        }
    }

    /// 2-D tensor from equally sized rows
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, TensorError> {
        let n_cols = rows.first().map_or(0, |r| r.as_ref().len());
        if rows.iter().any(|r| r.as_ref().len() != n_cols) {
            return Err(TensorError::RaggedRows(
                rows.iter().map(|r| r.as_ref().len()).collect(),
            ));
        }
        let data = rows.iter().flat_map(|r| r.as_ref().iter().copied()).collect();
        Tensor::new(data, vec![rows.len(), n_cols])
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `(rows, cols)` of a matrix
    pub fn dims2(&self) -> Result<(usize, usize), TensorError> {
        match self.shape.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            _ => Err(TensorError::Rank {
                expected: 2,
                shape: self.shape.clone(),
            }),
        }
    }

    /// Iterates the rows of a matrix
    pub fn rows(&self) -> Result<impl Iterator<Item = &[f32]>, TensorError> {
        let (rows, cols) = self.dims2()?;
        Ok((0..rows).map(move |r| &self.data[r * cols..(r + 1) * cols]))
    }

    /// Copies the tensor to `device`, the original is left untouched
    pub fn to(&self, device: Device) -> Result<Tensor, TensorError> {
        if !device.is_available() {
            return Err(TensorError::DeviceUnavailable(device));
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            device,
        })
    }

    /// Element-wise addition of two tensors of the same shape on the same device
    pub fn add(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        if self.device != other.device {
            return Err(TensorError::DeviceMismatch {
                lhs: self.device,
                rhs: other.device,
            });
        }
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                lhs: self.shape.clone(),
                rhs: other.shape.clone(),
            });
        }
        Ok(Tensor {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a + b)
                .collect(),
            shape: self.shape.clone(),
            device: self.device,
        })
    }

    /// Row-wise softmax of a matrix, the row max is subtracted before exponentiating
    pub fn softmax_rows(&self) -> Result<Tensor, TensorError> {
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.rows()? {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps = row.iter().map(|v| (v - max).exp()).collect::<Vec<_>>();
            let sum = exps.iter().sum::<f32>();
            data.extend(exps.into_iter().map(|e| e / sum));
        }
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
            device: self.device,
        })
    }

    /// Index of the largest entry of every row, the first one wins on ties
    pub fn argmax_rows(&self) -> Result<Vec<usize>, TensorError> {
        Ok(self.rows()?.map(argmax).collect())
    }
}

/// Index of the largest value, the first one wins on ties. NaNs compare as equal.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if v.partial_cmp(&b).unwrap_or(Ordering::Equal) != Ordering::Greater => {
                best
            }
            _ => Some((i, v)),
        })
        .map_or(0, |(i, _)| i)
}

// prints nested rows in the style of `tensor([[1.0000, 2.0000], ...])`
impl Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_row(row: &[f32], f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "[")?;
            for (i, v) in row.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:.4}", v)?;
            }
            write!(f, "]")
        }

        write!(f, "tensor(")?;
        match self.rows() {
            Ok(rows) => {
                write!(f, "[")?;
                for (i, row) in rows.enumerate() {
                    if i > 0 {
                        write!(f, ",\n        ")?;
                    }
                    fmt_row(row, f)?;
                }
                write!(f, "]")?;
            }
            Err(_) => fmt_row(&self.data, f)?,
        }
        if self.device != Device::Cpu {
            write!(f, ", device='{}'", self.device)?;
        }
        write!(f, ")")
    }
}
