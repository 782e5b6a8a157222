//! A small feed-forward classifier built on a scalar autograd engine,
//! with a PyTorch-like dataset/dataloader/module/optimizer API.

pub mod backprop_fns;
pub mod checkpoint;
pub mod dataloader;
pub mod datasets;
pub mod loss;
pub mod metrics;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod train;
pub mod values;
