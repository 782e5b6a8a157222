//! Saving and restoring model parameters
//!
//! A [`StateDict`] is written in the safetensors layout: a JSON header naming every
//! tensor with its dtype and shape, followed by the raw little-endian `f32` data.
//! Only parameters are stored, no optimizer state and no architecture.

use std::{fs, path::Path};

use safetensors::{Dtype, SafeTensorError, SafeTensors, tensor::TensorView};
use thiserror::Error;

use crate::{
    nn::StateDict,
    tensor::{Tensor, TensorError},
};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to access checkpoint file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed checkpoint: {0}")]
    Format(#[from] SafeTensorError),
    #[error("Tensor '{name}' has dtype {dtype:?}, only F32 is supported")]
    UnsupportedDtype { name: String, dtype: Dtype },
    #[error("Tensor '{name}' is inconsistent with its shape: {source}")]
    Shape { name: String, source: TensorError },
}

/// Serializes every named tensor to a byte blob
pub fn save_to_bytes(state: &StateDict) -> Result<Vec<u8>, CheckpointError> {
    let bytes = state
        .iter()
        .map(|(name, tensor)| {
            let data = tensor
                .data()
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>();
            (name.as_str(), tensor.shape().to_vec(), data)
        })
        .collect::<Vec<_>>();
    let views = bytes
        .iter()
        .map(|(name, shape, data)| {
            TensorView::new(Dtype::F32, shape.clone(), data).map(|view| (*name, view))
        })
        .collect::<Result<Vec<_>, SafeTensorError>>()?;
    let views = views.iter().map(|(name, view)| (*name, view));

    Ok(safetensors::serialize(views, &None)?)
}

/// Parses a byte blob written by [`save_to_bytes`]
pub fn load_from_bytes(buffer: &[u8]) -> Result<StateDict, CheckpointError> {
    let tensors = SafeTensors::deserialize(buffer)?;
    tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            if view.dtype() != Dtype::F32 {
                return Err(CheckpointError::UnsupportedDtype {
                    name,
                    dtype: view.dtype(),
                });
            }
            // the view may not be aligned for f32, decode byte by byte
            let data = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            match Tensor::new(data, view.shape().to_vec()) {
                Ok(tensor) => Ok((name, tensor)),
                Err(source) => Err(CheckpointError::Shape { name, source }),
            }
        })
        .collect()
}

/// Writes the state dict to `path`, replacing any existing file
pub fn save_to_file<P: AsRef<Path>>(path: P, state: &StateDict) -> Result<(), CheckpointError> {
    let bytes = save_to_bytes(state)?;
    fs::write(path.as_ref(), bytes)?;
    log::debug!(
        "saved {} tensors to '{}'",
        state.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<StateDict, CheckpointError> {
    let buffer = fs::read(path.as_ref())?;
    load_from_bytes(&buffer)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::{
        datasets::toy_train_set,
        nn::{Classifier, Module, NNError},
    };

    fn model(seed: u64) -> Classifier {
        Classifier::new(2, 2, &mut Pcg64Mcg::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn test_bytes_roundtrip_restores_predictions() {
        let source = model(1);
        let bytes = save_to_bytes(&source.state_dict()).unwrap();

        let mut restored = model(2);
        restored.load_state_dict(&load_from_bytes(&bytes).unwrap()).unwrap();

        let features = toy_train_set().features().clone();
        assert_eq!(
            source.predict(&features).unwrap(),
            restored.predict(&features).unwrap()
        );
        assert_eq!(source.state_dict(), restored.state_dict());
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "toy-classifier-checkpoint-{}.safetensors",
            std::process::id()
        ));
        let state = model(3).state_dict();
        save_to_file(&path, &state).unwrap();
        let loaded = load_from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_missing_file() {
        let err = load_from_file("/nonexistent/dir/model.safetensors").unwrap_err();
        assert!(matches!(err, CheckpointError::Io(_)));
    }

    #[test]
    fn test_garbage_bytes() {
        let err = load_from_bytes(b"not a checkpoint").unwrap_err();
        assert!(matches!(err, CheckpointError::Format(_)));
    }

    #[test]
    fn test_architecture_mismatch_fails_on_load() {
        let wider = Classifier::new(3, 2, &mut Pcg64Mcg::seed_from_u64(0)).unwrap();
        let bytes = save_to_bytes(&wider.state_dict()).unwrap();
        let state = load_from_bytes(&bytes).unwrap();

        let mut target = model(0);
        assert!(matches!(
            target.load_state_dict(&state),
            Err(NNError::ShapeMismatch { name, expected, got })
                if name == "layers.0.weight" && expected == vec![30, 2] && got == vec![30, 3]
        ));
    }

    #[test]
    fn test_empty_state() {
        let bytes = save_to_bytes(&BTreeMap::new()).unwrap();
        assert!(load_from_bytes(&bytes).unwrap().is_empty());
    }
}
