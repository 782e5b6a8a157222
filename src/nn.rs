//! Components to build a neural network

use std::{
    collections::BTreeMap,
    sync::atomic::{self, AtomicUsize},
};

use rand::Rng;
use rand_distr::{Distribution, Uniform};
use thiserror::Error;

use crate::{
    tensor::{Tensor, TensorError},
    values::{Value, no_grad},
};

/// Named parameter tensors, e.g. `layers.0.weight` -> `[30, 2]`
pub type StateDict = BTreeMap<String, Tensor>;

/// Errors for the neural network
#[derive(Debug, Error, PartialEq)]
pub enum NNError {
    #[error("Input size mismatch: expected {expected} features, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error("A layer needs at least one input and one output, got {n_inputs} -> {n_outputs}")]
    EmptyLayer { n_inputs: usize, n_outputs: usize },
    #[error("Failed to initialize weights: {0}")]
    Initialization(String),
    #[error("Missing parameter '{0}' in state dict")]
    MissingParameter(String),
    #[error("Unexpected parameter '{0}' in state dict")]
    UnexpectedParameter(String),
    #[error("Shape mismatch for '{name}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Whether a module is being trained or evaluated. Layers such as dropout would
/// behave differently between the two, none of the layers here do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    /// Maps a `[batch, features]` matrix to one row of output values per sample
    fn forward(&self, features: &Tensor) -> Result<Vec<Vec<Value>>, NNError>;
    fn parameters(&self) -> Vec<Value>;
    fn mode(&self) -> Mode;
    fn set_mode(&mut self, mode: Mode);

    fn zero_grad(&mut self) {
        for p in self.parameters().iter_mut() {
            p.zero_grad();
        }
    }

    fn train(&mut self) {
        self.set_mode(Mode::Train);
    }

    fn eval(&mut self) {
        self.set_mode(Mode::Eval);
    }

    /// Runs the forward pass without building a computation graph and returns
    /// the outputs as a `[batch, outputs]` tensor
    fn predict(&self, features: &Tensor) -> Result<Tensor, NNError> {
        no_grad(|| {
            let outputs = self.forward(features)?;
            let rows = outputs
                .iter()
                .map(|row| row.iter().map(Value::data).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            let n_outputs = rows.first().map_or(0, Vec::len);
            Ok(Tensor::new(rows.concat(), vec![rows.len(), n_outputs])?)
        })
    }
}

/// A single neuron in a layer of a NN
pub struct Neuron {
    /// weights of the neuron
    pub weights: Vec<Value>,
    /// bias of the neuron
    pub bias: Value,
}

impl Neuron {
    fn new<R: Rng + ?Sized>(n_inputs: usize, init: &Uniform<f32>, rng: &mut R) -> Self {
        Self {
            weights: (0..n_inputs).map(|_| Value::new(init.sample(rng))).collect(),
            bias: Value::new(init.sample(rng)),
        }
    }

    // Testing utility for a deterministic and simple neuron
    #[cfg(test)]
    fn new_ones(n_inputs: usize) -> Self {
        Self {
            weights: (0..n_inputs).map(|_| Value::new(1.0)).collect(),
            bias: Value::new(1.0),
        }
    }

    pub fn parameters(&self) -> Vec<Value> {
        self.weights
            .iter()
            .chain(std::iter::once(&self.bias))
            .cloned()
            .collect()
    }

    pub fn forward(&self, inputs: &[Value]) -> Result<Value, NNError> {
        if inputs.len() != self.weights.len() {
            return Err(NNError::InputSizeMismatch {
                expected: self.weights.len(),
                got: inputs.len(),
            });
        }
        let output = self
            .weights
            .iter()
            .zip(inputs.iter())
            .map(|(w, i)| w * i)
            .sum::<Value>();
        Ok(&output + &self.bias)
    }
}

/// A fully connected layer, `y = W x + b` with `W` of shape `[n_outputs, n_inputs]`
pub struct Linear {
    neurons: Vec<Neuron>,
    n_inputs: usize,
}

impl Linear {
    /// Creates a new layer with the given number of inputs and outputs. Weights and
    /// biases are drawn from `U(-1/sqrt(n_inputs), 1/sqrt(n_inputs))`, the PyTorch default.
    pub fn new<R: Rng + ?Sized>(
        n_inputs: usize,
        n_outputs: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        if n_inputs == 0 || n_outputs == 0 {
            return Err(NNError::EmptyLayer {
                n_inputs,
                n_outputs,
            });
        }
        let bound = 1.0 / (n_inputs as f32).sqrt();
        let init = Uniform::new(-bound, bound).map_err(|e| NNError::Initialization(e.to_string()))?;
        let neurons = (0..n_outputs)
            .map(|_| Neuron::new(n_inputs, &init, rng))
            .collect();
        Ok(Self { neurons, n_inputs })
    }

    #[cfg(test)]
    fn new_ones(n_inputs: usize, n_outputs: usize) -> Self {
        let neurons = (0..n_outputs).map(|_| Neuron::new_ones(n_inputs)).collect();
        Self { neurons, n_inputs }
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.neurons.len()
    }

    /// Returns all the parameters in the layer
    pub fn parameters(&self) -> Vec<Value> {
        self.neurons.iter().flat_map(|n| n.parameters()).collect()
    }

    /// Computes forward pass for a layer
    pub fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        let outputs = self
            .neurons
            .iter()
            .map(|n| n.forward(inputs))
            .collect::<Result<Vec<_>, _>>()?;
        let n_output_nans = outputs.iter().filter(|v| !v.data().is_finite()).count();
        if n_output_nans > 0 {
            log::debug!("n_output_nans: {}", n_output_nans);
        }
        Ok(outputs)
    }

    /// Weight matrix as a `[n_outputs, n_inputs]` tensor
    pub fn weight(&self) -> Tensor {
        let data = self
            .neurons
            .iter()
            .flat_map(|n| n.weights.iter().map(Value::data))
            .collect();
        Tensor::new(data, vec![self.n_outputs(), self.n_inputs])
            .expect("every neuron has n_inputs weights")
    }

    /// Bias vector as a `[n_outputs]` tensor
    pub fn bias(&self) -> Tensor {
        Tensor::from_vec(self.neurons.iter().map(|n| n.bias.data()).collect())
    }

    /// Overwrites the weights, `weight` must be `[n_outputs, n_inputs]`
    pub fn set_weight(&mut self, name: &str, weight: &Tensor) -> Result<(), NNError> {
        check_shape(name, &[self.n_outputs(), self.n_inputs], weight)?;
        let rows = weight.data().chunks(self.n_inputs);
        for (neuron, row) in self.neurons.iter_mut().zip(rows) {
            for (w, &v) in neuron.weights.iter_mut().zip(row) {
                w.set_data(v);
            }
        }
        Ok(())
    }

    /// Overwrites the biases, `bias` must be `[n_outputs]`
    pub fn set_bias(&mut self, name: &str, bias: &Tensor) -> Result<(), NNError> {
        check_shape(name, &[self.n_outputs()], bias)?;
        for (neuron, &v) in self.neurons.iter_mut().zip(bias.data()) {
            neuron.bias.set_data(v);
        }
        Ok(())
    }
}

fn check_shape(name: &str, expected: &[usize], tensor: &Tensor) -> Result<(), NNError> {
    if tensor.shape() != expected {
        return Err(NNError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            got: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

/// Applies ReLU to a set of values, works for arbitrary number of inputs
#[derive(Default)]
pub struct ReLU {
    n_dead_neurons: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            n_dead_neurons: AtomicUsize::new(0),
        }
    }

    /// Takes the element-wise ReLU of the input values
    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        let n_dead_neurons = inputs.iter().filter(|v| v.data() <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        inputs.iter().map(|v| v.relu()).collect()
    }

    /// Returns the number of inactive units in the last forward call (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

/// Widths of the two hidden layers
pub const HIDDEN_SIZES: [usize; 2] = [30, 20];

/// A multilayer perceptron with two hidden layers, outputs unnormalized class scores (logits)
///
/// `Linear(n_inputs, 30) -> ReLU -> Linear(30, 20) -> ReLU -> Linear(20, n_outputs)`
///
/// Parameters are named after their position in the stack like a
/// `torch.nn.Sequential` stored as `layers`: `layers.0`, `layers.2`, `layers.4`.
pub struct Classifier {
    l1: Linear,
    l1_relu: ReLU,
    l2: Linear,
    l2_relu: ReLU,
    l3: Linear,
    mode: Mode,
}

impl Classifier {
    pub fn new<R: Rng + ?Sized>(
        num_inputs: usize,
        num_outputs: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        let [h1, h2] = HIDDEN_SIZES;
        Ok(Self {
            l1: Linear::new(num_inputs, h1, rng)?,
            l1_relu: ReLU::new(),
            l2: Linear::new(h1, h2, rng)?,
            l2_relu: ReLU::new(),
            l3: Linear::new(h2, num_outputs, rng)?,
            mode: Mode::default(),
        })
    }

    pub fn num_inputs(&self) -> usize {
        self.l1.n_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.l3.n_outputs()
    }

    /// Inactive units in the two hidden layers for the last sample forwarded
    pub fn n_dead_neurons(&self) -> usize {
        self.l1_relu.n_dead_neurons() + self.l2_relu.n_dead_neurons()
    }

    fn layers(&self) -> [(&'static str, &Linear); 3] {
        [
            ("layers.0", &self.l1),
            ("layers.2", &self.l2),
            ("layers.4", &self.l3),
        ]
    }

    fn layers_mut(&mut self) -> [(&'static str, &mut Linear); 3] {
        [
            ("layers.0", &mut self.l1),
            ("layers.2", &mut self.l2),
            ("layers.4", &mut self.l3),
        ]
    }

    fn forward_sample(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        let l1_out = self.l1.forward(inputs)?;
        let l1_relu_out = self.l1_relu.forward(&l1_out);
        let l2_out = self.l2.forward(&l1_relu_out)?;
        let l2_relu_out = self.l2_relu.forward(&l2_out);
        self.l3.forward(&l2_relu_out)
    }

    /// Copies every weight and bias into a name -> tensor map
    pub fn state_dict(&self) -> StateDict {
        self.layers()
            .into_iter()
            .flat_map(|(name, layer)| {
                [
                    (format!("{name}.weight"), layer.weight()),
                    (format!("{name}.bias"), layer.bias()),
                ]
            })
            .collect()
    }

    /// Overwrites the parameters in place. Every parameter must be present with the
    /// shape of this model, nothing is written if any check fails.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<(), NNError> {
        let expected = self.state_dict();
        if let Some(name) = state.keys().find(|k| !expected.contains_key(*k)) {
            return Err(NNError::UnexpectedParameter(name.clone()));
        }
        for (name, current) in &expected {
            let loaded = state
                .get(name)
                .ok_or_else(|| NNError::MissingParameter(name.clone()))?;
            check_shape(name, current.shape(), loaded)?;
        }

        for (name, layer) in self.layers_mut() {
            let weight_name = format!("{name}.weight");
            let bias_name = format!("{name}.bias");
            layer.set_weight(&weight_name, &state[&weight_name])?;
            layer.set_bias(&bias_name, &state[&bias_name])?;
        }
        Ok(())
    }
}

impl Module for Classifier {
    fn forward(&self, features: &Tensor) -> Result<Vec<Vec<Value>>, NNError> {
        let (_, n_features) = features.dims2()?;
        if n_features != self.num_inputs() {
            return Err(NNError::InputSizeMismatch {
                expected: self.num_inputs(),
                got: n_features,
            });
        }
        features
            .rows()?
            .map(|row| {
                let inputs = row.iter().map(|&x| Value::new(x)).collect::<Vec<_>>();
                self.forward_sample(&inputs)
            })
            .collect()
    }

    fn parameters(&self) -> Vec<Value> {
        self.layers()
            .into_iter()
            .flat_map(|(_, layer)| layer.parameters())
            .collect()
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}
