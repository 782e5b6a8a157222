//! Optimizer(s)

use crate::values::Value;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
}

/// Stochastic gradient descent, `param <- param - lr * grad` when momentum is 0
pub struct SGD {
    params: Vec<Value>,
    // fixed for the whole run, no schedule
    lr: f32,
    momentum: f32,
    // velocity per parameter
    velocity: Vec<f32>,
}

impl SGD {
    /// Plain SGD without momentum
    pub fn new(params: Vec<Value>, lr: f32) -> Self {
        Self::with_momentum(params, lr, 0.0)
    }

    pub fn with_momentum(params: Vec<Value>, lr: f32, momentum: f32) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f32] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            let velocity = self.momentum * self.velocity[idx] - self.lr * param.grad();
            let new_val = param.data() + velocity;
            self.velocity[idx] = velocity;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        for param in self.params.iter_mut() {
            param.zero_grad();
        }
    }
}
