//! Incremental gradient update functions for backprop
//!
//! Applied depending on the operation which created outputs from inputs. Corresponds to
//! a node in the computation graph.

use crate::values::Value;

/// Represents the function in the computation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpropFunc {
    Add,
    Sub,
    Mul,
    Div,
    ReLU,
    Exp,
    Ln,
}

impl BackpropFunc {
    pub fn n_operands(&self) -> usize {
        match self {
            BackpropFunc::Add | BackpropFunc::Sub | BackpropFunc::Mul | BackpropFunc::Div => 2,
            BackpropFunc::ReLU | BackpropFunc::Exp | BackpropFunc::Ln => 1,
        }
    }
}

/// Represents backprop for the operation `in1 + in2 = out`
pub fn add(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    in1.0.borrow_mut().grad += grad;
    in2.0.borrow_mut().grad += grad;
}

/// Represents backprop for the operation `in1 - in2 = out`
pub fn sub(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    in1.0.borrow_mut().grad += grad;
    in2.0.borrow_mut().grad -= grad;
}

/// Represents backprop for the operation `in1 * in2 = out`
pub fn mul(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    // read both operands first, `in1` and `in2` may be the same node
    let (in1_data, in2_data) = (in1.data(), in2.data());
    in1.0.borrow_mut().grad += in2_data * grad;
    in2.0.borrow_mut().grad += in1_data * grad;
}

/// Represents backprop for the operation `in1 / in2 = out`
pub fn div(in1: &Value, in2: &Value, out: &Value) {
    let grad = out.grad();
    let (in1_data, in2_data) = (in1.data(), in2.data());
    in1.0.borrow_mut().grad += grad / in2_data;
    in2.0.borrow_mut().grad += -in1_data * grad / (in2_data * in2_data);
}

/// Represents backprop for the operation `relu(in) = out`
///
/// The subgradient at 0 is taken to be 0.
pub fn relu(in1: &Value, out: &Value) {
    let grad = out.grad();
    let in1_data = in1.data();
    in1.0.borrow_mut().grad += if in1_data > 0.0 { grad } else { 0.0 };
}

/// Represents backprop for the operation `exp(in) = out`
pub fn exp(in1: &Value, out: &Value) {
    let grad = out.grad();
    // d exp(x) / dx = exp(x), already stored in the output
    let out_data = out.data();
    in1.0.borrow_mut().grad += out_data * grad;
}

/// Represents backprop for the operation `ln(in) = out`
pub fn ln(in1: &Value, out: &Value) {
    let grad = out.grad();
    let in1_data = in1.data();
    in1.0.borrow_mut().grad += grad / in1_data;
}

/// Applies a backprop function for operators with two operands
pub fn update_gradients_two_operands(in1: &Value, in2: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::Add) => add(in1, in2, out),
        Some(BackpropFunc::Sub) => sub(in1, in2, out),
        Some(BackpropFunc::Mul) => mul(in1, in2, out),
        Some(BackpropFunc::Div) => div(in1, in2, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}

/// Applies a backprop function for operators with one operand
pub fn update_gradients_one_operand(in1: &Value, out: &Value) {
    let backprop_fn = { out.0.borrow().backprop_fn };
    match backprop_fn {
        Some(BackpropFunc::ReLU) => relu(in1, out),
        Some(BackpropFunc::Exp) => exp(in1, out),
        Some(BackpropFunc::Ln) => ln(in1, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}
