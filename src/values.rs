//! Scalar values which form a computation graph
use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    iter::Sum,
    ops::{Add, Div, Mul, Sub},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::backprop_fns::{
    BackpropFunc, update_gradients_one_operand, update_gradients_two_operands,
};

type SharedValue = Rc<RefCell<InnerValue>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Runs `f` without recording any operations in the computation graph,
/// analogous to `torch.no_grad()`. Values created inside are leaves.
pub fn no_grad<T>(f: impl FnOnce() -> T) -> T {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            GRAD_ENABLED.with(|g| g.set(self.0));
        }
    }

    let _restore = Restore(GRAD_ENABLED.with(|g| g.replace(false)));
    f()
}

/// Whether operations are currently recorded for backprop
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|g| g.get())
}

/// Newtype representing a shared value in a computation graph
#[derive(Debug, Clone)]
pub struct Value(pub(crate) SharedValue);

impl Value {
    /// Create a new value, not derived from any other values
    pub fn new(data: f32) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(data, None))))
    }

    /// Create a new value derived from an operation on `operands` (i.e. not a leaf node).
    /// Inside [`no_grad`] the result is a leaf.
    fn new_derived(data: f32, backprop_fn: BackpropFunc, operands: &[&Value]) -> Self {
        if !is_grad_enabled() {
            return Value::new(data);
        }
        debug_assert_eq!(backprop_fn.n_operands(), operands.len());
        let mut inner = InnerValue::new(data, Some(backprop_fn));
        inner.children = operands.iter().map(|v| v.0.clone()).collect();
        Self(Rc::new(RefCell::new(inner)))
    }

    pub fn data(&self) -> f32 {
        self.0.borrow().data
    }

    pub fn grad(&self) -> f32 {
        self.0.borrow().grad
    }

    // Strictly, &mut isn't needed since the value is behind a shared mutable type,
    // but it indicates that the value should be excusively mutable
    pub fn set_data(&mut self, data: f32) {
        self.0.borrow_mut().data = data;
    }

    /// Zeros the gradient of this node only. Intermediate nodes are rebuilt on every
    /// forward pass, so zeroing the leaves (parameters) is enough between steps.
    pub fn zero_grad(&mut self) {
        self.0.borrow_mut().grad = 0.0;
    }

    /// Whether the value was produced by a recorded operation
    pub fn is_leaf(&self) -> bool {
        self.0.borrow().children.is_empty()
    }

    /// Accumulates d self / d node into every node reachable from `self`
    pub fn backward(&self) {
        // d out / d out = 1
        self.0.borrow_mut().grad = 1.0;

        let mut backprop_order = vec![];
        let mut visited: HashSet<u64> = HashSet::new();

        // visit in post order
        self.backward_inner(&mut backprop_order, &mut visited);

        // apply backprop, reversed to start from root first
        for value in backprop_order.into_iter().rev() {
            let n_operands = value.0.borrow().children.len();
            match n_operands {
                0 => {}
                1 => {
                    let in1 = Value(value.0.borrow().children[0].clone());
                    update_gradients_one_operand(&in1, &value);
                }
                2 => {
                    let in1 = Value(value.0.borrow().children[0].clone());
                    let in2 = Value(value.0.borrow().children[1].clone());
                    update_gradients_two_operands(&in1, &in2, &value);
                }
                _ => {
                    panic!("Unsupported number of operands: {}", n_operands);
                }
            }
        }
    }

    fn backward_inner(&self, backprop_order: &mut Vec<Value>, visited: &mut HashSet<u64>) {
        for c in self.0.borrow().children.iter() {
            let id = c.borrow().id;
            if !visited.insert(id) {
                continue;
            }
            Value(c.clone()).backward_inner(backprop_order, visited);
        }
        backprop_order.push(self.clone());
    }
}

// Various operations on values
impl Value {
    pub fn relu(&self) -> Value {
        Value::new_derived(self.data().max(0.0), BackpropFunc::ReLU, &[self])
    }

    pub fn exp(&self) -> Value {
        Value::new_derived(self.data().exp(), BackpropFunc::Exp, &[self])
    }

    /// Natural logarithm
    pub fn ln(&self) -> Value {
        Value::new_derived(self.data().ln(), BackpropFunc::Ln, &[self])
    }
}

impl Add for &Value {
    type Output = Value;

    fn add(self, other: &Value) -> Value {
        Value::new_derived(self.data() + other.data(), BackpropFunc::Add, &[self, other])
    }
}

impl Sub for &Value {
    type Output = Value;

    fn sub(self, other: &Value) -> Value {
        Value::new_derived(self.data() - other.data(), BackpropFunc::Sub, &[self, other])
    }
}

impl Mul for &Value {
    type Output = Value;

    fn mul(self, other: &Value) -> Value {
        Value::new_derived(self.data() * other.data(), BackpropFunc::Mul, &[self, other])
    }
}

impl Div for &Value {
    type Output = Value;

    fn div(self, other: &Value) -> Value {
        Value::new_derived(self.data() / other.data(), BackpropFunc::Div, &[self, other])
    }
}

impl Sum for Value {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Value::new(0.0), |acc, v| acc + v)
    }
}

/// Convenience macro to implement operations on `[Value]` when ownership can be transferred
macro_rules! impl_arithmetic(
    ($trait:ident, $trait_method:ident, $operator:tt, $struct:ident) => {
        impl $trait for $struct {
            type Output = Self;

            fn $trait_method(self, other: Self) -> Self {
                &self $operator &other
            }
        }
    }
);
impl_arithmetic!(Add, add, +, Value);
impl_arithmetic!(Sub, sub, -, Value);
impl_arithmetic!(Mul, mul, *, Value);
impl_arithmetic!(Div, div, /, Value);

#[derive(Debug)]
pub(crate) struct InnerValue {
    // the network uses 32 bit precision floats (roughly 7 decimal digits of precision)
    pub(crate) data: f32,
    /// gradient of the value with respect to the output
    pub(crate) grad: f32,
    /// List of the node inputs in the forward pass
    /// These nodes are "children" in the backwards pass
    children: Vec<SharedValue>,
    /// Unique identifier for the node
    id: u64,
    /// The function which created this value from its children
    /// `None` when the value is a leaf node
    pub(crate) backprop_fn: Option<BackpropFunc>,
}

impl InnerValue {
    fn new(data: f32, backprop_fn: Option<BackpropFunc>) -> Self {
        Self {
            data,
            grad: 0.0,
            children: vec![],
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            backprop_fn,
        }
    }
}
