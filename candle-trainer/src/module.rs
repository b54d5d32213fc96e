//! LightModule trait for trainable graphs.

use candle::{Result, Shape, Tensor, Var};
use candle_nn::VarMap;
use std::collections::HashMap;

/// A named input placeholder. The leading dimension is the batch size.
#[derive(Clone, Debug, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub shape: Shape,
}

impl InputSpec {
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
        }
    }

    /// Leading dimension of the placeholder, if it has one.
    pub fn batch_size(&self) -> Option<usize> {
        self.shape.dims().first().copied()
    }
}

/// Output of one forward pass.
pub struct StepOutput {
    /// The loss tensor for backpropagation.
    pub loss: Tensor,
    /// Named intermediate nodes metrics can read from (e.g. accuracy).
    pub outputs: HashMap<String, Tensor>,
}

impl StepOutput {
    pub fn new(loss: Tensor) -> Self {
        Self {
            loss,
            outputs: HashMap::new(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: Tensor) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    pub fn output(&self, name: &str) -> Result<&Tensor> {
        match self.outputs.get(name) {
            Some(t) => Ok(t),
            None => candle::bail!("forward pass has no output named `{name}`"),
        }
    }
}

/// Trait for graphs that can be driven by [`Trainer`](crate::Trainer).
///
/// `inputs` holds one tensor per declared placeholder, in declaration order.
pub trait LightModule {
    /// Run the graph on a batch and return the loss plus named outputs.
    fn forward(&mut self, inputs: &[Tensor], train: bool) -> Result<StepOutput>;

    /// The named parameter store, used for snapshots.
    fn varmap(&self) -> &VarMap;

    /// Return all trainable parameters.
    fn parameters(&self) -> Vec<Var> {
        self.varmap().all_vars()
    }
}
