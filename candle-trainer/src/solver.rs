//! Gradient update strategies.

use candle::backprop::GradStore;
use candle::{Result, Tensor, Var};
use candle_nn::Optimizer;

/// The three steps applied to the parameters after a training batch.
pub trait UpdateRule {
    /// Drop gradients left from a previous batch.
    fn zero_grad(&mut self);

    /// Compute gradients of `loss` with respect to every parameter.
    fn backward(&mut self, loss: &Tensor) -> Result<()>;

    /// Apply the pending gradients. Fails when no backward pass preceded it.
    fn update(&mut self) -> Result<()>;
}

/// Adapts a `candle_nn::Optimizer` to [`UpdateRule`].
pub struct Solver<O: Optimizer> {
    optimizer: O,
    grads: Option<GradStore>,
}

impl<O: Optimizer> Solver<O> {
    pub fn new(optimizer: O) -> Self {
        Self {
            optimizer,
            grads: None,
        }
    }

    pub fn from_config(vars: Vec<Var>, config: O::Config) -> Result<Self> {
        Ok(Self::new(O::new(vars, config)?))
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }
}

impl<O: Optimizer> UpdateRule for Solver<O> {
    fn zero_grad(&mut self) {
        self.grads = None;
    }

    fn backward(&mut self, loss: &Tensor) -> Result<()> {
        self.grads = Some(loss.backward()?);
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        match self.grads.take() {
            Some(grads) => self.optimizer.step(&grads),
            None => candle::bail!("update called without a backward pass"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ParamsMomentum {
    pub lr: f64,
    pub momentum: f64,
}

impl Default for ParamsMomentum {
    fn default() -> Self {
        Self {
            lr: 1e-2,
            momentum: 0.9,
        }
    }
}

/// SGD with momentum: `v = momentum * v + lr * g`, `w = w - v`.
#[derive(Debug)]
pub struct Momentum {
    vars: Vec<(Var, Tensor)>,
    params: ParamsMomentum,
}

impl Optimizer for Momentum {
    type Config = ParamsMomentum;

    fn new(vars: Vec<Var>, params: ParamsMomentum) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let velocity = var.zeros_like()?;
                Ok((var, velocity))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        for (var, velocity) in self.vars.iter_mut() {
            if let Some(grad) = grads.get(var) {
                let next = (velocity.affine(self.params.momentum, 0.)? + grad.affine(self.params.lr, 0.)?)?;
                var.set(&var.sub(&next)?)?;
                *velocity = next;
            }
        }
        Ok(())
    }
}
