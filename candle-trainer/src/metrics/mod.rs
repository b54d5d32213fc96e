//! Metrics for tracking training progress.

use crate::StepOutput;
use candle::{DType, Result, Tensor};

/// A scalar node evaluated on every batch.
pub trait Computation {
    fn forward(&self, step: &StepOutput) -> Result<Tensor>;

    /// True when this computation is the session loss itself.
    fn is_loss(&self) -> bool {
        false
    }
}

/// The loss of the forward pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct Loss;

impl Computation for Loss {
    fn forward(&self, step: &StepOutput) -> Result<Tensor> {
        Ok(step.loss.clone())
    }

    fn is_loss(&self) -> bool {
        true
    }
}

/// A named output of the forward pass, see [`StepOutput::with_output`].
#[derive(Clone, Debug)]
pub struct Output(pub String);

impl Output {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Computation for Output {
    fn forward(&self, step: &StepOutput) -> Result<Tensor> {
        step.output(&self.0).cloned()
    }
}

impl<F> Computation for F
where
    F: Fn(&StepOutput) -> Result<Tensor>,
{
    fn forward(&self, step: &StepOutput) -> Result<Tensor> {
        self(step)
    }
}

/// Ordered name to computation mapping.
#[derive(Default)]
pub struct MetricSet {
    entries: Vec<(String, Box<dyn Computation>)>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, computation: impl Computation + 'static) -> Self {
        self.entries.push((name.into(), Box::new(computation)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Computation> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Computation)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c.as_ref()))
    }

    /// Position of the first metric bound to the loss.
    pub fn loss_position(&self) -> Option<usize> {
        self.entries.iter().position(|(_, c)| c.is_loss())
    }

    /// Canonical form used by the trainer.
    ///
    /// An empty set becomes `{"loss": Loss}`. Otherwise spaces in names become
    /// hyphens; if two names collide after that, the later computation replaces
    /// the earlier one in its first position.
    pub fn sanitize(self) -> Self {
        if self.entries.is_empty() {
            return Self::new().with("loss", Loss);
        }
        let mut entries: Vec<(String, Box<dyn Computation>)> = Vec::with_capacity(self.entries.len());
        for (name, computation) in self.entries {
            let name = name.replace(' ', "-");
            match entries.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => {
                    tracing::warn!(metric = %name, "metric names collide after sanitization, keeping the later one");
                    slot.1 = computation;
                }
                None => entries.push((name, computation)),
            }
        }
        Self { entries }
    }
}

/// Reduce a metric node to the scalar that is recorded for a batch.
pub fn scalar(t: &Tensor) -> Result<f64> {
    t.to_dtype(DType::F64)?.mean_all()?.to_scalar::<f64>()
}

/// Per-batch values of one metric over an epoch.
#[derive(Clone, Debug, Default)]
pub struct Mean {
    values: Vec<f64>,
}

impl Mean {
    pub fn update(&mut self, value: f64) {
        self.values.push(value);
    }

    /// Arithmetic mean of the recorded values, NaN when empty.
    pub fn compute(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}
