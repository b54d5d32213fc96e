//! Training loop implementation.

use crate::callbacks::{Callback, Checkpointer};
use crate::metrics::{scalar, Computation, Loss, Mean, MetricSet};
use crate::monitor::SeriesStore;
use crate::plot::{plot_metric, PlotFormat};
use crate::solver::UpdateRule;
use crate::{BatchSource, InputSpec, LightModule, TrainerConfig};
use candle::{Device, Result, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::path::{Path, PathBuf};

/// Epoch means keyed by `<metric>-<train|valid>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpochResult {
    entries: Vec<(String, f64)>,
}

impl EpochResult {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for EpochResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value:.5}")?;
        }
        Ok(())
    }
}

/// Results of one completed epoch of [`Trainer::run`].
#[derive(Clone, Debug)]
pub struct EpochSummary {
    /// Zero-based epoch index.
    pub epoch: usize,
    pub train: EpochResult,
    pub valid: Option<EpochResult>,
}

/// Metric values recorded for a single batch.
#[derive(Clone, Debug, Default)]
pub struct BatchValues {
    pub values: Vec<(String, f64)>,
}

impl BatchValues {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

pub struct Trainer<M: LightModule, U: UpdateRule> {
    model: M,
    solver: U,
    inputs: Vec<InputSpec>,
    metrics: MetricSet,
    save_path: PathBuf,
    current_epoch: usize,
    device: Device,
    plot_format: PlotFormat,
    log_every_n_steps: usize,
    progress_bar: bool,
    series: SeriesStore,
    checkpointer: Checkpointer,
    callbacks: Vec<Box<dyn Callback>>,
}

impl<M: LightModule, U: UpdateRule> Trainer<M, U> {
    pub fn new(config: TrainerConfig, model: M, solver: U) -> Result<Self> {
        check_inputs(&config.inputs)?;
        let series = SeriesStore::open(&config.save_path)?;
        let checkpointer = Checkpointer::new(&config.save_path);
        Ok(Self {
            model,
            solver,
            inputs: config.inputs,
            metrics: config.metrics.sanitize(),
            save_path: config.save_path,
            current_epoch: config.current_epoch,
            device: config.device,
            plot_format: config.plot_format,
            log_every_n_steps: config.log_every_n_steps,
            progress_bar: config.progress_bar,
            series,
            checkpointer,
            callbacks: Vec::new(),
        })
    }

    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn series(&self) -> &SeriesStore {
        &self.series
    }

    pub fn checkpointer(&self) -> &Checkpointer {
        &self.checkpointer
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Rows per batch, the leading dimension of the first input.
    pub fn batch_size(&self) -> usize {
        self.inputs[0].batch_size().unwrap_or(0)
    }

    /// Swap in new placeholders and metrics, e.g. after rebuilding the graph.
    pub fn update_variables(&mut self, inputs: Vec<InputSpec>, metrics: MetricSet) -> Result<()> {
        check_inputs(&inputs)?;
        self.inputs = inputs;
        self.metrics = metrics.sanitize();
        Ok(())
    }

    /// Restore the newest snapshot in the save path and continue after it.
    pub fn resume(&mut self) -> Result<Option<usize>> {
        let Some(epoch) = self.checkpointer.latest()? else {
            return Ok(None);
        };
        self.checkpointer.load(self.model.varmap(), epoch)?;
        self.current_epoch = epoch;
        Ok(Some(epoch))
    }

    /// Train for `epochs` epochs, validating after each one when `valid` is given.
    pub fn run(
        &mut self,
        train: &mut dyn BatchSource,
        mut valid: Option<&mut dyn BatchSource>,
        epochs: usize,
    ) -> Result<Vec<EpochSummary>> {
        let num_train_batch = self.check_source(&*train, "training")?;
        let num_valid_batch = match valid.as_deref() {
            Some(v) => self.check_source(v, "validation")?,
            None => 0,
        };

        for cb in self.callbacks.iter_mut() {
            cb.on_fit_start()?;
        }

        let mut history = Vec::with_capacity(epochs);
        for _ in 0..epochs {
            let epoch = self.current_epoch;
            for cb in self.callbacks.iter_mut() {
                cb.on_epoch_start(epoch)?;
            }

            let train_result = self.run_one_epoch(num_train_batch, epoch, train, true, true)?;
            self.save_result(&train_result, false)?;

            let valid_result = match valid.as_deref_mut() {
                Some(v) => {
                    let result = self.run_one_epoch(num_valid_batch, epoch, v, false, false)?;
                    self.save_result(&result, false)?;
                    Some(result)
                }
                None => None,
            };

            self.save_fig()?;
            self.snapshot()?;

            match &valid_result {
                Some(v) => tracing::info!(epoch = epoch + 1, "{train_result}, {v}"),
                None => tracing::info!(epoch = epoch + 1, "{train_result}"),
            }

            let summary = EpochSummary {
                epoch,
                train: train_result,
                valid: valid_result,
            };
            for cb in self.callbacks.iter_mut() {
                cb.on_epoch_end(epoch, &summary)?;
            }
            history.push(summary);
            self.current_epoch += 1;

            if self.callbacks.iter().any(|cb| cb.should_stop()) {
                tracing::info!(epoch = epoch + 1, "stopping early");
                break;
            }
        }

        for cb in self.callbacks.iter_mut() {
            cb.on_fit_end()?;
        }
        Ok(history)
    }

    /// One validation pass against the last completed epoch.
    ///
    /// Series and plots are updated; snapshots and the epoch counter are not.
    pub fn evaluate(&mut self, valid: &mut dyn BatchSource) -> Result<EpochResult> {
        let num_valid_batch = self.check_source(&*valid, "validation")?;
        let epoch = self.current_epoch.saturating_sub(1);
        let result = self.run_one_epoch(num_valid_batch, epoch, valid, false, false)?;
        self.save_result(&result, true)?;
        self.save_fig()?;
        Ok(result)
    }

    /// Append `result` to the series, at `current_epoch + 1` after training
    /// or at `current_epoch` for a standalone evaluation.
    pub fn save_result(&mut self, result: &EpochResult, evaluate: bool) -> Result<()> {
        let index = if evaluate {
            self.current_epoch
        } else {
            self.current_epoch + 1
        };
        for (key, value) in result.iter() {
            self.series.add(key, index, value)?;
        }
        Ok(())
    }

    /// Redraw the learning curve of every metric that has a series.
    pub fn save_fig(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for name in self.metrics.names() {
            if let Some(path) = plot_metric(&self.series, name, &self.save_path, self.plot_format)? {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Save all parameters as the snapshot of the epoch about to start.
    pub fn snapshot(&self) -> Result<PathBuf> {
        self.checkpointer.save(self.model.varmap(), self.current_epoch + 1)
    }

    fn check_source(&self, source: &dyn BatchSource, role: &str) -> Result<usize> {
        if source.num_variables() != self.inputs.len() {
            candle::bail!(
                "the {role} source yields {} variables but {} inputs are declared",
                source.num_variables(),
                self.inputs.len()
            );
        }
        let batch_size = self.batch_size();
        if source.batch_size() != batch_size {
            candle::bail!(
                "the {role} source has batch size {}, inputs expect {batch_size}",
                source.batch_size()
            );
        }
        Ok(source.size() / batch_size)
    }

    fn bind(&self, batch: Vec<Tensor>) -> Result<Vec<Tensor>> {
        if batch.len() != self.inputs.len() {
            candle::bail!("batch has {} arrays for {} inputs", batch.len(), self.inputs.len());
        }
        batch
            .into_iter()
            .zip(&self.inputs)
            .map(|(data, input)| {
                if data.shape() != &input.shape {
                    candle::bail!(
                        "input `{}` expects shape {:?}, got {:?}",
                        input.name,
                        input.shape,
                        data.shape()
                    );
                }
                data.to_device(&self.device)
            })
            .collect()
    }

    fn progress(&self, num_batch: usize) -> Result<ProgressBar> {
        if !self.progress_bar {
            return Ok(ProgressBar::hidden());
        }
        let style = ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} {elapsed}")
            .map_err(|e| candle::Error::Msg(e.to_string()))?
            .progress_chars("=>-");
        Ok(ProgressBar::new(num_batch as u64).with_style(style))
    }

    fn run_one_epoch(
        &mut self,
        num_batch: usize,
        epoch: usize,
        source: &mut dyn BatchSource,
        train: bool,
        show_epoch: bool,
    ) -> Result<EpochResult> {
        let phase = if train { "train" } else { "valid" };
        let mut logger = vec![Mean::default(); self.metrics.len()];
        let progress = self.progress(num_batch)?;

        for batch_idx in 0..num_batch {
            let inputs = self.bind(source.next_batch()?)?;
            let step = self.model.forward(&inputs, train)?;
            let nodes = self
                .metrics
                .iter()
                .map(|(_, metric)| metric.forward(&step))
                .collect::<Result<Vec<_>>>()?;

            if train {
                let loss = match self.metrics.loss_position() {
                    Some(idx) => nodes[idx].clone(),
                    None => Loss.forward(&step)?,
                };
                self.solver.zero_grad();
                self.solver.backward(&loss)?;
                self.solver.update()?;
            }

            let mut values = BatchValues::default();
            for ((name, node), mean) in self.metrics.names().zip(&nodes).zip(logger.iter_mut()) {
                let value = scalar(node)?;
                mean.update(value);
                values.values.push((name.to_string(), value));
            }

            let mut description = Vec::with_capacity(logger.len() + 1);
            if show_epoch {
                description.push(format!("epoch: {}", epoch + 1));
            }
            for (name, mean) in self.metrics.names().zip(&logger) {
                description.push(format!("{phase} {name}: {:.5}", mean.compute()));
            }
            let description = description.join(", ");
            if self.log_every_n_steps > 0 && (batch_idx + 1) % self.log_every_n_steps == 0 {
                tracing::info!(batch = batch_idx + 1, num_batch, "{description}");
            }
            progress.set_message(description);
            progress.inc(1);

            if train {
                for cb in self.callbacks.iter_mut() {
                    cb.on_train_batch_end(batch_idx, &values)?;
                }
            }
        }
        progress.finish_and_clear();

        let entries = self
            .metrics
            .names()
            .zip(&logger)
            .map(|(name, mean)| (format!("{name}-{phase}"), mean.compute()))
            .collect();
        Ok(EpochResult { entries })
    }
}

fn check_inputs(inputs: &[InputSpec]) -> Result<()> {
    match inputs.first().map(InputSpec::batch_size) {
        None => candle::bail!("at least one input placeholder is required"),
        Some(None) | Some(Some(0)) => {
            candle::bail!("the first input must have a non-empty leading batch dimension")
        }
        Some(Some(_)) => Ok(()),
    }
}
