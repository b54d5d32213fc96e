//! Trainer configuration.

use crate::metrics::{Computation, MetricSet};
use crate::plot::PlotFormat;
use crate::InputSpec;
use candle::Device;
use std::path::PathBuf;

pub struct TrainerConfig {
    /// Input placeholders, in the order batch sources yield them.
    pub inputs: Vec<InputSpec>,
    /// Named metrics; empty means "track the loss".
    pub metrics: MetricSet,
    /// Directory for series files, plots and snapshots.
    pub save_path: PathBuf,
    /// Epochs already completed, e.g. when resuming.
    pub current_epoch: usize,
    pub device: Device,
    pub plot_format: PlotFormat,
    /// Emit the running metrics through `tracing` every n batches (0 disables).
    pub log_every_n_steps: usize,
    /// Draw a progress bar on the terminal.
    pub progress_bar: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            metrics: MetricSet::new(),
            save_path: PathBuf::from("log"),
            current_epoch: 0,
            device: Device::Cpu,
            plot_format: PlotFormat::default(),
            log_every_n_steps: 0,
            progress_bar: true,
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(mut self, inputs: Vec<InputSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn metric(mut self, name: impl Into<String>, computation: impl Computation + 'static) -> Self {
        self.metrics = self.metrics.with(name, computation);
        self
    }

    pub fn metrics(mut self, metrics: MetricSet) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = path.into();
        self
    }

    pub fn current_epoch(mut self, epoch: usize) -> Self {
        self.current_epoch = epoch;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn plot_format(mut self, format: PlotFormat) -> Self {
        self.plot_format = format;
        self
    }

    pub fn log_every_n_steps(mut self, n: usize) -> Self {
        self.log_every_n_steps = n;
        self
    }

    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.progress_bar = enabled;
        self
    }
}
