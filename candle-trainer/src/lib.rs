//! Epoch-driven training loop for Candle graphs, inspired by PyTorch Lightning.
//!
//! A [`Trainer`] feeds batches from a [`BatchSource`] into a [`LightModule`],
//! applies an [`UpdateRule`] after every training batch, and after each epoch
//! appends the metric means to `<save_path>/<metric>-<phase>.series.txt`,
//! redraws the learning curves and writes `snapshot_epoch_<n>.safetensors`.

pub mod callbacks;
pub mod config;
pub mod data;
pub mod metrics;
pub mod module;
pub mod monitor;
pub mod plot;
pub mod solver;
pub mod trainer;

pub use callbacks::{Callback, Checkpointer};
pub use config::TrainerConfig;
pub use data::{ArrayIterator, BatchSource};
pub use metrics::{Computation, Loss, MetricSet, Output};
pub use module::{InputSpec, LightModule, StepOutput};
pub use monitor::{Series, SeriesStore};
pub use plot::PlotFormat;
pub use solver::{Momentum, ParamsMomentum, Solver, UpdateRule};
pub use trainer::{BatchValues, EpochResult, EpochSummary, Trainer};
