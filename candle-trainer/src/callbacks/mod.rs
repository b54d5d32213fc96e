//! Callback system for training hooks.

mod checkpoint;

pub use checkpoint::Checkpointer;

use crate::{BatchValues, EpochSummary};
use candle::Result;

pub trait Callback {
    fn on_fit_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_fit_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_epoch_start(&mut self, _epoch: usize) -> Result<()> {
        Ok(())
    }

    /// Called after the epoch's series, plots and snapshot are written,
    /// before the epoch counter advances.
    fn on_epoch_end(&mut self, _epoch: usize, _summary: &EpochSummary) -> Result<()> {
        Ok(())
    }

    fn on_train_batch_end(&mut self, _batch_idx: usize, _values: &BatchValues) -> Result<()> {
        Ok(())
    }

    fn should_stop(&self) -> bool {
        false
    }
}
