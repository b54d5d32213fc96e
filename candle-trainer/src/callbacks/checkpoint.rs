//! Per-epoch parameter snapshots.

use candle::Result;
use candle_nn::VarMap;
use std::path::{Path, PathBuf};

const PREFIX: &str = "snapshot_epoch_";
const EXTENSION: &str = "safetensors";

/// Writes `snapshot_epoch_<n>.safetensors` files into a directory.
///
/// Each epoch gets its own file; nothing is pruned or overwritten.
#[derive(Clone, Debug)]
pub struct Checkpointer {
    dirpath: PathBuf,
}

impl Checkpointer {
    pub fn new(dirpath: impl Into<PathBuf>) -> Self {
        Self {
            dirpath: dirpath.into(),
        }
    }

    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    pub fn path(&self, epoch: usize) -> PathBuf {
        self.dirpath.join(format!("{PREFIX}{epoch}.{EXTENSION}"))
    }

    /// Save every variable of `varmap` tagged with `epoch`.
    pub fn save(&self, varmap: &VarMap, epoch: usize) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dirpath).map_err(candle::Error::wrap)?;
        let path = self.path(epoch);
        varmap.save(&path)?;
        tracing::debug!(epoch, path = %path.display(), "saved snapshot");
        Ok(path)
    }

    /// Restore the variables of `varmap` from the snapshot of `epoch`.
    pub fn load(&self, varmap: &VarMap, epoch: usize) -> Result<()> {
        let path = self.path(epoch);
        if !path.exists() {
            candle::bail!("no snapshot for epoch {epoch} at {}", path.display());
        }
        // VarMap shares its variables between clones, so this updates the caller's vars.
        let mut varmap = varmap.clone();
        varmap.load(&path)?;
        tracing::info!(epoch, path = %path.display(), "restored snapshot");
        Ok(())
    }

    /// Highest epoch with a snapshot in the directory.
    pub fn latest(&self) -> Result<Option<usize>> {
        if !self.dirpath.exists() {
            return Ok(None);
        }
        let mut latest = None;
        for entry in std::fs::read_dir(&self.dirpath).map_err(candle::Error::wrap)? {
            let path = entry.map_err(candle::Error::wrap)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let epoch = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix(PREFIX))
                .and_then(|s| s.parse::<usize>().ok());
            if let Some(epoch) = epoch {
                latest = latest.max(Some(epoch));
            }
        }
        Ok(latest)
    }
}
