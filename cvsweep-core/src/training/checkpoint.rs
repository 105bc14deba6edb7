//! Checkpoint storage for fold training.
//!
//! One file per `(prefix, epoch)` at `{dir}/{prefix}_epoch{N}`. Prefixes embed
//! the config, test/validation subject and model name, so ranks working on
//! different folds never write the same file.

use crate::collaborators::ModelWeights;
use crate::error::{Result, SweepError};
use crate::persistence;
use crate::training::history::TrainingHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A training checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub prefix: String,
    pub epoch: usize,
    pub weights: ModelWeights,
    /// SHA-256 of `weights`, checked on load.
    pub hash: String,
    /// Full history up to and including `epoch`.
    pub history: TrainingHistory,
    pub created_at: DateTime<Utc>,
}

/// File-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    keep_last: Option<usize>,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            keep_last: None,
        }
    }

    /// Prune to the newest `keep` checkpoints of a prefix after every save.
    pub fn with_retention(mut self, keep: Option<usize>) -> Self {
        self.keep_last = keep;
        self
    }

    pub fn path(&self, prefix: &str, epoch: usize) -> PathBuf {
        self.dir.join(format!("{prefix}_epoch{epoch}"))
    }

    /// Save the weights reached after `epoch`.
    pub fn save(
        &self,
        prefix: &str,
        epoch: usize,
        weights: &ModelWeights,
        history: &TrainingHistory,
    ) -> Result<PathBuf> {
        let checkpoint = Checkpoint {
            prefix: prefix.to_string(),
            epoch,
            weights: weights.clone(),
            hash: weights.digest(),
            history: history.clone(),
            created_at: Utc::now(),
        };
        let path = self.path(prefix, epoch);
        persistence::atomic_write_json(&path, &checkpoint)?;
        tracing::debug!(prefix, epoch, path = %path.display(), "Saved checkpoint");

        if let Some(keep) = self.keep_last {
            self.prune(prefix, keep)?;
        }
        Ok(path)
    }

    /// Epochs with a checkpoint for `prefix`, ascending.
    pub fn list_epochs(&self, prefix: &str) -> Result<Vec<usize>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let marker = format!("{prefix}_epoch");
        let mut epochs: Vec<usize> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_prefix(&marker)?.parse().ok()
            })
            .collect();
        epochs.sort_unstable();
        Ok(epochs)
    }

    /// Load one checkpoint, verifying its weight digest.
    pub fn load(&self, prefix: &str, epoch: usize) -> Result<Checkpoint> {
        let path = self.path(prefix, epoch);
        let checkpoint: Checkpoint = persistence::load_json(&path)
            .map_err(|e| SweepError::checkpoint(format!("{}: {e}", path.display())))?
            .ok_or_else(|| SweepError::checkpoint(format!("{} not found", path.display())))?;

        if checkpoint.epoch != epoch || checkpoint.weights.digest() != checkpoint.hash {
            return Err(SweepError::checkpoint(format!(
                "{} failed integrity check",
                path.display()
            )));
        }
        Ok(checkpoint)
    }

    /// The newest readable checkpoint of `prefix` with epoch ≤ `max_epoch`.
    ///
    /// Unreadable or corrupt checkpoints are skipped in favour of the next
    /// lower epoch.
    pub fn load_most_recent(&self, prefix: &str, max_epoch: usize) -> Result<Option<Checkpoint>> {
        let epochs = self.list_epochs(prefix)?;
        for epoch in epochs.into_iter().rev().filter(|&e| e <= max_epoch) {
            match self.load(prefix, epoch) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => {
                    tracing::warn!(prefix, epoch, error = %e, "Skipping unusable checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Remove all but the newest `keep` checkpoints of `prefix`.
    pub fn prune(&self, prefix: &str, keep: usize) -> Result<usize> {
        let epochs = self.list_epochs(prefix)?;
        let excess = epochs.len().saturating_sub(keep);
        for &epoch in &epochs[..excess] {
            std::fs::remove_file(self.path(prefix, epoch))?;
        }
        Ok(excess)
    }
}
