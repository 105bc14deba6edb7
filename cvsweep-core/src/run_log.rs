//! Per-job run log: the coarse "is this fold done?" record.
//!
//! Each job name owns one JSON object at `{output_path}/logs/{job_name}.log`.
//! Writes merge fields into that object. Ranks that may race on the same job
//! name pass `use_lock`, which holds an exclusive advisory lock on a sidecar
//! `.lock` file for the whole read-modify-write.

use crate::error::{Result, SweepError};
use crate::fold::FoldStateRecord;
use crate::persistence;
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Field set once a fold's results are written.
pub const IS_FINISHED: &str = "is_finished";
/// Field holding the persisted [`FoldStateRecord`].
pub const FOLD_INFO: &str = "fold_info";

/// File-backed run log rooted at one configuration's output path.
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn new(output_path: &Path) -> Self {
        Self {
            dir: output_path.join("logs"),
        }
    }

    pub fn path(&self, job_name: &str) -> PathBuf {
        self.dir.join(format!("{job_name}.log"))
    }

    fn lock_path(&self, job_name: &str) -> PathBuf {
        self.dir.join(format!("{job_name}.log.lock"))
    }

    /// Read the requested keys of a job's record.
    ///
    /// Returns `None` when the job has no record; keys missing from an
    /// existing record are simply absent from the returned map.
    pub fn read(&self, job_name: &str, keys: &[&str]) -> Result<Option<Map<String, Value>>> {
        let Some(record) = self.load(job_name)? else {
            return Ok(None);
        };
        let selected = record
            .into_iter()
            .filter(|(k, _)| keys.contains(&k.as_str()))
            .collect();
        Ok(Some(selected))
    }

    /// Merge `fields` into a job's record, creating it if absent.
    pub fn write(&self, job_name: &str, fields: Map<String, Value>, use_lock: bool) -> Result<()> {
        let _guard = if use_lock {
            Some(LockGuard::acquire(&self.lock_path(job_name))?)
        } else {
            None
        };

        let mut record = self.load(job_name)?.unwrap_or_default();
        record.extend(fields);
        persistence::atomic_write_json(&self.path(job_name), &Value::Object(record))?;
        Ok(())
    }

    pub fn is_finished(&self, job_name: &str) -> Result<bool> {
        let finished = self
            .read(job_name, &[IS_FINISHED])?
            .and_then(|fields| fields.get(IS_FINISHED).and_then(Value::as_bool))
            .unwrap_or(false);
        Ok(finished)
    }

    pub fn mark_finished(&self, job_name: &str) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(IS_FINISHED.to_string(), Value::Bool(true));
        self.write(job_name, fields, true)
    }

    /// Load the fold setup persisted for a job, if any.
    pub fn load_fold_record(&self, job_name: &str) -> Result<Option<FoldStateRecord>> {
        let Some(mut fields) = self.read(job_name, &[FOLD_INFO])? else {
            return Ok(None);
        };
        match fields.remove(FOLD_INFO) {
            Some(value) => Ok(Some(serde_json::from_value(value).map_err(|e| {
                SweepError::run_log(job_name, format!("unreadable fold record: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub fn save_fold_record(
        &self,
        job_name: &str,
        record: &FoldStateRecord,
        use_lock: bool,
    ) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(FOLD_INFO.to_string(), serde_json::to_value(record)?);
        self.write(job_name, fields, use_lock)
    }

    /// Load a job's record. A record that does not parse as a JSON object is
    /// treated as absent so the next write replaces it.
    fn load(&self, job_name: &str) -> Result<Option<Map<String, Value>>> {
        let path = self.path(job_name);
        let value: Option<Value> = match persistence::load_json(&path) {
            Ok(value) => value,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(job_name, path = %path.display(), error = %e, "Ignoring unreadable run log");
                return Ok(None);
            }
            Err(e) => return Err(SweepError::run_log(job_name, e.to_string())),
        };
        match value {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => {
                tracing::warn!(job_name, found = %other, "Ignoring run log that is not an object");
                Ok(None)
            }
        }
    }
}

/// Exclusive advisory lock released on drop.
struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        FileExt::lock_exclusive(&file).map_err(|e| SweepError::Lock(path.to_path_buf(), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release run log lock");
        }
    }
}
