//! Error types for the cvsweep core library.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sweep operations.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("No training configurations found in {0}")]
    NoConfigurations(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Run log error for '{job_name}': {message}")]
    RunLog { job_name: String, message: String },

    #[error("Failed to lock {0}: {1}")]
    Lock(PathBuf, std::io::Error),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SweepError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn run_log(job_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RunLog {
            job_name: job_name.into(),
            message: msg.into(),
        }
    }

    pub fn results(msg: impl Into<String>) -> Self {
        Self::Results(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether the error should stop the whole sweep rather than a single fold.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoConfigurations(_) | Self::Figment(_) | Self::Transport(_)
        )
    }
}

pub type Result<T, E = SweepError> = std::result::Result<T, E>;
