//! # cvsweep-core: nested cross-validation sweeps with resumable folds
//!
//! A rank-0 coordinator enumerates every (configuration, epoch budget, test
//! subject, validation subject) task of a sweep and hands them out on demand
//! to worker ranks. Each worker drives a fold through a small state machine
//! that persists its setup before training, checkpoints during training and
//! marks the fold finished in a run log afterwards, so an interrupted sweep
//! picks up where it stopped.

// Foundation
pub mod config;
pub mod error;
pub mod persistence;

// Sweep structure
pub mod partition;
pub mod task;

// Persisted state
pub mod run_log;
pub mod training;

// Execution
pub mod collaborators;
pub mod context;
pub mod fold;
pub mod scheduler;

// Re-exports
pub use config::{
    EpochBudget, Hyperparameters, LoopLevel, SweepSettings, TrainingConfig, load_settings,
    load_training_configs,
};
pub use context::WorkerContext;
pub use error::{Result, SweepError};
pub use fold::{FoldExecutor, FoldOutcome, FoldStateRecord};
pub use partition::{FoldPartitioner, SubjectPartitioner};
pub use run_log::RunLog;
pub use scheduler::{TaskScheduler, WorkerReport, enumerate_tasks, local_mesh, run_worker};
pub use task::{Task, job_name};
pub use training::CheckpointStore;
