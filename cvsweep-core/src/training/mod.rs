//! Training infrastructure: checkpoints, callbacks, history.

pub mod callbacks;
pub mod checkpoint;
pub mod history;

pub use callbacks::{CallbackAction, CheckpointCallback, EarlyStoppingCallback, EpochCallback};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use history::{EpochMetrics, TrainingHistory};
