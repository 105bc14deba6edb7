//! Fold execution: persisted setup, split assignment and the per-fold state
//! machine.

pub mod datasets;
pub mod executor;
pub mod record;

pub use datasets::{FoldDatasets, SkipReason, assign_splits, check_trainable};
pub use executor::{FoldExecutor, FoldOutcome, FoldPhase, FoldSummary};
pub use record::{DatasetAssignments, FoldStateRecord, SplitKind, SplitMembers};
