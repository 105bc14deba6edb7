//! The persisted setup of one fold.

use crate::collaborators::{FoldMetadata, ModelSpec};
use crate::config::TrainingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which split a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    Training,
    Validation,
    Testing,
}

impl std::fmt::Display for SplitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitKind::Training => write!(f, "training"),
            SplitKind::Validation => write!(f, "validation"),
            SplitKind::Testing => write!(f, "testing"),
        }
    }
}

/// Files of one split with their catalogue indexes and labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitMembers {
    pub files: Vec<PathBuf>,
    pub indexes: Vec<usize>,
    pub labels: Vec<String>,
}

impl SplitMembers {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub(crate) fn push(&mut self, file: PathBuf, index: usize, label: String) {
        self.files.push(file);
        self.indexes.push(index);
        self.labels.push(label);
    }
}

/// Split membership of every file used by a fold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetAssignments {
    pub training: SplitMembers,
    pub validation: SplitMembers,
    pub testing: SplitMembers,
}

impl DatasetAssignments {
    pub fn get(&self, kind: SplitKind) -> &SplitMembers {
        match kind {
            SplitKind::Training => &self.training,
            SplitKind::Validation => &self.validation,
            SplitKind::Testing => &self.testing,
        }
    }

    pub(crate) fn get_mut(&mut self, kind: SplitKind) -> &mut SplitMembers {
        match kind {
            SplitKind::Training => &mut self.training,
            SplitKind::Validation => &mut self.validation,
            SplitKind::Testing => &mut self.testing,
        }
    }
}

/// Serializable snapshot of a fold's training setup.
///
/// Written to the run log before training starts. A restarted fold whose
/// test and rotation subjects match adopts it instead of recomputing the
/// split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldStateRecord {
    pub fold_index: usize,
    pub config: TrainingConfig,
    pub testing_subject: String,
    /// Validation subject, or the test subject itself on the outer loop.
    pub rotation_subject: String,
    pub files: Vec<PathBuf>,
    pub folds: FoldMetadata,
    pub datasets: DatasetAssignments,
    pub model: ModelSpec,
    pub checkpoint_prefix: String,
    pub rank: usize,
    pub is_outer: bool,
    pub epoch_budget: usize,
    pub created_at: DateTime<Utc>,
}

impl FoldStateRecord {
    /// Whether this record describes the same fold as the given subjects.
    pub fn matches(&self, testing_subject: &str, rotation_subject: &str) -> bool {
        self.testing_subject == testing_subject && self.rotation_subject == rotation_subject
    }
}
