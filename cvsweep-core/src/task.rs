//! Sweep tasks and the deterministic names derived from them.

use crate::config::{LoopLevel, TrainingConfig};
use std::sync::Arc;

/// One unit of work handed from the coordinator to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub config: Arc<TrainingConfig>,
    pub epoch_budget: usize,
    pub test_subject: String,
    /// `None` for outer-loop tasks.
    pub validation_subject: Option<String>,
    /// Position of this fold within its configuration's fold list.
    pub fold_index: usize,
}

impl Task {
    pub fn level(&self) -> LoopLevel {
        if self.validation_subject.is_some() {
            LoopLevel::Inner
        } else {
            LoopLevel::Outer
        }
    }

    /// Validation subject, or the test subject itself on the outer loop.
    pub fn rotation_subject(&self) -> &str {
        self.validation_subject
            .as_deref()
            .unwrap_or(&self.test_subject)
    }

    pub fn job_name(&self) -> String {
        job_name(
            &self.config.job_name,
            &self.test_subject,
            self.validation_subject.as_deref(),
            self.level(),
        )
    }

    pub fn checkpoint_prefix(&self) -> String {
        checkpoint_prefix(
            &self.config.job_name,
            &self.test_subject,
            self.rotation_subject(),
            &self.config.selected_model_name,
            self.level(),
        )
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.validation_subject {
            Some(v) => write!(
                f,
                "({}, {}, test={}, val={})",
                self.config.job_name, self.epoch_budget, self.test_subject, v
            ),
            None => write!(
                f,
                "({}, {}, test={})",
                self.config.job_name, self.epoch_budget, self.test_subject
            ),
        }
    }
}

/// Key of a fold's run log entry.
///
/// Outer: `{base}_test_{T}`. Inner: `{base}_test_{T}_sub_{V}`.
pub fn job_name(
    base: &str,
    test_subject: &str,
    validation_subject: Option<&str>,
    level: LoopLevel,
) -> String {
    match (level, validation_subject) {
        (LoopLevel::Inner, Some(v)) => format!("{base}_test_{test_subject}_sub_{v}"),
        _ => format!("{base}_test_{test_subject}"),
    }
}

/// Prefix of every checkpoint file written for a fold.
///
/// Embeds the config, test and validation subjects and model name so folds
/// never share checkpoints.
pub fn checkpoint_prefix(
    base: &str,
    test_subject: &str,
    rotation_subject: &str,
    model_name: &str,
    level: LoopLevel,
) -> String {
    match level {
        LoopLevel::Outer => format!("{base}_test_{test_subject}_config_{model_name}"),
        LoopLevel::Inner => {
            format!("{base}_test_{test_subject}_val_{rotation_subject}_config_{model_name}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::training_config;
    use std::path::Path;

    fn task(validation: Option<&str>) -> Task {
        Task {
            config: Arc::new(training_config("c1", Path::new("/tmp/out"))),
            epoch_budget: 5,
            test_subject: "A".into(),
            validation_subject: validation.map(String::from),
            fold_index: 0,
        }
    }

    #[test]
    fn test_job_names() {
        assert_eq!(task(None).job_name(), "c1_test_A");
        assert_eq!(task(Some("B")).job_name(), "c1_test_A_sub_B");
    }

    #[test]
    fn test_outer_job_name_ignores_validation() {
        assert_eq!(
            job_name("c1", "A", Some("B"), LoopLevel::Outer),
            job_name("c1", "A", None, LoopLevel::Outer)
        );
    }

    #[test]
    fn test_checkpoint_prefixes() {
        assert_eq!(task(None).checkpoint_prefix(), "c1_test_A_config_resnet");
        assert_eq!(
            task(Some("C")).checkpoint_prefix(),
            "c1_test_A_val_C_config_resnet"
        );
    }

    #[test]
    fn test_rotation_subject_defaults_to_test_subject() {
        assert_eq!(task(None).rotation_subject(), "A");
        assert_eq!(task(Some("B")).rotation_subject(), "B");
        assert_eq!(task(None).level(), LoopLevel::Outer);
    }
}
