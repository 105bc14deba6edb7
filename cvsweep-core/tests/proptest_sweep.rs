//! Property-based tests for task enumeration and naming.

use proptest::prelude::*;

use cvsweep_core::config::{EpochBudget, Hyperparameters, LoopLevel, TrainingConfig};
use cvsweep_core::partition::SubjectPartitioner;
use cvsweep_core::task::{checkpoint_prefix, job_name};
use cvsweep_core::{Task, enumerate_tasks};
use std::collections::BTreeSet;
use std::path::PathBuf;

fn config(job: &str, subjects: &[String], test: &[String], shuffle: bool, seed: u64) -> TrainingConfig {
    TrainingConfig {
        job_name: job.to_string(),
        selected_model_name: "m".to_string(),
        subject_list: subjects.to_vec(),
        test_subjects: test.to_vec(),
        validation_subjects: None,
        shuffle_the_folds: shuffle,
        seed,
        hyperparameters: Hyperparameters {
            epochs: EpochBudget::Fixed(3),
            patience: 2,
            batch_size: 4,
            channels: 1,
            do_cropping: false,
            cropping_position: [0, 0],
            learning_rate: 0.001,
        },
        target_height: 8,
        target_width: 8,
        class_names: vec!["a".into(), "b".into()],
        output_path: PathBuf::from("out"),
        data_path: PathBuf::from("data"),
        file_extension: "png".to_string(),
        subject_position: 0,
        label_position: 1,
        k_epoch_checkpoint_frequency: 1,
    }
}

fn subject_set() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[A-H]", 2..6).prop_map(|s| s.into_iter().collect())
}

fn keys(tasks: &[Task]) -> Vec<(String, usize, String, Option<String>)> {
    tasks
        .iter()
        .map(|t| {
            (
                t.config.job_name.clone(),
                t.epoch_budget,
                t.test_subject.clone(),
                t.validation_subject.clone(),
            )
        })
        .collect()
}

// --- Task enumeration properties ---

proptest! {
    #[test]
    fn enumerate_tasks_is_deterministic(
        subjects in subject_set(),
        shuffle in any::<bool>(),
        seed in any::<u64>(),
        inner in any::<bool>(),
    ) {
        let test = subjects[..1].to_vec();
        let configs = vec![
            config("c1", &subjects, &test, shuffle, seed),
            config("c2", &subjects, &subjects, shuffle, seed),
        ];
        let level = if inner { LoopLevel::Inner } else { LoopLevel::Outer };

        let first = enumerate_tasks(&configs, 3, level, &SubjectPartitioner).unwrap();
        let second = enumerate_tasks(&configs, 3, level, &SubjectPartitioner).unwrap();
        prop_assert_eq!(keys(&first), keys(&second));
    }

    #[test]
    fn inner_tasks_have_unique_job_names(subjects in subject_set()) {
        let configs = vec![config("c1", &subjects, &subjects, true, 1)];
        let tasks = enumerate_tasks(&configs, 2, LoopLevel::Inner, &SubjectPartitioner).unwrap();

        let n = subjects.len();
        prop_assert_eq!(tasks.len(), n * (n - 1));
        let names: BTreeSet<String> = tasks.iter().map(Task::job_name).collect();
        prop_assert_eq!(names.len(), tasks.len());
        prop_assert!(tasks.iter().all(|t| t.validation_subject.as_deref() != Some(t.test_subject.as_str())));
    }

    #[test]
    fn outer_tasks_cover_each_test_subject_once(subjects in subject_set()) {
        let configs = vec![config("c1", &subjects, &subjects, false, 1)];
        let tasks = enumerate_tasks(&configs, 2, LoopLevel::Outer, &SubjectPartitioner).unwrap();
        let tested: Vec<&str> = tasks.iter().map(|t| t.test_subject.as_str()).collect();
        let expected: Vec<&str> = subjects.iter().map(String::as_str).collect();
        prop_assert_eq!(tested, expected);
        prop_assert!(tasks.iter().all(|t| t.validation_subject.is_none()));
    }
}

// --- Naming properties ---

proptest! {
    #[test]
    fn job_name_is_pure(
        base in "[a-z][a-z0-9]{0,8}",
        test in "[A-Z][0-9]{0,2}",
        validation in proptest::option::of("[A-Z][0-9]{0,2}"),
    ) {
        let expected_stem = format!("{base}_test_{test}");
        for level in [LoopLevel::Outer, LoopLevel::Inner] {
            let a = job_name(&base, &test, validation.as_deref(), level);
            let b = job_name(&base, &test, validation.as_deref(), level);
            prop_assert_eq!(&a, &b);
            prop_assert!(a.starts_with(&expected_stem));
        }
        if let Some(v) = &validation {
            prop_assert_eq!(
                job_name(&base, &test, Some(v), LoopLevel::Inner),
                format!("{base}_test_{test}_sub_{v}")
            );
        }
    }

    #[test]
    fn checkpoint_prefixes_of_distinct_folds_differ(
        base in "[a-z]{1,6}",
        test in "[A-Z]{1,3}",
        v1 in "[A-Z]{1,3}",
        v2 in "[A-Z]{1,3}",
    ) {
        prop_assume!(v1 != v2);
        let p1 = checkpoint_prefix(&base, &test, &v1, "m", LoopLevel::Inner);
        let p2 = checkpoint_prefix(&base, &test, &v2, "m", LoopLevel::Inner);
        prop_assert_ne!(p1, p2);
    }
}
