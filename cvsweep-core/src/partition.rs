//! Fold pairing: which (test, validation) subject pairs a configuration trains.

use crate::config::{EpochBudget, LoopLevel, TrainingConfig};
use crate::error::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// One fold produced by a partitioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPair {
    pub epoch_budget: usize,
    pub test_subject: String,
    pub validation_subject: Option<String>,
}

/// Inputs to [`FoldPartitioner::generate_pairs`].
#[derive(Debug, Clone)]
pub struct PairRequest<'a> {
    pub test_subjects: &'a [String],
    /// Ignored on the outer loop.
    pub validation_subjects: Option<&'a [String]>,
    pub subject_list: &'a [String],
    pub do_shuffle: bool,
    pub epochs: &'a EpochBudget,
    pub seed: u64,
    pub level: LoopLevel,
}

impl<'a> PairRequest<'a> {
    pub fn for_config(config: &'a TrainingConfig, level: LoopLevel) -> Self {
        Self {
            test_subjects: &config.test_subjects,
            validation_subjects: match level {
                LoopLevel::Outer => None,
                LoopLevel::Inner => Some(config.inner_validation_subjects()),
            },
            subject_list: &config.subject_list,
            do_shuffle: config.shuffle_the_folds,
            epochs: &config.hyperparameters.epochs,
            seed: config.seed,
            level,
        }
    }
}

/// Produces the fold pairs of one configuration.
///
/// Implementations must be deterministic for a given request so a restarted
/// sweep reproduces the earlier fold assignment.
pub trait FoldPartitioner: Send + Sync {
    fn generate_pairs(&self, request: &PairRequest<'_>) -> Result<Vec<FoldPair>>;
}

/// Pairs every test subject with every other validation subject, optionally
/// shuffled with a seeded generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectPartitioner;

impl FoldPartitioner for SubjectPartitioner {
    fn generate_pairs(&self, request: &PairRequest<'_>) -> Result<Vec<FoldPair>> {
        let mut pairs = Vec::new();
        for test_subject in request.test_subjects {
            let epoch_budget = request.epochs.for_subject(test_subject)?;
            match (request.level, request.validation_subjects) {
                (LoopLevel::Inner, Some(validation_subjects)) => {
                    for validation_subject in validation_subjects {
                        if validation_subject == test_subject {
                            continue;
                        }
                        pairs.push(FoldPair {
                            epoch_budget,
                            test_subject: test_subject.clone(),
                            validation_subject: Some(validation_subject.clone()),
                        });
                    }
                }
                _ => pairs.push(FoldPair {
                    epoch_budget,
                    test_subject: test_subject.clone(),
                    validation_subject: None,
                }),
            }
        }

        if request.do_shuffle {
            let mut rng = StdRng::seed_from_u64(request.seed);
            pairs.shuffle(&mut rng);
        }

        tracing::debug!(
            pairs = pairs.len(),
            level = %request.level,
            shuffled = request.do_shuffle,
            "Generated fold pairs"
        );
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn subjects(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_outer_pairs() {
        let test = subjects(&["A", "B"]);
        let all = subjects(&["A", "B", "C"]);
        let epochs = EpochBudget::Fixed(10);
        let request = PairRequest {
            test_subjects: &test,
            validation_subjects: None,
            subject_list: &all,
            do_shuffle: false,
            epochs: &epochs,
            seed: 1,
            level: LoopLevel::Outer,
        };

        let pairs = SubjectPartitioner.generate_pairs(&request).unwrap();
        assert_eq!(
            pairs,
            vec![
                FoldPair {
                    epoch_budget: 10,
                    test_subject: "A".into(),
                    validation_subject: None
                },
                FoldPair {
                    epoch_budget: 10,
                    test_subject: "B".into(),
                    validation_subject: None
                },
            ]
        );
    }

    #[test]
    fn test_inner_pairs_skip_test_subject() {
        let test = subjects(&["A"]);
        let validation = subjects(&["A", "B", "C"]);
        let all = subjects(&["A", "B", "C", "D"]);
        let epochs = EpochBudget::Fixed(4);
        let request = PairRequest {
            test_subjects: &test,
            validation_subjects: Some(&validation),
            subject_list: &all,
            do_shuffle: false,
            epochs: &epochs,
            seed: 1,
            level: LoopLevel::Inner,
        };

        let pairs = SubjectPartitioner.generate_pairs(&request).unwrap();
        let names: Vec<_> = pairs
            .iter()
            .map(|p| p.validation_subject.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_per_subject_budget() {
        let test = subjects(&["A", "B"]);
        let mut map = BTreeMap::new();
        map.insert("A".to_string(), 3);
        map.insert("B".to_string(), 8);
        let epochs = EpochBudget::PerSubject(map);
        let request = PairRequest {
            test_subjects: &test,
            validation_subjects: None,
            subject_list: &test,
            do_shuffle: false,
            epochs: &epochs,
            seed: 1,
            level: LoopLevel::Outer,
        };

        let budgets: Vec<_> = SubjectPartitioner
            .generate_pairs(&request)
            .unwrap()
            .iter()
            .map(|p| p.epoch_budget)
            .collect();
        assert_eq!(budgets, vec![3, 8]);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let test = subjects(&["A", "B", "C", "D", "E", "F"]);
        let epochs = EpochBudget::Fixed(1);
        let request = |seed| PairRequest {
            test_subjects: &test,
            validation_subjects: Some(&test),
            subject_list: &test,
            do_shuffle: true,
            epochs: &epochs,
            seed,
            level: LoopLevel::Inner,
        };

        let first = SubjectPartitioner.generate_pairs(&request(7)).unwrap();
        let second = SubjectPartitioner.generate_pairs(&request(7)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 30);
    }
}
