//! Split assignment and dataset materialization.

use super::record::{DatasetAssignments, SplitKind, SplitMembers};
use crate::collaborators::{Batch, Dataset, FileCatalog, ImageParams, ImageReader};
use crate::error::Result;

/// Why a fold could not be trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyTraining,
    EmptyValidation,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::EmptyTraining => write!(f, "no files in the training dataset"),
            SkipReason::EmptyValidation => write!(f, "no files in the validation dataset"),
        }
    }
}

/// Assign every catalogued file to a split.
///
/// `rotation_subject` is `None` on the outer loop, where there is no
/// validation bucket. Subjects outside `subject_list` that are neither the
/// test nor the rotation subject are excluded.
pub fn assign_splits(
    catalog: &FileCatalog,
    subject_list: &[String],
    testing_subject: &str,
    rotation_subject: Option<&str>,
) -> DatasetAssignments {
    let mut assignments = DatasetAssignments::default();

    for (index, file) in catalog.files.iter().enumerate() {
        let subject = catalog.subjects[index].as_str();
        let kind = if subject == testing_subject {
            SplitKind::Testing
        } else if rotation_subject == Some(subject) {
            SplitKind::Validation
        } else if subject_list.iter().any(|s| s == subject) {
            SplitKind::Training
        } else {
            continue;
        };

        assignments
            .get_mut(kind)
            .push(file.clone(), index, catalog.labels[index].clone());
    }

    assignments
}

/// The degenerate-fold guard: training must have files, and so must
/// validation on the inner loop.
pub fn check_trainable(assignments: &DatasetAssignments, is_outer: bool) -> Option<SkipReason> {
    if assignments.training.is_empty() {
        Some(SkipReason::EmptyTraining)
    } else if !is_outer && assignments.validation.is_empty() {
        Some(SkipReason::EmptyValidation)
    } else {
        None
    }
}

/// Materialized splits of a fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldDatasets {
    pub training: Dataset,
    pub validation: Option<Dataset>,
    pub testing: Option<Dataset>,
}

impl FoldDatasets {
    /// Decode every assigned file. Empty validation/testing splits become `None`.
    pub fn build(
        assignments: &DatasetAssignments,
        reader: &dyn ImageReader,
        params: &ImageParams,
        batch_size: usize,
    ) -> Result<Self> {
        let optional = |kind: SplitKind| -> Result<Option<Dataset>> {
            let members = assignments.get(kind);
            if members.is_empty() {
                return Ok(None);
            }
            materialize(kind, members, reader, params, batch_size).map(Some)
        };

        Ok(Self {
            training: materialize(
                SplitKind::Training,
                &assignments.training,
                reader,
                params,
                batch_size,
            )?,
            validation: optional(SplitKind::Validation)?,
            testing: optional(SplitKind::Testing)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        std::iter::once(&self.training)
            .chain(self.validation.as_ref())
            .chain(self.testing.as_ref())
    }
}

/// Whether the trailing partial batch of a split is dropped.
///
/// Only the training split drops it, only when it holds fewer than half a
/// batch, and never when it is the only batch.
pub fn drop_remainder(kind: SplitKind, len: usize, batch_size: usize) -> bool {
    let residual = len % batch_size;
    kind == SplitKind::Training && residual > 0 && len >= batch_size && residual * 2 < batch_size
}

/// Decode and batch one split, preserving file order.
pub fn materialize(
    kind: SplitKind,
    members: &SplitMembers,
    reader: &dyn ImageReader,
    params: &ImageParams,
    batch_size: usize,
) -> Result<Dataset> {
    let keep = if drop_remainder(kind, members.len(), batch_size) {
        members.len() - members.len() % batch_size
    } else {
        members.len()
    };
    tracing::debug!(
        split = %kind,
        files = members.len(),
        kept = keep,
        batch_size,
        "Materializing dataset"
    );

    let files = members.files[..keep].to_vec();
    let mut batches = Vec::with_capacity(keep.div_ceil(batch_size));
    for chunk in files.chunks(batch_size) {
        let mut batch = Batch::default();
        for path in chunk {
            let (image, label) = reader.parse(path, params)?;
            batch.images.push(image);
            batch.labels.push(label);
        }
        batches.push(batch);
    }

    Ok(Dataset {
        split: kind,
        files,
        batches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ImageTensor;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};

    fn catalog(entries: &[(&str, &str)]) -> FileCatalog {
        FileCatalog {
            files: entries
                .iter()
                .enumerate()
                .map(|(i, (s, l))| PathBuf::from(format!("{s}_{l}_{i}.png")))
                .collect(),
            subjects: entries.iter().map(|(s, _)| s.to_string()).collect(),
            labels: entries.iter().map(|(_, l)| l.to_string()).collect(),
            folds: Default::default(),
        }
    }

    fn subjects(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn split_subjects(members: &SplitMembers, cat: &FileCatalog) -> Vec<String> {
        members
            .indexes
            .iter()
            .map(|&i| cat.subjects[i].clone())
            .collect()
    }

    #[test]
    fn test_inner_assignment_for_each_rotation() {
        let cat = catalog(&[("A", "x"), ("B", "x"), ("C", "y"), ("D", "y"), ("E", "x")]);
        let list = subjects(&["A", "B", "C", "D"]);

        let b_fold = assign_splits(&cat, &list, "A", Some("B"));
        assert_eq!(split_subjects(&b_fold.testing, &cat), vec!["A"]);
        assert_eq!(split_subjects(&b_fold.validation, &cat), vec!["B"]);
        assert_eq!(split_subjects(&b_fold.training, &cat), vec!["C", "D"]);

        let c_fold = assign_splits(&cat, &list, "A", Some("C"));
        assert_eq!(split_subjects(&c_fold.validation, &cat), vec!["C"]);
        assert_eq!(split_subjects(&c_fold.training, &cat), vec!["B", "D"]);
    }

    #[test]
    fn test_outer_assignment_has_no_validation() {
        let cat = catalog(&[("A", "x"), ("B", "x"), ("C", "y"), ("Z", "y")]);
        let list = subjects(&["A", "B", "C"]);

        let fold = assign_splits(&cat, &list, "A", None);
        assert!(fold.validation.is_empty());
        assert_eq!(split_subjects(&fold.training, &cat), vec!["B", "C"]);
        assert_eq!(fold.testing.indexes, vec![0]);
        assert_eq!(check_trainable(&fold, true), None);
    }

    #[test]
    fn test_degenerate_folds() {
        let cat = catalog(&[("A", "x"), ("B", "x")]);
        let only_test = assign_splits(&cat, &subjects(&["A"]), "A", None);
        assert_eq!(
            check_trainable(&only_test, true),
            Some(SkipReason::EmptyTraining)
        );

        let no_val = assign_splits(&cat, &subjects(&["A", "B"]), "A", Some("Q"));
        assert_eq!(
            check_trainable(&no_val, false),
            Some(SkipReason::EmptyValidation)
        );
    }

    #[test]
    fn test_drop_remainder_policy() {
        assert!(drop_remainder(SplitKind::Training, 33, 32));
        assert!(!drop_remainder(SplitKind::Training, 50, 32));
        assert!(!drop_remainder(SplitKind::Training, 64, 32));
        assert!(!drop_remainder(SplitKind::Training, 3, 32));
        assert!(!drop_remainder(SplitKind::Testing, 33, 32));
    }

    struct LabelReader;

    impl ImageReader for LabelReader {
        fn parse(&self, path: &Path, _params: &ImageParams) -> Result<(ImageTensor, usize)> {
            let label = usize::from(path.to_string_lossy().contains("_y_"));
            Ok((
                ImageTensor {
                    height: 1,
                    width: 1,
                    channels: 1,
                    data: vec![0.0],
                },
                label,
            ))
        }
    }

    #[test]
    fn test_materialize_preserves_order_and_batches() {
        let cat = catalog(&[("B", "x"), ("B", "y"), ("C", "y"), ("C", "x"), ("C", "y")]);
        let fold = assign_splits(&cat, &subjects(&["B", "C"]), "A", None);
        let params = ImageParams {
            class_names: subjects(&["x", "y"]),
            channels: 1,
            do_crop: false,
            crop_offset_height: 0,
            crop_offset_width: 0,
            target_height: 1,
            target_width: 1,
            label_position: 1,
        };

        let ds = materialize(SplitKind::Training, &fold.training, &LabelReader, &params, 2).unwrap();
        assert_eq!(ds.batches.len(), 3);
        assert_eq!(ds.labels().collect::<Vec<_>>(), vec![0, 1, 1, 0, 1]);
        assert_eq!(ds.files, cat.files);
    }
}
