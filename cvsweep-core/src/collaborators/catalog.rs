//! Catalogue image files from a data directory by file-name convention.

use super::{DatasetCatalog, FileCatalog, FoldMetadata};
use crate::config::TrainingConfig;
use crate::error::{Result, SweepError};
use std::path::Path;
use walkdir::WalkDir;

/// Walks `data_path` and reads subject and label from `_`-separated file
/// name components, e.g. `subject_label_0001.png`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryCatalog;

impl DatasetCatalog for DirectoryCatalog {
    fn catalog(&self, config: &TrainingConfig) -> Result<FileCatalog> {
        let root = &config.data_path;
        if !root.is_dir() {
            return Err(SweepError::dataset(format!(
                "data path {} is not a directory",
                root.display()
            )));
        }
        let extension = config.file_extension.trim_start_matches('.');

        let mut paths: Vec<_> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(extension))
            })
            .collect();
        paths.sort();

        let mut catalog = FileCatalog {
            folds: FoldMetadata {
                label_position: config.label_position,
                ..FoldMetadata::default()
            },
            ..FileCatalog::default()
        };

        for path in paths {
            let Some((subject, label)) =
                name_components(&path, config.subject_position, config.label_position)
            else {
                tracing::warn!(path = %path.display(), "File name lacks subject or label, skipping");
                continue;
            };

            let summary = catalog.folds.subjects.entry(subject.clone()).or_default();
            summary.file_count += 1;
            *summary.label_counts.entry(label.clone()).or_default() += 1;

            catalog.files.push(path);
            catalog.subjects.push(subject);
            catalog.labels.push(label);
        }

        tracing::debug!(
            job_name = %config.job_name,
            files = catalog.files.len(),
            subjects = catalog.folds.subjects.len(),
            "Catalogued dataset"
        );
        Ok(catalog)
    }
}

/// Subject and label components of a file stem.
pub fn name_components(
    path: &Path,
    subject_position: usize,
    label_position: usize,
) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.split('_').collect();
    let subject = parts.get(subject_position)?;
    let label = parts.get(label_position)?;
    Some((subject.to_string(), label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::training_config;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_catalog_reads_subjects_and_labels() {
        let dir = TempDir::new().unwrap();
        let mut config = training_config("c1", dir.path());
        let data = config.data_path.clone();
        std::fs::create_dir_all(data.join("nested")).unwrap();
        for name in ["B_sick_2.png", "A_healthy_1.png", "nested/A_sick_3.png", "notes.txt", "bad.png"] {
            std::fs::write(data.join(name), [0u8; 4]).unwrap();
        }
        config.file_extension = ".png".into();

        let catalog = DirectoryCatalog.catalog(&config).unwrap();
        assert_eq!(catalog.subjects, vec!["A", "B", "A"]);
        assert_eq!(catalog.labels, vec!["healthy", "sick", "sick"]);

        let a = &catalog.folds.subjects["A"];
        assert_eq!(a.file_count, 2);
        assert_eq!(a.label_counts.get("sick"), Some(&1));
        assert_eq!(catalog.folds.label_position, 1);
    }

    #[test]
    fn test_missing_data_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = training_config("c1", dir.path());
        assert!(DirectoryCatalog.catalog(&config).is_err());
    }

    #[test]
    fn test_name_components_custom_positions() {
        let path = Path::new("/data/scan_sick_S07.png");
        assert_eq!(
            name_components(path, 2, 1),
            Some(("S07".to_string(), "sick".to_string()))
        );
        assert_eq!(name_components(path, 5, 1), None);
    }
}
