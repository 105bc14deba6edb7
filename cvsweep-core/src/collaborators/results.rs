//! JSON results writer.

use super::{FoldReport, ResultsWriter};
use crate::error::{Result, SweepError};
use crate::persistence;
use crate::training::TrainingHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Predictions of one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitResults {
    pub split: String,
    pub files: Vec<PathBuf>,
    pub true_labels: Vec<usize>,
    pub predicted_labels: Vec<usize>,
    pub scores: Vec<Vec<f32>>,
    pub accuracy: f64,
}

/// The document written for one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResults {
    pub job_name: String,
    pub model_name: String,
    pub model_type: String,
    pub test_subject: String,
    pub validation_subject: Option<String>,
    pub fold_index: usize,
    pub rank: usize,
    pub is_outer: bool,
    pub class_names: Vec<String>,
    pub elapsed_seconds: Option<f64>,
    pub history: TrainingHistory,
    pub splits: Vec<SplitResults>,
    pub written_at: DateTime<Utc>,
}

/// Writes `{output_dir}/{job_name}/fold_{index}.json` per fold.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResultsWriter;

impl JsonResultsWriter {
    pub fn path(output_dir: &Path, job_name: &str, fold_index: usize) -> PathBuf {
        output_dir.join(job_name).join(format!("fold_{fold_index}.json"))
    }
}

impl ResultsWriter for JsonResultsWriter {
    fn write(&self, report: &FoldReport<'_>) -> Result<()> {
        let mut splits = Vec::new();
        for dataset in report.datasets.iter() {
            let predictions = report.model.predict(dataset)?;
            if predictions.len() != dataset.len() {
                return Err(SweepError::results(format!(
                    "{} predictions for {} {} images",
                    predictions.len(),
                    dataset.len(),
                    dataset.split
                )));
            }
            let correct = predictions.iter().filter(|p| p.label == p.predicted).count();
            splits.push(SplitResults {
                split: dataset.split.to_string(),
                files: dataset.files.clone(),
                true_labels: predictions.iter().map(|p| p.label).collect(),
                predicted_labels: predictions.iter().map(|p| p.predicted).collect(),
                scores: predictions.into_iter().map(|p| p.scores).collect(),
                accuracy: if dataset.is_empty() {
                    0.0
                } else {
                    correct as f64 / dataset.len() as f64
                },
            });
        }

        let results = FoldResults {
            job_name: report.job_name.to_string(),
            model_name: report.model_name.to_string(),
            model_type: report.model.model_type().to_string(),
            test_subject: report.test_subject.to_string(),
            validation_subject: report.validation_subject.map(str::to_string),
            fold_index: report.fold_index,
            rank: report.rank,
            is_outer: report.is_outer,
            class_names: report.class_names.to_vec(),
            elapsed_seconds: report.elapsed_seconds,
            history: report.history.clone(),
            splits,
            written_at: Utc::now(),
        };

        let path = Self::path(report.output_dir, report.job_name, report.fold_index);
        persistence::atomic_write_json(&path, &results)?;
        tracing::debug!(path = %path.display(), "Wrote fold results");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Batch, Dataset, ModelBuilder, ModelSpec, SimulatedModelBuilder};
    use crate::config::fixtures::training_config;
    use crate::fold::{FoldDatasets, SplitKind};
    use tempfile::TempDir;

    fn dataset(split: SplitKind, labels: Vec<usize>) -> Dataset {
        Dataset {
            split,
            files: labels
                .iter()
                .enumerate()
                .map(|(i, _)| PathBuf::from(format!("f{i}.png")))
                .collect(),
            batches: vec![Batch {
                images: Vec::new(),
                labels,
            }],
        }
    }

    #[test]
    fn test_writes_one_document_per_fold() {
        let dir = TempDir::new().unwrap();
        let config = training_config("c1", dir.path());
        let mut model = SimulatedModelBuilder::default()
            .build(&ModelSpec::from_config(&config), None)
            .unwrap();
        let datasets = FoldDatasets {
            training: dataset(SplitKind::Training, vec![0, 1]),
            validation: None,
            testing: Some(dataset(SplitKind::Testing, vec![1, 1, 0])),
        };
        model.train_epoch(1, &datasets.training, None).unwrap();

        let history = TrainingHistory::default();
        let out = config.results_dir();
        JsonResultsWriter
            .write(&FoldReport {
                output_dir: &out,
                test_subject: "A",
                validation_subject: None,
                fold_index: 0,
                model: model.as_ref(),
                history: &history,
                elapsed_seconds: Some(1.5),
                datasets: &datasets,
                class_names: &config.class_names,
                job_name: "c1_test_A",
                model_name: "resnet",
                is_outer: true,
                rank: 1,
            })
            .unwrap();

        let written: FoldResults =
            persistence::load_json(&JsonResultsWriter::path(&out, "c1_test_A", 0))
                .unwrap()
                .unwrap();
        assert_eq!(written.splits.len(), 2);
        assert_eq!(written.splits[1].split, "testing");
        assert_eq!(written.splits[1].true_labels, vec![1, 1, 0]);
        assert_eq!(written.splits[1].accuracy, 1.0);
        assert_eq!(written.elapsed_seconds, Some(1.5));
    }
}
