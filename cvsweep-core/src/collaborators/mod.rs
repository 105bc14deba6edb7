//! Seams to the parts of training the sweep does not own: file cataloguing,
//! image decoding, model construction and result writing.
//!
//! Each trait has one small reference implementation so a sweep runs end to
//! end without a deep-learning framework attached.

pub mod catalog;
pub mod image;
pub mod model;
pub mod results;

pub use catalog::DirectoryCatalog;
pub use image::RawImageReader;
pub use model::SimulatedModelBuilder;
pub use results::JsonResultsWriter;

use crate::config::{Hyperparameters, TrainingConfig};
use crate::error::Result;
use crate::fold::{FoldDatasets, SplitKind};
use crate::training::history::{EpochMetrics, TrainingHistory};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// --- Files ---

/// Every image file of a configuration with its subject and label, in a
/// stable order. Indexes into `files` are the "true indexes" persisted in a
/// fold record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCatalog {
    pub files: Vec<PathBuf>,
    pub subjects: Vec<String>,
    pub labels: Vec<String>,
    pub folds: FoldMetadata,
}

/// Per-subject summary of the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoldMetadata {
    pub subjects: BTreeMap<String, SubjectSummary>,
    pub label_position: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub file_count: usize,
    pub label_counts: BTreeMap<String, usize>,
}

/// Lists the files a configuration trains on.
pub trait DatasetCatalog: Send + Sync {
    fn catalog(&self, config: &TrainingConfig) -> Result<FileCatalog>;
}

// --- Images ---

/// A decoded image laid out as `height × width × channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

/// Decoding parameters shared by every file of a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    pub class_names: Vec<String>,
    pub channels: usize,
    pub do_crop: bool,
    pub crop_offset_height: usize,
    pub crop_offset_width: usize,
    pub target_height: usize,
    pub target_width: usize,
    pub label_position: usize,
}

impl ImageParams {
    pub fn from_config(config: &TrainingConfig) -> Self {
        let hp = &config.hyperparameters;
        Self {
            class_names: config.class_names.clone(),
            channels: hp.channels,
            do_crop: hp.do_cropping,
            crop_offset_height: hp.cropping_position[0],
            crop_offset_width: hp.cropping_position[1],
            target_height: config.target_height,
            target_width: config.target_width,
            label_position: config.label_position,
        }
    }
}

/// Turns one file into an image tensor and a class index.
pub trait ImageReader: Send + Sync {
    fn parse(&self, path: &Path, params: &ImageParams) -> Result<(ImageTensor, usize)>;
}

/// A batch of decoded images.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub images: Vec<ImageTensor>,
    pub labels: Vec<usize>,
}

/// A materialized split, batched, in catalogue order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub split: SplitKind,
    /// Files actually present in `batches`, in order.
    pub files: Vec<PathBuf>,
    pub batches: Vec<Batch>,
}

impl Dataset {
    /// Number of images across all batches.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|b| b.labels.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.batches.iter().flat_map(|b| b.labels.iter().copied())
    }
}

// --- Models ---

/// Everything needed to rebuild a fold's model from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_name: String,
    pub hyperparameters: Hyperparameters,
    pub target_height: usize,
    pub target_width: usize,
    pub class_names: Vec<String>,
}

impl ModelSpec {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            model_name: config.selected_model_name.clone(),
            hyperparameters: config.hyperparameters.clone(),
            target_height: config.target_height,
            target_width: config.target_width,
            class_names: config.class_names.clone(),
        }
    }
}

/// Flat model parameters as stored in checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights(pub Vec<f32>);

impl ModelWeights {
    /// SHA-256 over the little-endian parameter bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for value in &self.0 {
            hasher.update(value.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// One model prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: usize,
    pub predicted: usize,
    pub scores: Vec<f32>,
}

/// A model the fold executor can train one epoch at a time.
pub trait TrainableModel: Send {
    fn model_type(&self) -> &str;

    /// Train epoch `epoch` (1-based) and report its metrics. Validation
    /// metrics are present iff `validation` is.
    fn train_epoch(
        &mut self,
        epoch: usize,
        training: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<EpochMetrics>;

    fn weights(&self) -> ModelWeights;

    fn load_weights(&mut self, weights: ModelWeights) -> Result<()>;

    /// Predictions in dataset order.
    fn predict(&self, dataset: &Dataset) -> Result<Vec<Prediction>>;
}

/// Builds untrained models.
pub trait ModelBuilder: Send + Sync {
    fn build(&self, spec: &ModelSpec, device: Option<&str>) -> Result<Box<dyn TrainableModel>>;
}

// --- Results ---

/// Everything a results writer receives for one finished fold.
pub struct FoldReport<'a> {
    pub output_dir: &'a Path,
    pub test_subject: &'a str,
    pub validation_subject: Option<&'a str>,
    pub fold_index: usize,
    pub model: &'a dyn TrainableModel,
    pub history: &'a TrainingHistory,
    /// `None` when training was skipped because a checkpoint already covered
    /// the whole budget.
    pub elapsed_seconds: Option<f64>,
    pub datasets: &'a FoldDatasets,
    pub class_names: &'a [String],
    pub job_name: &'a str,
    pub model_name: &'a str,
    pub is_outer: bool,
    pub rank: usize,
}

/// Persists a fold's predictions, timing and history.
pub trait ResultsWriter: Send + Sync {
    fn write(&self, report: &FoldReport<'_>) -> Result<()>;
}
