//! Configuration types for cvsweep.
//!
//! Two layers:
//! - [`SweepSettings`]: how a sweep is run (worker count, loop level, where
//!   configurations and timings live). Loaded from defaults, `cvsweep.toml`,
//!   and `CVSWEEP_*` environment variables.
//! - [`TrainingConfig`]: one document per configuration in the configuration
//!   directory, describing subjects, model and hyperparameters.

use crate::error::{Result, SweepError};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which level of the nested cross-validation a sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopLevel {
    /// Hold out one test subject, no validation split.
    Outer,
    /// Additionally hold out a validation ("rotation") subject.
    Inner,
}

impl LoopLevel {
    pub fn is_outer(self) -> bool {
        matches!(self, LoopLevel::Outer)
    }

    /// Tag used in the coordinator's timing file name.
    pub fn timing_tag(self) -> &'static str {
        match self {
            LoopLevel::Outer => "OUTER",
            LoopLevel::Inner => "INNER",
        }
    }
}

impl std::fmt::Display for LoopLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopLevel::Outer => write!(f, "outer"),
            LoopLevel::Inner => write!(f, "inner"),
        }
    }
}

/// Settings for one sweep invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Directory holding one JSON or TOML document per training configuration.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Root for sweep-level artifacts such as the JSON run logs.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Total number of ranks, coordinator included. Workers are ranks `1..ranks`.
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    /// Loop level of the sweep.
    #[serde(default = "default_loop_level")]
    pub loop_level: LoopLevel,
    /// Where the coordinator writes its wall-clock timing file.
    #[serde(default = "default_timings_dir")]
    pub timings_dir: PathBuf,
    /// Number of devices to spread worker ranks over. Zero means CPU only.
    #[serde(default = "default_device_count")]
    pub device_count: usize,
    /// Keep at most this many checkpoints per prefix. `None` keeps all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoints_to_keep: Option<usize>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            output_root: default_output_root(),
            ranks: default_ranks(),
            loop_level: default_loop_level(),
            timings_dir: default_timings_dir(),
            device_count: default_device_count(),
            checkpoints_to_keep: None,
        }
    }
}

impl SweepSettings {
    /// Number of worker ranks (everything except rank 0).
    pub fn worker_count(&self) -> usize {
        self.ranks.saturating_sub(1)
    }

    /// Resolve relative directories against `workspace`.
    pub fn rooted_at(mut self, workspace: &Path) -> Self {
        for dir in [
            &mut self.config_dir,
            &mut self.output_root,
            &mut self.timings_dir,
        ] {
            if dir.is_relative() {
                *dir = workspace.join(&*dir);
            }
        }
        self
    }

    pub fn run_log_dir(&self) -> PathBuf {
        self.output_root.join("run_logs")
    }

    pub fn validate(&self) -> Result<()> {
        if self.ranks < 2 {
            return Err(SweepError::config(format!(
                "at least 2 ranks are required (1 coordinator + 1 worker), got {}",
                self.ranks
            )));
        }
        if self.checkpoints_to_keep == Some(0) {
            return Err(SweepError::config("checkpoints_to_keep must be at least 1"));
        }
        Ok(())
    }
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("training_config_files")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("results")
}

fn default_ranks() -> usize {
    2
}

fn default_loop_level() -> LoopLevel {
    LoopLevel::Inner
}

fn default_timings_dir() -> PathBuf {
    PathBuf::from("results").join("training_timings")
}

fn default_device_count() -> usize {
    2
}

/// Epoch budget for a configuration: one value for every fold, or one per
/// test subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpochBudget {
    Fixed(usize),
    PerSubject(BTreeMap<String, usize>),
}

impl EpochBudget {
    /// Resolve the budget for a given test subject.
    pub fn for_subject(&self, test_subject: &str) -> Result<usize> {
        match self {
            EpochBudget::Fixed(n) => Ok(*n),
            EpochBudget::PerSubject(map) => map.get(test_subject).copied().ok_or_else(|| {
                SweepError::config(format!("no epoch budget for test subject '{test_subject}'"))
            }),
        }
    }
}

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub epochs: EpochBudget,
    /// Early stopping patience in epochs (inner loop only).
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub do_cropping: bool,
    /// Crop offset as `[height, width]`.
    #[serde(default)]
    pub cropping_position: [usize; 2],
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

fn default_patience() -> usize {
    10
}

fn default_batch_size() -> usize {
    32
}

fn default_channels() -> usize {
    1
}

fn default_learning_rate() -> f64 {
    0.001
}

/// One training configuration of the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Base of every job name and checkpoint prefix derived from this config.
    pub job_name: String,
    pub selected_model_name: String,
    /// Subjects that may contribute training data.
    pub subject_list: Vec<String>,
    pub test_subjects: Vec<String>,
    /// Validation subjects for the inner loop. Falls back to `subject_list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_subjects: Option<Vec<String>>,
    #[serde(default)]
    pub shuffle_the_folds: bool,
    /// Seed for fold shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub hyperparameters: Hyperparameters,
    pub target_height: usize,
    pub target_width: usize,
    pub class_names: Vec<String>,
    /// Root of checkpoints, run logs and training results for this config.
    pub output_path: PathBuf,
    /// Directory scanned for image files.
    pub data_path: PathBuf,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    /// Index of the subject in `_`-separated file names.
    #[serde(default)]
    pub subject_position: usize,
    /// Index of the label in `_`-separated file names.
    #[serde(default = "default_label_position")]
    pub label_position: usize,
    /// Save a checkpoint every this many epochs.
    #[serde(default = "default_checkpoint_frequency")]
    pub k_epoch_checkpoint_frequency: usize,
}

fn default_seed() -> u64 {
    42
}

fn default_file_extension() -> String {
    "png".to_string()
}

fn default_label_position() -> usize {
    1
}

fn default_checkpoint_frequency() -> usize {
    1
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SweepError::config(format!("{}: {msg}", self.job_name)));
        if self.job_name.trim().is_empty() {
            return Err(SweepError::config("job_name must not be empty"));
        }
        if self.test_subjects.is_empty() {
            return fail("test_subjects must not be empty");
        }
        if self.class_names.is_empty() {
            return fail("class_names must not be empty");
        }
        if self.hyperparameters.batch_size == 0 {
            return fail("batch_size must be positive");
        }
        if self.k_epoch_checkpoint_frequency == 0 {
            return fail("k_epoch_checkpoint_frequency must be positive");
        }
        if self.target_height == 0 || self.target_width == 0 {
            return fail("target size must be positive");
        }
        Ok(())
    }

    /// Validation subjects used by the inner loop.
    pub fn inner_validation_subjects(&self) -> &[String] {
        self.validation_subjects
            .as_deref()
            .unwrap_or(&self.subject_list)
    }

    /// Resolve relative `output_path` and `data_path` against `workspace`.
    pub fn rooted_at(mut self, workspace: &Path) -> Self {
        for dir in [&mut self.output_path, &mut self.data_path] {
            if dir.is_relative() {
                *dir = workspace.join(&*dir);
            }
        }
        self
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_path.join("checkpoints")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_path.join("training_results")
    }
}

/// User-level settings file, e.g. `~/.config/cvsweep/config.toml` on Linux.
pub fn user_settings_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "cvsweep", "cvsweep")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Workspace settings file.
pub fn workspace_settings_path(workspace: &Path) -> PathBuf {
    workspace.join("cvsweep.toml")
}

/// Load sweep settings from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `CVSWEEP_`)
/// 2. Workspace config (`cvsweep.toml`)
/// 3. User config
/// 4. Built-in defaults
///
/// Command-line flags are applied by the caller on the returned value.
pub fn load_settings(workspace: Option<&Path>) -> Result<SweepSettings> {
    let mut figment = Figment::from(Serialized::defaults(SweepSettings::default()));

    if let Some(user_config) = user_settings_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_settings_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CVSWEEP_RANKS, CVSWEEP_LOOP_LEVEL, ...
    figment = figment.merge(Env::prefixed("CVSWEEP_").split("__"));

    let settings: SweepSettings = figment.extract().map_err(Box::new)?;
    settings.validate()?;
    Ok(settings)
}

/// Load every training configuration document in `dir`, sorted by file name.
///
/// A missing directory yields an empty list; the coordinator decides what an
/// empty sweep means.
pub fn load_training_configs(dir: &Path) -> Result<Vec<TrainingConfig>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("json") | Some("toml")
            )
        })
        .collect();
    paths.sort();

    let mut configs = Vec::with_capacity(paths.len());
    for path in paths {
        let config = load_training_config(&path)?;
        tracing::debug!(path = %path.display(), job_name = %config.job_name, "Loaded training configuration");
        configs.push(config);
    }
    Ok(configs)
}

/// Load a single training configuration document.
pub fn load_training_config(path: &Path) -> Result<TrainingConfig> {
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::from(Toml::file(path)),
        _ => Figment::from(Json::file(path)),
    };
    let config: TrainingConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Minimal config used across unit tests.
    pub fn training_config(job_name: &str, output_path: &Path) -> TrainingConfig {
        TrainingConfig {
            job_name: job_name.to_string(),
            selected_model_name: "resnet".to_string(),
            subject_list: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            test_subjects: vec!["A".into()],
            validation_subjects: Some(vec!["B".into(), "C".into()]),
            shuffle_the_folds: false,
            seed: 42,
            hyperparameters: Hyperparameters {
                epochs: EpochBudget::Fixed(5),
                patience: 3,
                batch_size: 2,
                channels: 1,
                do_cropping: false,
                cropping_position: [0, 0],
                learning_rate: 0.001,
            },
            target_height: 4,
            target_width: 4,
            class_names: vec!["healthy".into(), "sick".into()],
            output_path: output_path.to_path_buf(),
            data_path: output_path.join("data"),
            file_extension: "png".to_string(),
            subject_position: 0,
            label_position: 1,
            k_epoch_checkpoint_frequency: 1,
        }
    }
}
