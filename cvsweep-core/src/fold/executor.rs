//! Drives one fold from recovery check to written results.

use super::datasets::{FoldDatasets, SkipReason, assign_splits, check_trainable};
use super::record::FoldStateRecord;
use crate::collaborators::{
    DatasetCatalog, FoldReport, ImageParams, ImageReader, ModelBuilder, ModelSpec, ResultsWriter,
    TrainableModel,
};
use crate::context::WorkerContext;
use crate::error::Result;
use crate::run_log::RunLog;
use crate::task::Task;
use crate::training::{
    CallbackAction, CheckpointCallback, CheckpointStore, EarlyStoppingCallback, EpochCallback,
    TrainingHistory,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// Progress of a fold through its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FoldPhase {
    Fresh,
    SetupDone,
    DatasetReady,
    Trained,
    ResultsWritten,
}

/// What happened to a completed fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldSummary {
    pub job_name: String,
    /// Phases this run passed through, in order. A recovered fold starts at
    /// [`FoldPhase::SetupDone`].
    pub phases: Vec<FoldPhase>,
    /// Whether a persisted fold record was adopted.
    pub recovered: bool,
    /// Epoch of the checkpoint training resumed from.
    pub resumed_epoch: Option<usize>,
    /// Epochs actually trained in this session.
    pub epochs_trained: usize,
    /// Epoch at which early stopping ended training, if it did.
    pub stopped_epoch: Option<usize>,
    /// This session's history, or the checkpoint's when training was skipped.
    pub history: TrainingHistory,
    pub elapsed_seconds: Option<f64>,
}

/// Result of running a fold.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldOutcome {
    Completed(FoldSummary),
    Skipped(SkipReason),
}

/// Phases visited by one run, logged as they are entered.
struct PhaseTrail<'a> {
    job_name: &'a str,
    rank: usize,
    phases: Vec<FoldPhase>,
}

impl<'a> PhaseTrail<'a> {
    fn new(job_name: &'a str, rank: usize, first: FoldPhase) -> Self {
        Self {
            job_name,
            rank,
            phases: vec![first],
        }
    }

    fn enter(&mut self, phase: FoldPhase) {
        tracing::debug!(rank = self.rank, job_name = self.job_name, phase = ?phase, "Fold phase");
        self.phases.push(phase);
    }
}

/// Fold setup plus the live model attached to it.
struct PreparedFold {
    record: FoldStateRecord,
    model: Box<dyn TrainableModel>,
    recovered: bool,
    resumed_epoch: Option<usize>,
    prior_history: TrainingHistory,
}

/// Runs folds with a fixed set of collaborators.
#[derive(Clone)]
pub struct FoldExecutor {
    catalog: Arc<dyn DatasetCatalog>,
    reader: Arc<dyn ImageReader>,
    builder: Arc<dyn ModelBuilder>,
    results: Arc<dyn ResultsWriter>,
    checkpoints_to_keep: Option<usize>,
}

impl FoldExecutor {
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        reader: Arc<dyn ImageReader>,
        builder: Arc<dyn ModelBuilder>,
        results: Arc<dyn ResultsWriter>,
    ) -> Self {
        Self {
            catalog,
            reader,
            builder,
            results,
            checkpoints_to_keep: None,
        }
    }

    pub fn with_checkpoint_retention(mut self, keep: Option<usize>) -> Self {
        self.checkpoints_to_keep = keep;
        self
    }

    /// Run one fold to completion.
    ///
    /// A degenerate split returns [`FoldOutcome::Skipped`]; the caller must
    /// not mark such a fold finished.
    pub fn run(&self, ctx: &WorkerContext, task: &Task) -> Result<FoldOutcome> {
        let job_name = task.job_name();
        let config = &task.config;
        let run_log = RunLog::new(&config.output_path);
        let store = CheckpointStore::new(config.checkpoint_dir())
            .with_retention(self.checkpoints_to_keep);

        // Fresh -> SetupDone
        let PreparedFold {
            record,
            mut model,
            recovered,
            resumed_epoch,
            prior_history,
        } = self.prepare(ctx, task, &job_name, &run_log, &store)?;
        let mut trail = if recovered {
            PhaseTrail::new(&job_name, ctx.rank, FoldPhase::SetupDone)
        } else {
            let mut trail = PhaseTrail::new(&job_name, ctx.rank, FoldPhase::Fresh);
            trail.enter(FoldPhase::SetupDone);
            trail
        };

        // SetupDone -> DatasetReady
        if let Some(reason) = check_trainable(&record.datasets, record.is_outer) {
            tracing::warn!(rank = ctx.rank, job_name = %job_name, reason = %reason, "Skipping fold");
            return Ok(FoldOutcome::Skipped(reason));
        }
        let params = ImageParams::from_config(&record.config);
        let datasets = FoldDatasets::build(
            &record.datasets,
            self.reader.as_ref(),
            &params,
            record.config.hyperparameters.batch_size,
        )?;
        tracing::debug!(
            rank = ctx.rank,
            job_name = %job_name,
            training = datasets.training.len(),
            validation = datasets.validation.as_ref().map_or(0, |d| d.len()),
            testing = datasets.testing.as_ref().map_or(0, |d| d.len()),
            "Datasets ready"
        );
        trail.enter(FoldPhase::DatasetReady);

        // DatasetReady -> Trained
        let budget = task.epoch_budget;
        let (history, elapsed_seconds, epochs_trained, stopped_epoch) = if resumed_epoch == Some(budget) {
            tracing::info!(
                rank = ctx.rank,
                job_name = %job_name,
                epoch = budget,
                "Checkpoint covers the full budget, skipping training"
            );
            (prior_history, None, 0, None)
        } else {
            let start = Instant::now();
            let (history, stopped_epoch) = train(
                model.as_mut(),
                &record,
                &datasets,
                &store,
                resumed_epoch.unwrap_or(0),
                budget,
                prior_history,
            )?;
            let trained = history.len();
            (history, Some(start.elapsed().as_secs_f64()), trained, stopped_epoch)
        };
        trail.enter(FoldPhase::Trained);

        // Trained -> ResultsWritten
        let results_dir = record.config.results_dir();
        self.results.write(&FoldReport {
            output_dir: &results_dir,
            test_subject: &task.test_subject,
            validation_subject: task.validation_subject.as_deref(),
            fold_index: record.fold_index,
            model: model.as_ref(),
            history: &history,
            elapsed_seconds,
            datasets: &datasets,
            class_names: &record.config.class_names,
            job_name: &job_name,
            model_name: &record.model.model_name,
            is_outer: record.is_outer,
            rank: ctx.rank,
        })?;

        tracing::info!(
            rank = ctx.rank,
            job_name = %job_name,
            epochs_trained,
            elapsed_seconds = ?elapsed_seconds,
            "Fold results written"
        );
        trail.enter(FoldPhase::ResultsWritten);
        let phases = trail.phases;

        Ok(FoldOutcome::Completed(FoldSummary {
            job_name,
            phases,
            recovered,
            resumed_epoch,
            epochs_trained,
            stopped_epoch,
            history,
            elapsed_seconds,
        }))
    }

    /// Adopt a matching persisted record with its latest checkpoint, or
    /// compute a new setup and persist it before any training happens.
    fn prepare(
        &self,
        ctx: &WorkerContext,
        task: &Task,
        job_name: &str,
        run_log: &RunLog,
        store: &CheckpointStore,
    ) -> Result<PreparedFold> {
        let existing = match run_log.load_fold_record(job_name) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(job_name, error = %e, "Ignoring unreadable fold record");
                None
            }
        };

        if let Some(record) = existing.filter(|r| r.matches(&task.test_subject, task.rotation_subject())) {
            let mut model = self.builder.build(&record.model, ctx.device.as_deref())?;
            let checkpoint = store.load_most_recent(&record.checkpoint_prefix, task.epoch_budget)?;
            let (resumed_epoch, prior_history) = match checkpoint {
                Some(checkpoint) => {
                    model.load_weights(checkpoint.weights)?;
                    (Some(checkpoint.epoch), checkpoint.history)
                }
                None => (None, TrainingHistory::default()),
            };
            tracing::info!(
                rank = ctx.rank,
                job_name,
                resumed_epoch = ?resumed_epoch,
                "Resumed fold state found"
            );
            return Ok(PreparedFold {
                record,
                model,
                recovered: true,
                resumed_epoch,
                prior_history,
            });
        }

        let config = task.config.as_ref();
        let is_outer = ctx.is_outer();
        let catalog = self.catalog.catalog(config)?;
        let rotation = (!is_outer).then(|| task.rotation_subject());
        let datasets = assign_splits(&catalog, &config.subject_list, &task.test_subject, rotation);

        let record = FoldStateRecord {
            fold_index: task.fold_index,
            config: config.clone(),
            testing_subject: task.test_subject.clone(),
            rotation_subject: task.rotation_subject().to_string(),
            files: catalog.files,
            folds: catalog.folds,
            datasets,
            model: ModelSpec::from_config(config),
            checkpoint_prefix: task.checkpoint_prefix(),
            rank: ctx.rank,
            is_outer,
            epoch_budget: task.epoch_budget,
            created_at: Utc::now(),
        };
        let model = self.builder.build(&record.model, ctx.device.as_deref())?;
        run_log.save_fold_record(job_name, &record, true)?;
        tracing::debug!(rank = ctx.rank, job_name, "Persisted new fold record");

        Ok(PreparedFold {
            record,
            model,
            recovered: false,
            resumed_epoch: None,
            prior_history: TrainingHistory::default(),
        })
    }
}

/// Train epochs `resumed_epoch + 1 ..= budget` and return this session's
/// history with the early-stopping epoch, if any. Checkpoints carry the
/// cumulative history.
fn train(
    model: &mut dyn TrainableModel,
    record: &FoldStateRecord,
    datasets: &FoldDatasets,
    store: &CheckpointStore,
    resumed_epoch: usize,
    budget: usize,
    mut cumulative: TrainingHistory,
) -> Result<(TrainingHistory, Option<usize>)> {
    let hp = &record.config.hyperparameters;
    let mut checkpointing =
        CheckpointCallback::new(record.config.k_epoch_checkpoint_frequency, budget);
    let mut early_stopping = (!record.is_outer).then(|| EarlyStoppingCallback::new(hp.patience, 0.0));
    let mut session = TrainingHistory::default();

    for epoch in (resumed_epoch + 1)..=budget {
        let metrics = model.train_epoch(epoch, &datasets.training, datasets.validation.as_ref())?;
        session.record_epoch(epoch, &metrics);
        cumulative.record_epoch(epoch, &metrics);
        tracing::debug!(
            prefix = %record.checkpoint_prefix,
            epoch,
            loss = metrics.loss,
            val_loss = ?metrics.val_loss,
            "Epoch complete"
        );

        if checkpointing.on_epoch_end(epoch, &metrics, model) == CallbackAction::Checkpoint {
            store.save(&record.checkpoint_prefix, epoch, &model.weights(), &cumulative)?;
        }
        if let Some(cb) = early_stopping.as_mut()
            && cb.on_epoch_end(epoch, &metrics, model) == CallbackAction::Stop
        {
            break;
        }
    }

    let mut stopped_epoch = None;
    if let Some(cb) = early_stopping.as_mut() {
        cb.on_train_end(model)?;
        stopped_epoch = cb.stopped_epoch();
        if let Some(epoch) = stopped_epoch {
            tracing::info!(
                prefix = %record.checkpoint_prefix,
                stopped_epoch = epoch,
                best_epoch = ?cb.best_epoch(),
                "Stopped early"
            );
        }
    }
    Ok((session, stopped_epoch))
}
