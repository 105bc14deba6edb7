//! Worker ranks: pull tasks from the coordinator and run them.

use super::transport::{Assignment, WorkerEndpoint};
use crate::context::WorkerContext;
use crate::error::{Result, SweepError};
use crate::fold::{FoldExecutor, FoldOutcome, FoldSummary, SkipReason};
use crate::run_log::RunLog;
use crate::task::Task;
use serde::Serialize;
use std::sync::Arc;

/// What one task turned into on a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The run log already marks the fold finished; nothing was touched.
    AlreadyFinished,
    Completed(Box<FoldSummary>),
    Skipped(SkipReason),
}

/// Per-worker tally, returned when the worker is stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub rank: usize,
    pub received: usize,
    pub trained: usize,
    pub skipped_finished: usize,
    pub skipped_degenerate: usize,
    pub failed: usize,
}

impl WorkerReport {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            ..Self::default()
        }
    }
}

/// Run one task synchronously: skip finished folds, otherwise execute the
/// fold and mark it finished once its results are written.
pub fn process_task(
    executor: &FoldExecutor,
    ctx: &WorkerContext,
    task: &Task,
) -> Result<TaskOutcome> {
    let job_name = task.job_name();
    if task.level() != ctx.level {
        return Err(SweepError::config(format!(
            "{job_name} is an {} task but rank {} runs the {} loop",
            task.level(),
            ctx.rank,
            ctx.level
        )));
    }
    let run_log = RunLog::new(&task.config.output_path);

    if run_log.is_finished(&job_name)? {
        tracing::info!(rank = ctx.rank, job_name = %job_name, "Fold already finished, skipping");
        return Ok(TaskOutcome::AlreadyFinished);
    }

    tracing::info!(
        rank = ctx.rank,
        job_name = %job_name,
        model = %task.config.selected_model_name,
        device = ?ctx.device,
        "Starting fold"
    );
    match executor.run(ctx, task)? {
        FoldOutcome::Completed(summary) => {
            run_log.mark_finished(&job_name)?;
            tracing::info!(rank = ctx.rank, job_name = %job_name, "Finished fold");
            Ok(TaskOutcome::Completed(Box::new(summary)))
        }
        FoldOutcome::Skipped(reason) => Ok(TaskOutcome::Skipped(reason)),
    }
}

/// Worker loop: announce readiness, run whatever arrives, repeat until the
/// coordinator sends the stop sentinel.
///
/// Fold failures are logged and counted. Transport failures and any other
/// fatal error end the loop early.
pub async fn run_worker<E: WorkerEndpoint + ?Sized>(
    endpoint: &mut E,
    ctx: WorkerContext,
    executor: Arc<FoldExecutor>,
) -> Result<WorkerReport> {
    let rank = ctx.rank;
    let ctx = Arc::new(ctx);
    let mut report = WorkerReport::new(rank);
    tracing::info!(rank, "Listening for the coordinator");

    loop {
        endpoint.announce_ready().await?;
        let task = match endpoint.recv_assignment().await? {
            Assignment::Task(task) => task,
            Assignment::Stop => break,
        };
        report.received += 1;
        tracing::info!(rank, task = %task, "Task received");

        let job_name = task.job_name();
        let exec = Arc::clone(&executor);
        let task_ctx = Arc::clone(&ctx);
        let outcome =
            tokio::task::spawn_blocking(move || process_task(&exec, &task_ctx, &task)).await;

        match outcome {
            Ok(Ok(TaskOutcome::AlreadyFinished)) => report.skipped_finished += 1,
            Ok(Ok(TaskOutcome::Completed(_))) => report.trained += 1,
            Ok(Ok(TaskOutcome::Skipped(_))) => report.skipped_degenerate += 1,
            Ok(Err(e)) if e.is_fatal() => {
                tracing::error!(rank, job_name = %job_name, error = %e, "Fatal error, worker exiting");
                return Err(e);
            }
            Ok(Err(e)) => {
                tracing::error!(rank, job_name = %job_name, error = %e, "Fold failed, leaving it unfinished");
                report.failed += 1;
            }
            Err(e) => {
                tracing::error!(rank, job_name = %job_name, error = %e, "Fold task panicked");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        rank,
        received = report.received,
        trained = report.trained,
        failed = report.failed,
        "Worker terminated, no tasks left"
    );
    Ok(report)
}
