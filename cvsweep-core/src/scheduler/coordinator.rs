//! Rank 0: builds the task list and hands tasks out on demand.

use super::transport::{Assignment, CoordinatorEndpoint};
use crate::config::{LoopLevel, SweepSettings, TrainingConfig};
use crate::error::{Result, SweepError};
use crate::partition::{FoldPartitioner, PairRequest};
use crate::task::Task;
use chrono::Local;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Build every task of the sweep, in generation order.
///
/// Deterministic for the same configurations: fold shuffling is seeded per
/// configuration.
pub fn enumerate_tasks(
    configs: &[TrainingConfig],
    n_workers: usize,
    level: LoopLevel,
    partitioner: &dyn FoldPartitioner,
) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for config in configs {
        let shared = Arc::new(config.clone());
        let pairs = partitioner.generate_pairs(&PairRequest::for_config(config, level))?;
        tasks.extend(pairs.into_iter().enumerate().map(|(fold_index, pair)| Task {
            config: Arc::clone(&shared),
            epoch_budget: pair.epoch_budget,
            test_subject: pair.test_subject,
            validation_subject: pair.validation_subject,
            fold_index,
        }));
    }
    tracing::info!(
        configs = configs.len(),
        tasks = tasks.len(),
        workers = n_workers,
        level = %level,
        "Enumerated sweep tasks"
    );
    Ok(tasks)
}

/// What the coordinator did during one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ServeSummary {
    pub tasks_sent: usize,
    /// Ranks that received the stop sentinel.
    pub stopped: Vec<usize>,
    /// Ranks whose channel closed before they could be stopped.
    pub lost: Vec<usize>,
    pub elapsed_seconds: f64,
    pub timing_file: Option<PathBuf>,
}

/// The sweep coordinator.
#[derive(Debug)]
pub struct TaskScheduler {
    backlog: Vec<Task>,
    config_count: usize,
    config_dir: PathBuf,
    timings_dir: PathBuf,
    level: LoopLevel,
}

impl TaskScheduler {
    pub fn new(
        settings: &SweepSettings,
        configs: &[TrainingConfig],
        partitioner: &dyn FoldPartitioner,
    ) -> Result<Self> {
        let backlog = enumerate_tasks(
            configs,
            settings.worker_count(),
            settings.loop_level,
            partitioner,
        )?;
        Ok(Self {
            backlog,
            config_count: configs.len(),
            config_dir: settings.config_dir.clone(),
            timings_dir: settings.timings_dir.clone(),
            level: settings.loop_level,
        })
    }

    /// Tasks in the order they will be served.
    pub fn serving_order(&self) -> impl Iterator<Item = &Task> {
        self.backlog.iter().rev()
    }

    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Answer readiness announcements until every worker has been stopped.
    ///
    /// Tasks are served from the end of the generated list. With no
    /// configurations every worker is stopped and the sweep fails.
    pub async fn serve<E: CoordinatorEndpoint + ?Sized>(
        mut self,
        endpoint: &mut E,
    ) -> Result<ServeSummary> {
        let start_name = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let start = Instant::now();
        let ranks: BTreeSet<usize> = endpoint.worker_ranks().into_iter().collect();

        if self.config_count == 0 {
            tracing::error!(dir = %self.config_dir.display(), "No configurations given");
            for &rank in &ranks {
                if let Err(e) = endpoint.send(rank, Assignment::Stop).await {
                    tracing::warn!(rank, error = %e, "Could not stop worker");
                }
            }
            return Err(SweepError::NoConfigurations(self.config_dir));
        }

        let mut stopped = BTreeSet::new();
        let mut lost = BTreeSet::new();
        let mut tasks_sent = 0;

        while stopped.len() + lost.len() < ranks.len() {
            let Some(rank) = endpoint.recv_ready().await? else {
                break;
            };

            match self.backlog.pop() {
                Some(task) => {
                    tracing::info!(rank, task = %task, remaining = self.backlog.len(), "Sending task");
                    if let Err(e) = endpoint.send(rank, Assignment::Task(Box::new(task.clone()))).await {
                        tracing::warn!(rank, error = %e, "Worker unreachable, keeping its task");
                        self.backlog.push(task);
                        lost.insert(rank);
                        continue;
                    }
                    tasks_sent += 1;
                }
                None => {
                    tracing::info!(rank, "No tasks left, stopping worker");
                    match endpoint.send(rank, Assignment::Stop).await {
                        Ok(()) => stopped.insert(rank),
                        Err(_) => lost.insert(rank),
                    };
                }
            }
        }

        let unaccounted: Vec<usize> = ranks
            .iter()
            .copied()
            .filter(|r| !stopped.contains(r))
            .collect();
        if !unaccounted.is_empty() {
            tracing::warn!(ranks = ?unaccounted, "Workers exited without being stopped");
        }

        let elapsed_seconds = start.elapsed().as_secs_f64();
        let timing_file = match self.write_timing(&start_name, elapsed_seconds) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write timing file");
                None
            }
        };
        tracing::info!(
            tasks_sent,
            elapsed_seconds,
            unsent = self.backlog.len(),
            "Coordinator terminated, all workers finished"
        );

        Ok(ServeSummary {
            tasks_sent,
            stopped: stopped.into_iter().collect(),
            lost: unaccounted,
            elapsed_seconds,
            timing_file,
        })
    }

    fn write_timing(&self, start_name: &str, elapsed_seconds: f64) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.timings_dir)?;
        let path = self.timings_dir.join(format!(
            "_TIME_MPI_{}_{start_name}.txt",
            self.level.timing_tag()
        ));
        std::fs::write(&path, elapsed_seconds.to_string())?;
        Ok(path)
    }
}
