//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use cvsweep_core::collaborators::{
    DirectoryCatalog, JsonResultsWriter, RawImageReader, SimulatedModelBuilder,
};
use cvsweep_core::config::workspace_settings_path;
use cvsweep_core::scheduler::{LocalWorker, WorkerEndpoint};
use cvsweep_core::{
    CheckpointStore, FoldExecutor, RunLog, SubjectPartitioner, SweepSettings, Task, TaskScheduler,
    WorkerContext, WorkerReport, load_settings, load_training_configs, local_mesh, run_worker,
};
use std::path::Path;
use std::sync::Arc;

/// Handle a subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    settings: SweepSettings,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            simulate_overfit, ..
        } => run(settings, workspace, simulate_overfit).await,
        Commands::Tasks { .. } => {
            for line in task_lines(&scheduler(&settings, workspace)?) {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Status { .. } => {
            let scheduler = scheduler(&settings, workspace)?;
            let lines = status_lines(&scheduler)?;
            let finished = lines.iter().filter(|l| l.finished).count();
            for line in &lines {
                println!("{line}");
            }
            println!("\n{finished}/{} folds finished", lines.len());
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

/// Relative paths inside training configurations resolve against the
/// workspace, like the sweep settings do.
fn scheduler(settings: &SweepSettings, workspace: &Path) -> anyhow::Result<TaskScheduler> {
    let configs: Vec<_> = load_training_configs(&settings.config_dir)
        .map_err(|e| anyhow::anyhow!("Failed to load training configurations: {}", e))?
        .into_iter()
        .map(|config| config.rooted_at(workspace))
        .collect();
    TaskScheduler::new(settings, &configs, &SubjectPartitioner)
        .map_err(|e| anyhow::anyhow!("Failed to enumerate tasks: {}", e))
}

async fn run(
    settings: SweepSettings,
    workspace: &Path,
    simulate_overfit: Option<usize>,
) -> anyhow::Result<()> {
    let scheduler = scheduler(&settings, workspace)?;
    let builder = match simulate_overfit {
        Some(epoch) => SimulatedModelBuilder::overfitting_after(epoch),
        None => SimulatedModelBuilder::default(),
    };
    tracing::info!(
        ranks = settings.ranks,
        level = %settings.loop_level,
        tasks = scheduler.pending(),
        config_dir = %settings.config_dir.display(),
        "Starting sweep"
    );

    let executor = Arc::new(
        FoldExecutor::new(
            Arc::new(DirectoryCatalog),
            Arc::new(RawImageReader),
            Arc::new(builder),
            Arc::new(JsonResultsWriter),
        )
        .with_checkpoint_retention(settings.checkpoints_to_keep),
    );

    let (mut coordinator, workers) = local_mesh(settings.ranks);
    let handles: Vec<_> = workers
        .into_iter()
        .map(|endpoint| spawn_worker(endpoint, &settings, Arc::clone(&executor)))
        .collect();

    let served = scheduler.serve(&mut coordinator).await;

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => tracing::error!(error = %e, "Worker exited with an error"),
            Err(e) => tracing::error!(error = %e, "Worker task panicked"),
        }
    }

    let summary = served.map_err(|e| anyhow::anyhow!("Sweep failed: {}", e))?;
    for report in &reports {
        println!("{}", report_line(report));
    }
    println!(
        "\n{} tasks sent in {:.1}s",
        summary.tasks_sent, summary.elapsed_seconds
    );
    if let Some(path) = &summary.timing_file {
        println!("Timing written to {}", path.display());
    }
    Ok(())
}

fn spawn_worker(
    mut endpoint: LocalWorker,
    settings: &SweepSettings,
    executor: Arc<FoldExecutor>,
) -> tokio::task::JoinHandle<cvsweep_core::Result<WorkerReport>> {
    let ctx = WorkerContext::new(endpoint.rank(), settings.device_count, settings.loop_level);
    tokio::spawn(async move { run_worker(&mut endpoint, ctx, executor).await })
}

fn report_line(report: &WorkerReport) -> String {
    format!(
        "rank {:>3}: {} received, {} trained, {} already finished, {} skipped, {} failed",
        report.rank,
        report.received,
        report.trained,
        report.skipped_finished,
        report.skipped_degenerate,
        report.failed
    )
}

fn task_lines(scheduler: &TaskScheduler) -> Vec<String> {
    scheduler
        .serving_order()
        .enumerate()
        .map(|(i, task)| format!("{:>4}. {:<40} epochs={}", i + 1, task.job_name(), task.epoch_budget))
        .collect()
}

/// One row of `cvsweep status`.
pub struct StatusLine {
    pub job_name: String,
    pub finished: bool,
    pub latest_checkpoint: Option<usize>,
    pub epoch_budget: usize,
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.finished { "finished" } else { "pending" };
        match self.latest_checkpoint {
            Some(epoch) => write!(
                f,
                "{:<40} {state:<9} checkpoint {epoch}/{}",
                self.job_name, self.epoch_budget
            ),
            None => write!(f, "{:<40} {state:<9}", self.job_name),
        }
    }
}

fn status_line(task: &Task) -> anyhow::Result<StatusLine> {
    let job_name = task.job_name();
    let finished = RunLog::new(&task.config.output_path)
        .is_finished(&job_name)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let latest_checkpoint = CheckpointStore::new(task.config.checkpoint_dir())
        .list_epochs(&task.checkpoint_prefix())
        .map_err(|e| anyhow::anyhow!("{}", e))?
        .last()
        .copied();
    Ok(StatusLine {
        job_name,
        finished,
        latest_checkpoint,
        epoch_budget: task.epoch_budget,
    })
}

fn status_lines(scheduler: &TaskScheduler) -> anyhow::Result<Vec<StatusLine>> {
    scheduler.serving_order().map(status_line).collect()
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = workspace_settings_path(workspace);
            if path.exists() {
                println!("Configuration already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&SweepSettings::default())?;
            std::fs::write(&path, &toml_str)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let settings = load_settings(Some(workspace))
                .map_err(|e| anyhow::anyhow!("Failed to load settings: {}", e))?;
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}
