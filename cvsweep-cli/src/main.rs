//! cvsweep CLI: run and inspect nested cross-validation sweeps.
//!
//! Rank 0 (the coordinator) and every worker rank run inside this process as
//! tokio tasks connected by an in-process channel mesh.

mod commands;

use clap::Parser;
use cvsweep_core::{LoopLevel, SweepSettings};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// cvsweep: resumable nested cross-validation sweeps
#[derive(Parser, Debug)]
#[command(name = "cvsweep", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that enumerates tasks.
#[derive(clap::Args, Debug, Clone, Default)]
struct SweepArgs {
    /// Run the inner loop (test + validation subject folds)
    #[arg(long, conflicts_with = "outer")]
    inner: bool,

    /// Run the outer loop (test subject folds only)
    #[arg(long)]
    outer: bool,

    /// Directory holding the training configurations
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

impl SweepArgs {
    fn apply(&self, settings: &mut SweepSettings) {
        if self.inner {
            settings.loop_level = LoopLevel::Inner;
        }
        if self.outer {
            settings.loop_level = LoopLevel::Outer;
        }
        if let Some(dir) = &self.config_dir {
            settings.config_dir = dir.clone();
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a sweep until every task has been handed out
    Run {
        #[command(flatten)]
        sweep: SweepArgs,

        /// Number of worker ranks
        #[arg(long)]
        workers: Option<usize>,

        /// Number of devices to spread workers over (0 = CPU only)
        #[arg(long)]
        devices: Option<usize>,

        /// Keep at most this many checkpoints per fold
        #[arg(long)]
        keep_checkpoints: Option<usize>,

        /// Make the simulated model's validation loss rise after this epoch
        #[arg(long, value_name = "EPOCH")]
        simulate_overfit: Option<usize>,
    },
    /// Print the task list in serving order without training
    Tasks {
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Show which folds are finished
    Status {
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Manage sweep settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default cvsweep.toml in the workspace
    Init,
    /// Show the effective settings
    Show,
}

impl Commands {
    fn apply_overrides(&self, settings: &mut SweepSettings) {
        match self {
            Commands::Run {
                sweep,
                workers,
                devices,
                keep_checkpoints,
                ..
            } => {
                sweep.apply(settings);
                if let Some(n) = workers {
                    settings.ranks = n + 1;
                }
                if let Some(n) = devices {
                    settings.device_count = *n;
                }
                if keep_checkpoints.is_some() {
                    settings.checkpoints_to_keep = *keep_checkpoints;
                }
            }
            Commands::Tasks { sweep } | Commands::Status { sweep } => sweep.apply(settings),
            Commands::Config { .. } => {}
        }
    }
}

/// Human-readable stderr logging plus a JSON file under the run log dir.
fn init_tracing(verbose: u8, quiet: bool, log_dir: &Path) -> WorkerGuard {
    let filter = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let _ = std::fs::create_dir_all(log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, "cvsweep.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| cli.workspace.clone());

    let mut settings = cvsweep_core::load_settings(Some(&workspace))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.command.apply_overrides(&mut settings);
    settings.validate()?;
    let settings = settings.rooted_at(&workspace);

    let _guard = init_tracing(cli.verbose, cli.quiet, &settings.run_log_dir());

    commands::handle_command(cli.command, &workspace, settings).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "cvsweep",
            "run",
            "--outer",
            "--workers",
            "4",
            "--config-dir",
            "configs",
            "--keep-checkpoints",
            "3",
        ]);
        let mut settings = SweepSettings::default();
        cli.command.apply_overrides(&mut settings);

        assert_eq!(settings.loop_level, LoopLevel::Outer);
        assert_eq!(settings.ranks, 5);
        assert_eq!(settings.worker_count(), 4);
        assert_eq!(settings.config_dir, PathBuf::from("configs"));
        assert_eq!(settings.checkpoints_to_keep, Some(3));
    }

    #[test]
    fn test_simulate_overfit_flag() {
        let cli = Cli::parse_from(["cvsweep", "run", "--simulate-overfit", "3"]);
        assert!(matches!(
            cli.command,
            Commands::Run {
                simulate_overfit: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_inner_and_outer_conflict() {
        assert!(Cli::try_parse_from(["cvsweep", "tasks", "--inner", "--outer"]).is_err());
    }

    #[test]
    fn test_verbosity_flags() {
        let cli = Cli::parse_from(["cvsweep", "-vv", "status"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }
}
