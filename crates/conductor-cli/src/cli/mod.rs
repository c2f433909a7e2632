//! CLI command definitions and dispatch for the `cndr` binary.
//!
//! Uses clap derive macros for argument parsing. Plan commands sit at the top
//! level (`cndr run plan.json`); checkpoint housekeeping is grouped under
//! `cndr checkpoint`.

pub mod checkpoint;
pub mod plan;
pub mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use conductor_core::repository::CheckpointStore;
use conductor_types::config::{CheckpointBackend, CheckpointInterval, ExecutionMode, RunConfig};

use crate::state::AppState;

/// Run dependency graphs of agent steps with retry, replanning and checkpoints.
#[derive(Parser)]
#[command(name = "cndr", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory (default: $CONDUCTOR_DATA_DIR or ~/.conductor).
    #[arg(long, global = true, env = "CONDUCTOR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Configuration file (default: {data_dir}/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Checkpoint backend, overriding the configured one.
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a plan file for cycles, dangling dependencies and duplicate ids.
    Validate {
        /// Path to the plan JSON file.
        file: PathBuf,
    },

    /// Execute a plan.
    Run {
        /// Path to the plan JSON file.
        file: PathBuf,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// Continue a run from a checkpoint.
    Resume {
        /// Checkpoint ID to resume from.
        checkpoint_id: String,

        #[command(flatten)]
        overrides: RunOverrides,
    },

    /// Show the progress recorded for a run (by execution or checkpoint ID).
    Status {
        /// Execution ID or checkpoint ID.
        id: String,
    },

    /// Manage stored checkpoints (list, show, delete, cleanup).
    #[command(alias = "cp")]
    Checkpoint {
        #[command(subcommand)]
        action: checkpoint::CheckpointCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Backend names accepted on the command line.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum BackendArg {
    Sqlite,
    Filesystem,
    Memory,
}

impl From<BackendArg> for CheckpointBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sqlite => CheckpointBackend::Sqlite,
            BackendArg::Filesystem => CheckpointBackend::Filesystem,
            BackendArg::Memory => CheckpointBackend::Memory,
        }
    }
}

/// Per-invocation overrides of the `[run]` configuration.
#[derive(Args, Debug, Default, Clone)]
pub struct RunOverrides {
    /// Dispatch mode: sequential, parallel or adaptive.
    #[arg(long)]
    pub mode: Option<ExecutionMode>,

    /// Maximum steps in flight at once.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Per-attempt timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Checkpoint after every N step results.
    #[arg(long, conflicts_with = "checkpoint_secs")]
    pub checkpoint_every: Option<u32>,

    /// Checkpoint when N seconds have passed since the last one.
    #[arg(long)]
    pub checkpoint_secs: Option<u64>,

    /// Run plans that require approval.
    #[arg(long)]
    pub approve: bool,

    /// Answer every step with the built-in echo agent.
    #[arg(long)]
    pub simulate: bool,
}

impl RunOverrides {
    pub fn apply(&self, run: &mut RunConfig) {
        if let Some(mode) = self.mode {
            run.execution_mode = mode;
        }
        if let Some(n) = self.max_concurrent {
            run.max_concurrent_steps = n.max(1);
        }
        if let Some(secs) = self.timeout {
            run.step_timeout_secs = secs.max(1);
        }
        if let Some(n) = self.checkpoint_every {
            run.checkpoint_interval = CheckpointInterval::Steps(n.max(1));
        }
        if let Some(secs) = self.checkpoint_secs {
            run.checkpoint_interval = CheckpointInterval::Seconds(secs.max(1));
        }
        if self.approve {
            run.auto_approve = true;
        }
    }
}

/// Run a store-backed command against the given checkpoint store.
pub async fn dispatch<S>(command: Commands, state: &AppState, store: S, json: bool) -> Result<()>
where
    S: CheckpointStore + 'static,
{
    match command {
        Commands::Validate { file } => plan::validate(&file, json).await,
        Commands::Run { file, overrides } => plan::run(state, store, &file, &overrides, json).await,
        Commands::Resume {
            checkpoint_id,
            overrides,
        } => plan::resume(state, store, &checkpoint_id, &overrides, json).await,
        Commands::Status { id } => plan::status(state, store, &id, json).await,
        Commands::Checkpoint { action } => {
            checkpoint::handle_checkpoint_command(action, state, store, json).await
        }
        Commands::Completions { .. } => unreachable!("handled before any store is opened"),
    }
}
