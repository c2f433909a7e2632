//! Conductor CLI entry point.
//!
//! Binary name: `cndr`
//!
//! Parses CLI arguments, loads configuration, opens the configured checkpoint
//! backend, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use conductor_core::repository::MemoryCheckpointStore;
use conductor_infra::filesystem::FileCheckpointStore;
use conductor_infra::sqlite::{DatabasePool, SqliteCheckpointStore};
use conductor_types::config::CheckpointBackend;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,conductor=debug",
        _ => "trace",
    };
    if let Err(err) = conductor_observe::init_tracing(filter, cli.otel) {
        eprintln!("Warning: tracing setup failed: {err}");
    }

    // Shell completions don't need configuration or storage
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cndr", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(
        cli.data_dir.clone(),
        cli.config.as_deref(),
        cli.backend.map(Into::into),
    )
    .await?;

    let result = match state.config.checkpoint.backend {
        CheckpointBackend::Sqlite => {
            let pool = DatabasePool::open(&state.data_dir).await?;
            cli::dispatch(cli.command, &state, SqliteCheckpointStore::new(pool), cli.json).await
        }
        CheckpointBackend::Filesystem => {
            let store = FileCheckpointStore::in_data_dir(&state.data_dir);
            cli::dispatch(cli.command, &state, store, cli.json).await
        }
        CheckpointBackend::Memory => {
            cli::dispatch(cli.command, &state, MemoryCheckpointStore::new(), cli.json).await
        }
    };

    conductor_observe::shutdown_tracing();
    result
}
