//! Application state shared by every command.
//!
//! Resolves the data directory and loads the engine configuration once, with
//! command-line overrides applied on top.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use conductor_infra::config::{load_engine_config, load_engine_config_from};
use conductor_infra::filesystem::resolve_data_dir;
use conductor_types::config::{CheckpointBackend, EngineConfig};

use crate::cli::RunOverrides;

#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
}

impl AppState {
    /// Resolve the data directory and load configuration.
    ///
    /// An explicit `config_path` must exist and parse; the default
    /// `{data_dir}/config.toml` falls back to defaults.
    pub async fn init(
        data_dir: Option<PathBuf>,
        config_path: Option<&Path>,
        backend: Option<CheckpointBackend>,
    ) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);

        let mut config = match config_path {
            Some(path) => load_engine_config_from(path)
                .await
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => load_engine_config(&data_dir).await,
        };
        if let Some(backend) = backend {
            config.checkpoint.backend = backend;
        }

        tracing::debug!(
            data_dir = %data_dir.display(),
            backend = ?config.checkpoint.backend,
            "application state initialized"
        );
        Ok(Self { data_dir, config })
    }

    /// Engine configuration with per-run overrides applied.
    pub fn engine_config(&self, overrides: &RunOverrides) -> EngineConfig {
        let mut config = self.config.clone();
        overrides.apply(&mut config.run);
        config
    }
}
