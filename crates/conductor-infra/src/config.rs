//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.conductor/` in production)
//! and deserializes it into [`EngineConfig`]. [`load_engine_config`] falls back
//! to defaults when the file is missing or malformed; the strict variants
//! report the problem instead.

use std::path::{Path, PathBuf};

use conductor_types::config::EngineConfig;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parse and check a TOML document.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.run.max_concurrent_steps == 0 {
        return Err(ConfigError::Invalid(
            "run.max_concurrent_steps must be at least 1".to_string(),
        ));
    }
    if config.run.step_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "run.step_timeout_secs must be at least 1".to_string(),
        ));
    }
    for (name, scores) in [
        ("confidence", &config.replan.confidence),
        ("success_probability", &config.replan.success_probability),
    ] {
        let all = [
            scores.retry,
            scores.skip,
            scores.alternative_path,
            scores.abort,
            scores.reduce_scope,
            scores.delay,
        ];
        if all.iter().any(|s| !(0.0..=1.0).contains(s)) {
            return Err(ConfigError::Invalid(format!(
                "replan.{name} scores must lie in 0.0..=1.0"
            )));
        }
    }
    Ok(())
}

/// Load configuration from an explicit file, failing on any problem.
pub async fn load_engine_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_engine_config(&content)
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or invalid file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    match load_engine_config_from(&config_path).await {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            EngineConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err} ({}), using defaults", config_path.display());
            EngineConfig::default()
        }
    }
}
