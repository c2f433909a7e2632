//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` with `[run]`,
//! `[replan]` and `[checkpoint]` tables. Every field has a default, so an
//! empty file (or no file) yields a working configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::RiskLevel;
use crate::replan::{FailureType, ReplanStrategy};

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub replan: ReplanConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// How ready steps are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One step at a time, in plan order.
    Sequential,
    /// Up to `max_concurrent_steps` at once; the rest queue.
    #[default]
    Parallel,
    /// Batches of each connected component's next ready layer.
    Adaptive,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            "adaptive" => Ok(ExecutionMode::Adaptive),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// When the scheduler takes automatic checkpoints.
///
/// In TOML: `checkpoint_interval = "off"`, `checkpoint_interval = { steps = 3 }`
/// or `checkpoint_interval = { seconds = 60 }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointInterval {
    #[default]
    Off,
    /// After every N committed step results.
    Steps(u32),
    /// When at least N seconds have passed since the last checkpoint.
    Seconds(u64),
}

/// Per-run options recognized by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Overrides for [`FailureType::default_max_retries`].
    #[serde(default)]
    pub max_retries_by_failure_type: HashMap<FailureType, u32>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub checkpoint_interval: CheckpointInterval,
    /// Run plans flagged `requires_approval` without an explicit approval.
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_max_concurrent_steps() -> usize {
    5
}

fn default_step_timeout_secs() -> u64 {
    300
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: default_max_concurrent_steps(),
            step_timeout_secs: default_step_timeout_secs(),
            max_retries_by_failure_type: HashMap::new(),
            execution_mode: ExecutionMode::default(),
            checkpoint_interval: CheckpointInterval::default(),
            auto_approve: false,
        }
    }
}

impl RunConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Retry budget for a failure type (configured override or default).
    pub fn max_retries(&self, failure_type: FailureType) -> u32 {
        self.max_retries_by_failure_type
            .get(&failure_type)
            .copied()
            .unwrap_or_else(|| failure_type.default_max_retries())
    }

    /// Effective concurrency bound for the configured mode.
    pub fn concurrency_limit(&self) -> usize {
        match self.execution_mode {
            ExecutionMode::Sequential => 1,
            _ => self.max_concurrent_steps.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// ReplanConfig
// ---------------------------------------------------------------------------

/// Per-strategy scores in 0.0..=1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyScores {
    pub retry: f64,
    pub skip: f64,
    pub alternative_path: f64,
    pub abort: f64,
    pub reduce_scope: f64,
    pub delay: f64,
}

impl StrategyScores {
    pub fn get(&self, strategy: ReplanStrategy) -> f64 {
        match strategy {
            ReplanStrategy::Retry => self.retry,
            ReplanStrategy::Skip => self.skip,
            ReplanStrategy::AlternativePath => self.alternative_path,
            ReplanStrategy::Abort => self.abort,
            ReplanStrategy::ReduceScope => self.reduce_scope,
            ReplanStrategy::Delay => self.delay,
        }
    }

    fn default_confidence() -> Self {
        Self {
            retry: 0.7,
            skip: 0.6,
            alternative_path: 0.65,
            abort: 0.95,
            reduce_scope: 0.5,
            delay: 0.6,
        }
    }

    fn default_success_probability() -> Self {
        Self {
            retry: 0.6,
            skip: 0.7,
            alternative_path: 0.55,
            abort: 0.9,
            reduce_scope: 0.5,
            delay: 0.55,
        }
    }
}

/// Multipliers applied to scores according to the plan's risk level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl RiskFactors {
    pub fn get(&self, risk: RiskLevel) -> f64 {
        match risk {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
            RiskLevel::Critical => self.critical,
        }
    }
}

impl Default for RiskFactors {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 0.9,
            high: 0.75,
            critical: 0.5,
        }
    }
}

/// Tunable constants for the replanner's heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanConfig {
    /// Direct dependents at or above which a step counts as on the critical path.
    #[serde(default = "default_critical_dependents_threshold")]
    pub critical_dependents_threshold: usize,
    /// Cool-down applied by the `delay` strategy.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Alternate agent per agent name, used by the `alternative_path` strategy.
    #[serde(default)]
    pub alternative_agents: HashMap<String, String>,
    #[serde(default = "default_alternative_cost_multiplier")]
    pub alternative_cost_multiplier: f64,
    #[serde(default = "default_alternative_time_multiplier")]
    pub alternative_time_multiplier: f64,
    #[serde(default = "StrategyScores::default_confidence")]
    pub confidence: StrategyScores,
    #[serde(default = "StrategyScores::default_success_probability")]
    pub success_probability: StrategyScores,
    #[serde(default)]
    pub risk_factors: RiskFactors,
}

fn default_critical_dependents_threshold() -> usize {
    2
}

fn default_delay_secs() -> u64 {
    30
}

fn default_alternative_cost_multiplier() -> f64 {
    1.25
}

fn default_alternative_time_multiplier() -> f64 {
    1.5
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            critical_dependents_threshold: default_critical_dependents_threshold(),
            delay_secs: default_delay_secs(),
            alternative_agents: HashMap::new(),
            alternative_cost_multiplier: default_alternative_cost_multiplier(),
            alternative_time_multiplier: default_alternative_time_multiplier(),
            confidence: StrategyScores::default_confidence(),
            success_probability: StrategyScores::default_success_probability(),
            risk_factors: RiskFactors::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointConfig
// ---------------------------------------------------------------------------

/// Which persistence backend stores checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    Sqlite,
    Filesystem,
    Memory,
}

/// Checkpoint storage and retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Records older than this are eligible for cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

fn default_retention_days() -> u64 {
    7
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::default(),
            retention_days: default_retention_days(),
            workspace_id: None,
            user_id: None,
        }
    }
}

impl CheckpointConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
