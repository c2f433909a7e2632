//! Failure classification and replanning decision types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::Plan;

// ---------------------------------------------------------------------------
// FailureType
// ---------------------------------------------------------------------------

/// Classification of a step failure.
///
/// Each type carries a default retry budget and an ordered list of recovery
/// strategies the replanner may choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    AgentUnavailable,
    ToolError,
    DataUnavailable,
    PermissionDenied,
    Timeout,
    CostExceeded,
    ValidationError,
    ExternalServiceError,
}

impl FailureType {
    /// Every failure type, in declaration order.
    pub const ALL: [FailureType; 8] = [
        FailureType::AgentUnavailable,
        FailureType::ToolError,
        FailureType::DataUnavailable,
        FailureType::PermissionDenied,
        FailureType::Timeout,
        FailureType::CostExceeded,
        FailureType::ValidationError,
        FailureType::ExternalServiceError,
    ];

    /// Transient failures are expected to clear up on their own.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureType::Timeout | FailureType::ExternalServiceError
        )
    }

    /// Default maximum number of retries before a non-retry strategy is needed.
    pub fn default_max_retries(self) -> u32 {
        match self {
            FailureType::PermissionDenied | FailureType::CostExceeded => 0,
            FailureType::Timeout | FailureType::ExternalServiceError => 2,
            FailureType::AgentUnavailable | FailureType::DataUnavailable => 2,
            FailureType::ValidationError => 2,
            FailureType::ToolError => 3,
        }
    }

    /// Acceptable recovery strategies, in order of preference.
    pub fn default_strategies(self) -> &'static [ReplanStrategy] {
        use ReplanStrategy::*;
        match self {
            FailureType::AgentUnavailable => &[Retry, AlternativePath, Skip, ReduceScope],
            FailureType::ToolError => &[Retry, AlternativePath, Skip, ReduceScope],
            FailureType::DataUnavailable => &[Delay, Skip, ReduceScope],
            FailureType::PermissionDenied => &[ReduceScope, Abort],
            FailureType::Timeout => &[Retry, AlternativePath, Skip, ReduceScope],
            FailureType::CostExceeded => &[ReduceScope, Abort],
            FailureType::ValidationError => &[Retry, Skip, ReduceScope],
            FailureType::ExternalServiceError => &[Retry, Delay, AlternativePath, Skip],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureType::AgentUnavailable => "agent_unavailable",
            FailureType::ToolError => "tool_error",
            FailureType::DataUnavailable => "data_unavailable",
            FailureType::PermissionDenied => "permission_denied",
            FailureType::Timeout => "timeout",
            FailureType::CostExceeded => "cost_exceeded",
            FailureType::ValidationError => "validation_error",
            FailureType::ExternalServiceError => "external_service_error",
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ReplanStrategy
// ---------------------------------------------------------------------------

/// The recovery action taken after a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanStrategy {
    /// Run the same step again.
    Retry,
    /// Drop the step; dependents proceed without it.
    Skip,
    /// Substitute a clone of the step that uses an alternate agent.
    AlternativePath,
    /// Stop scheduling anything that has not already completed.
    Abort,
    /// Drop the step and everything that transitively depends on it.
    ReduceScope,
    /// Run the same step again, but not before a cool-down has elapsed.
    Delay,
}

impl ReplanStrategy {
    /// Strategies that re-run the failed step and consume retry budget.
    pub fn consumes_retry(self) -> bool {
        matches!(self, ReplanStrategy::Retry | ReplanStrategy::Delay)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReplanStrategy::Retry => "retry",
            ReplanStrategy::Skip => "skip",
            ReplanStrategy::AlternativePath => "alternative_path",
            ReplanStrategy::Abort => "abort",
            ReplanStrategy::ReduceScope => "reduce_scope",
            ReplanStrategy::Delay => "delay",
        }
    }
}

impl std::fmt::Display for ReplanStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepFailure
// ---------------------------------------------------------------------------

/// A classified step failure handed to the replanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_id: String,
    pub failure_type: FailureType,
    pub message: String,
    /// Explicitly marked as not recoverable by the agent.
    #[serde(default)]
    pub unrecoverable: bool,
}

impl StepFailure {
    pub fn new(
        step_id: impl Into<String>,
        failure_type: FailureType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            failure_type,
            message: message.into(),
            unrecoverable: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ReplanningDecision
// ---------------------------------------------------------------------------

/// The replanner's answer to a step failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanningDecision {
    pub strategy: ReplanStrategy,
    /// Human-readable explanation of why this strategy was chosen.
    pub reasoning: String,
    /// A new plan value; the input plan is never edited in place.
    pub modified_plan: Plan,
    /// Confidence in the decision, 0.0 to 1.0.
    pub confidence: f64,
    /// Estimated probability the run succeeds after applying the decision.
    pub estimated_success_probability: f64,
    /// Step IDs removed or rewritten by the decision.
    #[serde(default)]
    pub affected_steps: Vec<String>,
}

/// A replanning decision together with the step failure it answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDecision {
    pub step_id: String,
    pub decided_at: DateTime<Utc>,
    pub decision: ReplanningDecision,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
