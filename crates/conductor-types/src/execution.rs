//! Execution tracking types: per-step results, run status, and status reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::replan::FailureType;

// ---------------------------------------------------------------------------
// Step status
// ---------------------------------------------------------------------------

/// Status of an individual step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    /// The attempt failed and the step has been re-scheduled.
    Retrying,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Outcome of one step attempt (or of a step that was skipped without running).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
    /// Wall-clock execution time in seconds.
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost: f64,
    /// 1-based attempt number; 0 for steps skipped without running.
    #[serde(default)]
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    /// A result for a step that never ran.
    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: None,
            error: Some(reason.into()),
            failure_type: None,
            execution_time: 0.0,
            tokens_used: 0,
            cost: 0.0,
            attempt: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, StepStatus::Failed | StepStatus::Retrying)
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Overall status of an execution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Coarse phase of a run, reported by status queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    #[default]
    Validating,
    Executing,
    Replanning,
    Checkpointing,
    Finished,
}

/// Snapshot answer to a run status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub execution_id: Uuid,
    pub current_stage: RunStage,
    pub status: ExecutionStatus,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub total_steps: usize,
    /// Seconds since the run started.
    pub elapsed_time: f64,
    pub accumulated_cost: f64,
}

impl RunStatusReport {
    /// Initial report for a run that has not started yet.
    pub fn pending(execution_id: Uuid, total_steps: usize) -> Self {
        Self {
            execution_id,
            current_stage: RunStage::Validating,
            status: ExecutionStatus::Pending,
            completed_count: 0,
            failed_count: 0,
            skipped_count: 0,
            total_steps,
            elapsed_time: 0.0,
            accumulated_cost: 0.0,
        }
    }

    /// Fraction of steps resolved (completed, failed, or skipped), 0.0 to 100.0.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return 100.0;
        }
        let resolved = self.completed_count + self.failed_count + self.skipped_count;
        (resolved as f64 / self.total_steps as f64 * 100.0).min(100.0)
    }
}
