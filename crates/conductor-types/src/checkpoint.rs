//! Checkpoint records: durable snapshots of run progress.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::execution::StepResult;
use crate::plan::Plan;
use crate::replan::AppliedDecision;

/// Ownership scope for checkpoints, used for listing and cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl CheckpointScope {
    pub fn new(workspace_id: Option<String>, user_id: Option<String>) -> Self {
        Self {
            workspace_id,
            user_id,
        }
    }
}

/// A durable snapshot of an execution run.
///
/// Stored as a JSON blob keyed by `checkpoint_id`. Holds everything needed to
/// rebuild an equivalent in-memory execution context on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: Uuid,
    pub execution_id: Uuid,
    pub plan_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    #[serde(default)]
    pub skipped_steps: Vec<String>,
    pub progress_percentage: f64,
    pub total_cost: f64,
    pub total_tokens: u64,
    /// Accumulated step execution time in seconds.
    pub total_time: f64,
    /// The working plan at checkpoint time (including replanner rewrites).
    pub plan: Plan,
    /// The plan as first handed to the scheduler. Older records lack it and
    /// restore from `plan` alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_plan: Option<Plan>,
    /// Replanning decisions applied before the snapshot, oldest first.
    #[serde(default)]
    pub decisions: Vec<AppliedDecision>,
    #[serde(default)]
    pub step_outputs: HashMap<String, Value>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    /// Arbitrary caller-supplied context.
    #[serde(default)]
    pub context_data: Value,
}

impl CheckpointRecord {
    pub fn scope(&self) -> CheckpointScope {
        CheckpointScope::new(self.workspace_id.clone(), self.user_id.clone())
    }
}

/// Filter for listing checkpoints. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl CheckpointFilter {
    pub fn for_plan(plan_id: Uuid) -> Self {
        Self {
            plan_id: Some(plan_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &CheckpointRecord) -> bool {
        self.plan_id.is_none_or(|id| id == record.plan_id)
            && self.execution_id.is_none_or(|id| id == record.execution_id)
            && self
                .workspace_id
                .as_ref()
                .is_none_or(|w| record.workspace_id.as_ref() == Some(w))
            && self
                .user_id
                .as_ref()
                .is_none_or(|u| record.user_id.as_ref() == Some(u))
    }
}
