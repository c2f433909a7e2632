//! Execution context: the single-owner state of one run.
//!
//! Only the scheduler task mutates an `ExecutionContext`. It is returned to
//! the caller of `run()` when the run ends and can be snapshotted into a
//! `CheckpointRecord` at any commit point.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::execution::{ExecutionStatus, RunStage, RunStatusReport, StepResult};
use conductor_types::plan::{Plan, Step};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::graph;

pub use conductor_types::replan::AppliedDecision;

/// Mutable state of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    /// The working plan, including every replanner rewrite.
    pub plan: Plan,
    /// The plan as first handed to the scheduler.
    pub original_plan: Plan,
    pub completed: HashSet<String>,
    pub failed: HashSet<String>,
    pub skipped: HashSet<String>,
    /// One entry per attempt or skip, in commit order.
    pub results: Vec<StepResult>,
    /// Output value per completed step.
    pub outputs: HashMap<String, Value>,
    pub decisions: Vec<AppliedDecision>,
    /// Accumulated step execution time in seconds.
    pub total_time: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub checkpoint_ids: Vec<Uuid>,
    /// Errors from checkpoints the scheduler attempted on its own.
    pub checkpoint_failures: Vec<String>,
    /// Caller-supplied data carried through checkpoints.
    #[serde(default)]
    pub context_data: Value,
}

impl ExecutionContext {
    /// Create a fresh context for a plan.
    pub fn new(plan: Plan) -> Self {
        Self {
            execution_id: Uuid::now_v7(),
            original_plan: plan.clone(),
            plan,
            completed: HashSet::new(),
            failed: HashSet::new(),
            skipped: HashSet::new(),
            results: Vec::new(),
            outputs: HashMap::new(),
            decisions: Vec::new(),
            total_time: 0.0,
            total_tokens: 0,
            total_cost: 0.0,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            checkpoint_ids: Vec::new(),
            checkpoint_failures: Vec::new(),
            context_data: Value::Null,
        }
    }

    // ---- Queries ----

    /// Whether a step has reached completed, failed or skipped.
    pub fn is_resolved(&self, step_id: &str) -> bool {
        self.completed.contains(step_id)
            || self.failed.contains(step_id)
            || self.skipped.contains(step_id)
    }

    /// Every resolved step id.
    pub fn resolved(&self) -> HashSet<String> {
        self.completed
            .iter()
            .chain(&self.failed)
            .chain(&self.skipped)
            .cloned()
            .collect()
    }

    /// Working-plan step ids that are not resolved yet.
    pub fn unresolved(&self) -> HashSet<String> {
        self.plan
            .steps
            .iter()
            .filter(|s| !self.is_resolved(&s.id))
            .map(|s| s.id.clone())
            .collect()
    }

    /// True once every step of the working plan is resolved.
    pub fn is_finished(&self) -> bool {
        self.plan.steps.iter().all(|s| self.is_resolved(&s.id))
    }

    /// Ready steps of the working plan, excluding skipped ones.
    pub fn ready_steps(&self) -> Vec<Arc<Step>> {
        let ready: HashSet<&str> = graph::ready_steps(&self.plan, &self.completed, &self.failed)
            .into_iter()
            .filter(|s| !self.skipped.contains(&s.id))
            .map(|s| s.id.as_str())
            .collect();
        self.plan
            .steps
            .iter()
            .filter(|s| ready.contains(s.id.as_str()))
            .cloned()
            .collect()
    }

    /// Number of distinct steps this run has known about.
    ///
    /// Steps removed by the replanner stay counted through the resolved sets.
    pub fn total_steps(&self) -> usize {
        let mut ids: HashSet<&str> = self.plan.steps.iter().map(|s| s.id.as_str()).collect();
        ids.extend(self.completed.iter().map(String::as_str));
        ids.extend(self.failed.iter().map(String::as_str));
        ids.extend(self.skipped.iter().map(String::as_str));
        ids.len()
    }

    pub fn progress_percentage(&self) -> f64 {
        let total = self.total_steps();
        if total == 0 {
            return 100.0;
        }
        let resolved = self.completed.len() + self.failed.len() + self.skipped.len();
        (resolved as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Seconds since the run started (or until it finished).
    pub fn elapsed_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// The most recent result committed for a step.
    pub fn last_result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().rev().find(|r| r.step_id == step_id)
    }

    /// Answer to a run status query.
    pub fn status_report(&self, stage: RunStage) -> RunStatusReport {
        RunStatusReport {
            execution_id: self.execution_id,
            current_stage: stage,
            status: self.status,
            completed_count: self.completed.len(),
            failed_count: self.failed.len(),
            skipped_count: self.skipped.len(),
            total_steps: self.total_steps(),
            elapsed_time: self.elapsed_secs(),
            accumulated_cost: self.total_cost,
        }
    }

    // ---- Commits ----

    /// Append a result and add it to the running totals.
    pub fn record(&mut self, result: StepResult) {
        self.total_time += result.execution_time;
        self.total_tokens += result.tokens_used;
        self.total_cost += result.cost;
        self.results.push(result);
    }

    pub fn mark_completed(&mut self, step_id: &str, output: Option<Value>) {
        if let Some(output) = output {
            self.outputs.insert(step_id.to_string(), output);
        }
        self.completed.insert(step_id.to_string());
    }

    pub fn mark_failed(&mut self, step_id: &str) {
        self.failed.insert(step_id.to_string());
    }

    pub fn mark_skipped(&mut self, step_id: &str) {
        self.skipped.insert(step_id.to_string());
    }

    /// Final status once the loop has stopped: completed when nothing failed.
    pub fn finish(&mut self, cancelled: bool) {
        self.status = if cancelled {
            ExecutionStatus::Cancelled
        } else if self.failed.is_empty() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
