//! Checkpointer: snapshot and restore of run state through a `CheckpointStore`.
//!
//! A checkpoint carries the working plan (including replanner rewrites), the
//! original plan and applied decisions, the resolved step sets, outputs and
//! per-step results, so a restored
//! `ExecutionContext` computes exactly the ready set the interrupted run
//! would have computed next.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use conductor_types::checkpoint::{CheckpointFilter, CheckpointRecord, CheckpointScope};
use conductor_types::config::CheckpointConfig;
use conductor_types::plan::Plan;
use serde_json::Value;
use uuid::Uuid;

use crate::repository::checkpoint::CheckpointStore;

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default checkpoint retention (7 days).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// ---------------------------------------------------------------------------
// Checkpointer
// ---------------------------------------------------------------------------

/// Saves and loads checkpoint records.
///
/// Generic over `S: CheckpointStore` so it works with any backend (SQLite,
/// filesystem, in-memory).
pub struct Checkpointer<S: CheckpointStore> {
    store: S,
    scope: CheckpointScope,
    retention: Duration,
}

impl<S: CheckpointStore> Checkpointer<S> {
    /// Create a checkpointer with no scope and the default retention.
    pub fn new(store: S) -> Self {
        Self {
            store,
            scope: CheckpointScope::default(),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Create a checkpointer using the scope and retention from configuration.
    pub fn with_config(store: S, config: &CheckpointConfig) -> Self {
        Self {
            store,
            scope: CheckpointScope::new(config.workspace_id.clone(), config.user_id.clone()),
            retention: config.retention(),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scope(&self) -> &CheckpointScope {
        &self.scope
    }

    // -----------------------------------------------------------------------
    // Save
    // -----------------------------------------------------------------------

    /// Snapshot a plan and its progress under the given scope.
    pub async fn checkpoint(
        &self,
        plan: &Plan,
        completed: &HashSet<String>,
        failed: &HashSet<String>,
        outputs: &HashMap<String, Value>,
        scope: &CheckpointScope,
    ) -> Result<Uuid, CheckpointError> {
        let mut ctx = ExecutionContext::new(plan.clone());
        ctx.completed = completed.clone();
        ctx.failed = failed.clone();
        ctx.outputs = outputs.clone();
        let record = build_record(&ctx, scope);
        self.save(record).await
    }

    /// Snapshot a live execution context under this checkpointer's scope.
    pub async fn checkpoint_context(&self, ctx: &ExecutionContext) -> Result<Uuid, CheckpointError> {
        let record = build_record(ctx, &self.scope);
        self.save(record).await
    }

    async fn save(&self, record: CheckpointRecord) -> Result<Uuid, CheckpointError> {
        let checkpoint_id = record.checkpoint_id;
        self.store
            .put(&record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            checkpoint_id = %checkpoint_id,
            execution_id = %record.execution_id,
            progress = record.progress_percentage,
            "checkpoint saved"
        );
        Ok(checkpoint_id)
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Load a checkpoint record.
    pub async fn resume(&self, checkpoint_id: Uuid) -> Result<CheckpointRecord, CheckpointError> {
        self.store
            .get(&checkpoint_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::NotFound(checkpoint_id))
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    pub async fn list(
        &self,
        filter: &CheckpointFilter,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        self.store
            .list(filter, limit)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Delete a checkpoint. Returns `true` if it existed.
    pub async fn delete(&self, checkpoint_id: Uuid) -> Result<bool, CheckpointError> {
        self.store
            .delete(&checkpoint_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Delete checkpoints in this checkpointer's scope older than `max_age`.
    pub async fn cleanup(&self, max_age: Duration) -> Result<u64, CheckpointError> {
        let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let filter = CheckpointFilter {
            workspace_id: self.scope.workspace_id.clone(),
            user_id: self.scope.user_id.clone(),
            ..Default::default()
        };

        let deleted = self
            .store
            .delete_older_than(cutoff, &filter)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::info!(deleted, max_age_secs = max_age.as_secs(), "checkpoint cleanup");
        Ok(deleted)
    }

    /// Cleanup using the configured retention.
    pub async fn cleanup_default(&self) -> Result<u64, CheckpointError> {
        self.cleanup(self.retention).await
    }
}

/// Rebuild an execution context from a record.
pub fn restore(record: CheckpointRecord) -> ExecutionContext {
    let mut ctx = ExecutionContext::new(record.plan);
    if let Some(original) = record.original_plan {
        ctx.original_plan = original;
    }
    ctx.execution_id = record.execution_id;
    ctx.decisions = record.decisions;
    ctx.completed = record.completed_steps.into_iter().collect();
    ctx.failed = record.failed_steps.into_iter().collect();
    ctx.skipped = record.skipped_steps.into_iter().collect();
    ctx.outputs = record.step_outputs;
    ctx.results = record.step_results;
    ctx.total_cost = record.total_cost;
    ctx.total_tokens = record.total_tokens;
    ctx.total_time = record.total_time;
    ctx.checkpoint_ids = vec![record.checkpoint_id];
    ctx.context_data = record.context_data;
    ctx
}

/// Sort ids into plan order first, then any ids no longer in the plan.
fn ordered(plan: &Plan, ids: &HashSet<String>) -> Vec<String> {
    let mut out: Vec<String> = plan
        .steps
        .iter()
        .filter(|s| ids.contains(&s.id))
        .map(|s| s.id.clone())
        .collect();
    let mut rest: Vec<String> = ids.iter().filter(|id| !plan.contains(id)).cloned().collect();
    rest.sort();
    out.extend(rest);
    out
}

fn build_record(ctx: &ExecutionContext, scope: &CheckpointScope) -> CheckpointRecord {
    CheckpointRecord {
        checkpoint_id: Uuid::now_v7(),
        execution_id: ctx.execution_id,
        plan_id: ctx.plan.id,
        workspace_id: scope.workspace_id.clone(),
        user_id: scope.user_id.clone(),
        created_at: Utc::now(),
        completed_steps: ordered(&ctx.plan, &ctx.completed),
        failed_steps: ordered(&ctx.plan, &ctx.failed),
        skipped_steps: ordered(&ctx.plan, &ctx.skipped),
        progress_percentage: ctx.progress_percentage(),
        total_cost: ctx.total_cost,
        total_tokens: ctx.total_tokens,
        total_time: ctx.total_time,
        plan: ctx.plan.clone(),
        original_plan: Some(ctx.original_plan.clone()),
        decisions: ctx.decisions.clone(),
        step_outputs: ctx.outputs.clone(),
        step_results: ctx.results.clone(),
        context_data: ctx.context_data.clone(),
    }
}

/// Whether a checkpointed run still has unresolved steps to resume.
pub fn is_resumable(record: &CheckpointRecord) -> bool {
    let resolved: HashSet<&str> = record
        .completed_steps
        .iter()
        .chain(&record.failed_steps)
        .chain(&record.skipped_steps)
        .map(String::as_str)
        .collect();
    record
        .plan
        .steps
        .iter()
        .any(|s| !resolved.contains(s.id.as_str()))
}

// ---------------------------------------------------------------------------
// CheckpointError
// ---------------------------------------------------------------------------

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying store failure.
    #[error("checkpoint store error: {0}")]
    Repository(String),

    /// No checkpoint with this ID.
    #[error("checkpoint not found: {0}")]
    NotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
