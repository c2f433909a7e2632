//! Event types for the Conductor execution event bus.
//!
//! `ExecutionEvent` is the unified event type broadcast while a plan runs.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::ExecutionStatus;
use crate::replan::{FailureType, ReplanStrategy};

/// Events emitted during plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A run (fresh or resumed) has started.
    RunStarted {
        execution_id: Uuid,
        plan_id: Uuid,
        total_steps: usize,
        resumed: bool,
    },

    /// A step has been dispatched to its agent.
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        agent: String,
        attempt: u32,
    },

    /// A step completed successfully.
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    /// A step attempt failed.
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        failure_type: FailureType,
        error: String,
        will_retry: bool,
    },

    /// A step was skipped without running (or superseded).
    StepSkipped {
        execution_id: Uuid,
        step_id: String,
        reason: String,
    },

    /// The replanner produced a new plan revision.
    Replanned {
        execution_id: Uuid,
        step_id: String,
        strategy: ReplanStrategy,
        revision: u32,
        affected_steps: Vec<String>,
    },

    /// A checkpoint was written.
    CheckpointSaved {
        execution_id: Uuid,
        checkpoint_id: Uuid,
        progress_percentage: f64,
    },

    /// The run reached a terminal status.
    RunFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
        duration_ms: u64,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::RunStarted { execution_id, .. }
            | ExecutionEvent::StepStarted { execution_id, .. }
            | ExecutionEvent::StepCompleted { execution_id, .. }
            | ExecutionEvent::StepFailed { execution_id, .. }
            | ExecutionEvent::StepSkipped { execution_id, .. }
            | ExecutionEvent::Replanned { execution_id, .. }
            | ExecutionEvent::CheckpointSaved { execution_id, .. }
            | ExecutionEvent::RunFinished { execution_id, .. } => *execution_id,
        }
    }

    /// The step this event concerns, if it is step-scoped.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::StepStarted { step_id, .. }
            | ExecutionEvent::StepCompleted { step_id, .. }
            | ExecutionEvent::StepFailed { step_id, .. }
            | ExecutionEvent::StepSkipped { step_id, .. }
            | ExecutionEvent::Replanned { step_id, .. } => Some(step_id),

            ExecutionEvent::RunStarted { .. }
            | ExecutionEvent::CheckpointSaved { .. }
            | ExecutionEvent::RunFinished { .. } => None,
        }
    }
}
