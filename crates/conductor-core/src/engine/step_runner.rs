//! Step runner: executes one step attempt against its agent under a timeout.
//!
//! The runner never returns an error. Every outcome, including a missing
//! agent or an expired timeout, is folded into a `StepResult` plus an
//! optional classified `StepFailure` for the replanner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use conductor_types::execution::{StepResult, StepStatus};
use conductor_types::plan::Step;
use conductor_types::replan::{FailureType, StepFailure};
use tracing::debug;

use crate::agent::{AgentError, AgentRegistry, AgentRequest};
use crate::cost::{CostEstimator, StepEstimates};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default step timeout in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Result of one attempt, as delivered back to the scheduler.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    /// Present when the attempt failed.
    pub failure: Option<StepFailure>,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Outcome for a failure that happened outside the agent call (e.g. a
    /// panicked task).
    pub fn failed(step_id: &str, attempt: u32, error: AgentError, elapsed: Duration) -> Self {
        let result = StepResult {
            step_id: step_id.to_string(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.message.clone()),
            failure_type: Some(error.failure_type),
            execution_time: elapsed.as_secs_f64(),
            tokens_used: 0,
            cost: 0.0,
            attempt,
            timestamp: Utc::now(),
        };
        let failure = StepFailure {
            step_id: step_id.to_string(),
            failure_type: error.failure_type,
            message: error.message,
            unrecoverable: error.unrecoverable,
        };
        Self {
            result,
            failure: Some(failure),
        }
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes steps by looking up their agent in the registry.
///
/// Cheap to clone; each spawned step task owns a copy.
#[derive(Clone)]
pub struct StepRunner {
    agents: Arc<AgentRegistry>,
    costs: Arc<dyn CostEstimator>,
}

impl StepRunner {
    /// Create a runner that books the step's own estimates when agents do not
    /// report usage.
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self {
            agents,
            costs: Arc::new(StepEstimates),
        }
    }

    /// Replace the cost estimator.
    pub fn with_cost_estimator(mut self, costs: Arc<dyn CostEstimator>) -> Self {
        self.costs = costs;
        self
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Run one attempt of `step`. `attempt` is 1-based.
    ///
    /// Timeout expiry drops the agent future and reports a `timeout` failure.
    pub async fn run(&self, step: Arc<Step>, attempt: u32, timeout: Duration) -> StepOutcome {
        let started = Instant::now();

        let Some(agent) = self.agents.get(&step.agent).cloned() else {
            let error = AgentError::unavailable(format!(
                "no agent registered under '{}'",
                step.agent
            ));
            return self.failure(&step, attempt, error, started.elapsed());
        };

        let request = AgentRequest::for_step(&step, attempt, timeout);
        debug!(step_id = %step.id, agent = %step.agent, attempt, "dispatching step");

        match tokio::time::timeout(timeout, agent.execute(&request)).await {
            Ok(Ok(output)) => {
                let usage = self.costs.completed(&step, &output);
                StepOutcome {
                    result: StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        output: Some(output.value),
                        error: None,
                        failure_type: None,
                        execution_time: started.elapsed().as_secs_f64(),
                        tokens_used: usage.tokens,
                        cost: usage.cost,
                        attempt,
                        timestamp: Utc::now(),
                    },
                    failure: None,
                }
            }
            Ok(Err(error)) => self.failure(&step, attempt, error, started.elapsed()),
            Err(_) => {
                let error = AgentError::new(
                    FailureType::Timeout,
                    format!("step timed out after {}s", timeout.as_secs_f64()),
                );
                self.failure(&step, attempt, error, started.elapsed())
            }
        }
    }

    fn failure(&self, step: &Step, attempt: u32, error: AgentError, elapsed: Duration) -> StepOutcome {
        let usage = self.costs.failed(step);
        let mut outcome = StepOutcome::failed(&step.id, attempt, error, elapsed);
        outcome.result.tokens_used = usage.tokens;
        outcome.result.cost = usage.cost;
        outcome
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("agents", &self.agents)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
