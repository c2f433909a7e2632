//! Cost/budget authority port.
//!
//! The engine does not price work itself. When an agent does not report its
//! own usage, the step runner asks a `CostEstimator` what to book for the
//! attempt.

use conductor_types::plan::Step;

use crate::agent::AgentOutput;

/// Token and cost figures booked for one step attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub tokens: u64,
    pub cost: f64,
}

/// Supplies per-attempt usage for bookkeeping.
pub trait CostEstimator: Send + Sync {
    /// Usage for a successful attempt.
    fn completed(&self, step: &Step, output: &AgentOutput) -> Usage;

    /// Usage for a failed attempt. Defaults to nothing booked.
    fn failed(&self, _step: &Step) -> Usage {
        Usage::default()
    }
}

/// Books whatever the agent reported, falling back to the step's own estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepEstimates;

impl CostEstimator for StepEstimates {
    fn completed(&self, step: &Step, output: &AgentOutput) -> Usage {
        Usage {
            tokens: output.tokens_used.unwrap_or(step.estimated_tokens),
            cost: output.cost.unwrap_or(step.estimated_cost),
        }
    }
}
