//! Agent trait definition.
//!
//! An agent is the external capability that performs a step's work. The
//! engine only sees the boundary: declared inputs and tool names go in, an
//! output value or a classified error comes out.

use std::collections::HashMap;
use std::time::Duration;

use conductor_types::plan::Step;
use conductor_types::replan::FailureType;
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Request / output
// ---------------------------------------------------------------------------

/// Everything an agent receives for one step attempt.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub step_id: String,
    pub description: String,
    pub inputs: HashMap<String, Value>,
    pub tools: Vec<String>,
    /// Time budget for this attempt; the runner enforces it regardless.
    pub timeout: Duration,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl AgentRequest {
    pub fn for_step(step: &Step, attempt: u32, timeout: Duration) -> Self {
        Self {
            step_id: step.id.clone(),
            description: step.description.clone(),
            inputs: step.inputs.clone(),
            tools: step.tools.clone(),
            timeout,
            attempt,
        }
    }
}

/// Successful agent result.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    pub value: Value,
    /// Tokens actually consumed, when the agent reports them.
    pub tokens_used: Option<u64>,
    /// Actual cost, when the agent reports it.
    pub cost: Option<f64>,
}

impl AgentOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            tokens_used: None,
            cost: None,
        }
    }

    pub fn with_usage(mut self, tokens_used: u64, cost: f64) -> Self {
        self.tokens_used = Some(tokens_used);
        self.cost = Some(cost);
        self
    }
}

// ---------------------------------------------------------------------------
// AgentError
// ---------------------------------------------------------------------------

/// A classified agent failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{failure_type}: {message}")]
pub struct AgentError {
    pub failure_type: FailureType,
    pub message: String,
    /// The agent knows retrying or replanning cannot help.
    pub unrecoverable: bool,
}

impl AgentError {
    pub fn new(failure_type: FailureType, message: impl Into<String>) -> Self {
        Self {
            failure_type,
            message: message.into(),
            unrecoverable: false,
        }
    }

    /// Mark this failure as not recoverable.
    pub fn unrecoverable(mut self) -> Self {
        self.unrecoverable = true;
        self
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        Self::new(FailureType::ToolError, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureType::AgentUnavailable, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureType::ValidationError, message)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Trait for agent capabilities that execute plan steps.
///
/// Uses native async fn in traits (RPITIT). Wrap implementations in
/// [`BoxAgent`](super::box_agent::BoxAgent) to register them by name.
pub trait Agent: Send + Sync {
    /// Name the agent is registered under by default.
    fn name(&self) -> &str;

    /// Execute one step attempt.
    fn execute(
        &self,
        request: &AgentRequest,
    ) -> impl std::future::Future<Output = Result<AgentOutput, AgentError>> + Send;
}
