//! `echo` agent: returns its request as the step output.
//!
//! Useful for dry runs and demos. A few reserved inputs shape its behavior:
//!
//! | input          | effect                                                   |
//! |----------------|----------------------------------------------------------|
//! | `delay_ms`     | sleep this long before answering                         |
//! | `fail_with`    | fail with this failure type (e.g. `"timeout"`)           |
//! | `fail_attempts`| only fail the first N attempts (default: every attempt)  |

use std::time::Duration;

use conductor_core::agent::{Agent, AgentError, AgentOutput, AgentRequest};
use conductor_types::replan::FailureType;
use serde_json::{Value, json};

pub const ECHO_AGENT_NAME: &str = "echo";

#[derive(Debug, Clone)]
pub struct EchoAgent {
    name: String,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self::named(ECHO_AGENT_NAME)
    }

    /// An echo agent registered under another name, so plans can be dry-run
    /// without their real agents.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn scripted_failure(request: &AgentRequest) -> Result<Option<FailureType>, AgentError> {
        let Some(raw) = request.inputs.get("fail_with") else {
            return Ok(None);
        };
        let failure_type: FailureType = serde_json::from_value(raw.clone())
            .map_err(|e| AgentError::validation(format!("invalid fail_with {raw}: {e}")))?;

        let fail_attempts = request.inputs.get("fail_attempts").and_then(Value::as_u64);
        match fail_attempts {
            Some(n) if u64::from(request.attempt) > n => Ok(None),
            _ => Ok(Some(failure_type)),
        }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentOutput, AgentError> {
        if let Some(ms) = request.inputs.get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if let Some(failure_type) = Self::scripted_failure(request)? {
            tracing::debug!(agent = %self.name, step_id = %request.step_id, %failure_type, "echo failing on request");
            return Err(AgentError::new(
                failure_type,
                format!("echo asked to fail on attempt {}", request.attempt),
            ));
        }

        Ok(AgentOutput::new(json!({
            "agent": self.name,
            "step": request.step_id,
            "attempt": request.attempt,
            "inputs": request.inputs,
            "tools": request.tools,
        })))
    }
}
