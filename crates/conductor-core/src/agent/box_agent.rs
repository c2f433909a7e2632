//! BoxAgent -- object-safe dynamic dispatch wrapper for Agent.
//!
//! 1. Define an object-safe `AgentDyn` trait with boxed futures
//! 2. Blanket-impl `AgentDyn` for all `T: Agent`
//! 3. `BoxAgent` wraps `Arc<dyn AgentDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::capability::{Agent, AgentError, AgentOutput, AgentRequest};

/// Object-safe version of [`Agent`] with boxed futures.
pub trait AgentDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        request: &'a AgentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AgentOutput, AgentError>> + Send + 'a>>;
}

/// Blanket implementation: any `Agent` automatically implements `AgentDyn`.
impl<T: Agent> AgentDyn for T {
    fn name(&self) -> &str {
        Agent::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        request: &'a AgentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AgentOutput, AgentError>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Type-erased agent for runtime lookup by name.
///
/// Cloning is cheap (shared pointer), so the scheduler can hand a copy to
/// every spawned step task.
#[derive(Clone)]
pub struct BoxAgent {
    inner: Arc<dyn AgentDyn>,
}

impl BoxAgent {
    /// Wrap a concrete `Agent` in a type-erased box.
    pub fn new<T: Agent + 'static>(agent: T) -> Self {
        Self {
            inner: Arc::new(agent),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(&self, request: &AgentRequest) -> Result<AgentOutput, AgentError> {
        self.inner.execute_boxed(request).await
    }
}

impl std::fmt::Debug for BoxAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAgent").field("name", &self.name()).finish()
    }
}
