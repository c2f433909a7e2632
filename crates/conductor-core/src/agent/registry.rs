//! Agent registry for runtime agent lookup.
//!
//! A simple name-indexed registry of boxed agents, passed to the executor at
//! construction.

use std::collections::HashMap;

use super::box_agent::BoxAgent;
use super::capability::Agent;

/// Registry of available agents, indexed by the name steps refer to.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, BoxAgent>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under the given name.
    ///
    /// If an agent with this name already exists, it is replaced.
    pub fn register(&mut self, name: impl Into<String>, agent: BoxAgent) {
        self.agents.insert(name.into(), agent);
    }

    /// Builder: register a concrete agent under its own name.
    pub fn with<T: Agent + 'static>(mut self, agent: T) -> Self {
        let boxed = BoxAgent::new(agent);
        self.agents.insert(boxed.name().to_string(), boxed);
        self
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> Option<&BoxAgent> {
        self.agents.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// All registered agent names, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.list_names())
            .finish()
    }
}
