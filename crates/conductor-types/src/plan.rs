//! Plan domain types: the DAG of steps handed to the execution engine.
//!
//! A `Plan` is produced upstream (by an external planner) and consumed here as
//! a JSON descriptor. Steps are stored as shared `Arc<Step>` nodes so that a
//! plan derived by the replanner shares every untouched step with its parent
//! and only copies the steps it actually rewrites.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Risk level
// ---------------------------------------------------------------------------

/// Risk classification for a step or a whole plan.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step ID, unique within its plan.
    pub id: String,
    /// Human-readable description of the work.
    #[serde(default)]
    pub description: String,
    /// Name of the agent capability that executes this step.
    pub agent: String,
    /// Ordered tool identifiers made available to the agent.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Declared inputs passed to the agent.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    /// Outputs, populated after the step completes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, Value>,
    /// IDs of steps that must complete before this one may start.
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_tokens: u64,
    #[serde(default)]
    pub estimated_cost: f64,
    /// Estimated wall-clock time in seconds.
    #[serde(default)]
    pub estimated_time: f64,
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Number of times this step has been re-scheduled after a failure.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest instant the step may be dispatched (set by the `delay` strategy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// ID of the step this one replaces (set by the `alternative_path` strategy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_of: Option<String>,
}

impl Step {
    /// Create a step with the given ID and agent and no dependencies.
    pub fn new(id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            agent: agent.into(),
            tools: Vec::new(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            dependencies: Vec::new(),
            estimated_tokens: 0,
            estimated_cost: 0.0,
            estimated_time: 0.0,
            risk_level: RiskLevel::Low,
            retry_count: 0,
            last_error: None,
            not_before: None,
            alternative_of: None,
        }
    }

    /// Builder: set the dependency list.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: add one input value.
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether the step is held back by a not-before timestamp at `now`.
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_some_and(|t| t > now)
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A directed acyclic graph of steps representing one unit of orchestrated work.
///
/// Immutable once handed to the scheduler; the replanner produces new `Plan`
/// values through [`Plan::derive`] instead of editing the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// UUIDv7 plan ID (generated when the descriptor omits one).
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// What the plan is meant to achieve.
    pub goal: String,
    /// Ordered steps. Order is the deterministic dispatch order.
    #[serde(default)]
    pub steps: Vec<Arc<Step>>,
    #[serde(default)]
    pub cost_estimate: f64,
    /// Sum of step time estimates, in seconds.
    #[serde(default)]
    pub total_time_estimate: f64,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Incremented for every plan derived by the replanner.
    #[serde(default)]
    pub revision: u32,
}

impl Plan {
    /// Build a plan from owned steps, computing aggregate estimates.
    ///
    /// The plan risk level is the highest risk level among its steps.
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        let mut plan = Self {
            id: Uuid::now_v7(),
            goal: goal.into(),
            steps: steps.into_iter().map(Arc::new).collect(),
            cost_estimate: 0.0,
            total_time_estimate: 0.0,
            risk_level: RiskLevel::Low,
            requires_approval: false,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            revision: 0,
        };
        plan.recompute_estimates();
        plan.risk_level = plan
            .steps
            .iter()
            .map(|s| s.risk_level)
            .max()
            .unwrap_or_default();
        plan
    }

    /// Look up a step by ID.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id).map(Arc::as_ref)
    }

    /// Whether a step with this ID exists in the plan.
    pub fn contains(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id == id)
    }

    /// Step IDs in plan order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Position of a step in plan order.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Mutable access to one step, copying it only if it is shared.
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps
            .iter_mut()
            .find(|s| s.id == id)
            .map(Arc::make_mut)
    }

    /// Create the next revision of this plan.
    ///
    /// The new plan shares every step node with `self`; callers modify it via
    /// [`Plan::step_mut`] / [`Plan::remove_steps`], which copy on write.
    pub fn derive(&self) -> Plan {
        let mut next = self.clone();
        next.revision = self.revision + 1;
        next
    }

    /// Remove the given steps from the plan. Returns the number removed.
    pub fn remove_steps(&mut self, ids: &HashSet<String>) -> usize {
        let before = self.steps.len();
        self.steps.retain(|s| !ids.contains(&s.id));
        let removed = before - self.steps.len();
        if removed > 0 {
            self.recompute_estimates();
        }
        removed
    }

    /// Recompute `cost_estimate` and `total_time_estimate` from the steps.
    pub fn recompute_estimates(&mut self) {
        self.cost_estimate = self.steps.iter().map(|s| s.estimated_cost).sum();
        self.total_time_estimate = self.steps.iter().map(|s| s.estimated_time).sum();
    }

    /// Total estimated tokens across all steps.
    pub fn estimated_tokens(&self) -> u64 {
        self.steps.iter().map(|s| s.estimated_tokens).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
