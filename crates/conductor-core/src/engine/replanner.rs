//! Replanner: strategy selection and plan rewriting after a step failure.
//!
//! Stateless apart from its configuration. Every decision produces a new
//! `Plan` via [`Plan::derive`]; untouched steps are shared with the input
//! plan and only rewritten steps are copied.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use conductor_types::config::ReplanConfig;
use conductor_types::plan::{Plan, RiskLevel, Step};
use conductor_types::replan::{FailureType, ReplanStrategy, ReplanningDecision, StepFailure};
use tracing::debug;

use super::graph;

// ---------------------------------------------------------------------------
// FailureAnalysis
// ---------------------------------------------------------------------------

/// What a failure means for the rest of the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureAnalysis {
    /// Steps transitively depending on the failed step.
    pub blast_radius: HashSet<String>,
    pub direct_dependents: usize,
    /// Enough direct dependents that skipping the step is unsafe.
    pub on_critical_path: bool,
    pub retries_used: u32,
    pub max_retries: u32,
}

impl FailureAnalysis {
    pub fn has_budget(&self) -> bool {
        self.retries_used < self.max_retries
    }
}

// ---------------------------------------------------------------------------
// Replanner
// ---------------------------------------------------------------------------

/// Chooses and applies a recovery strategy for failed steps.
#[derive(Debug, Clone, Default)]
pub struct Replanner {
    config: ReplanConfig,
    max_retries: HashMap<FailureType, u32>,
}

impl Replanner {
    pub fn new(config: ReplanConfig) -> Self {
        Self {
            config,
            max_retries: HashMap::new(),
        }
    }

    /// Override retry budgets per failure type.
    pub fn with_max_retries(mut self, max_retries: HashMap<FailureType, u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn config(&self) -> &ReplanConfig {
        &self.config
    }

    /// Retry budget for a failure type.
    pub fn max_retries(&self, failure_type: FailureType) -> u32 {
        self.max_retries
            .get(&failure_type)
            .copied()
            .unwrap_or_else(|| failure_type.default_max_retries())
    }

    /// Blast radius, criticality and retry budget for a failure.
    pub fn analyze(&self, plan: &Plan, failure: &StepFailure) -> FailureAnalysis {
        let direct_dependents = graph::dependents(plan, &failure.step_id).len();
        FailureAnalysis {
            blast_radius: graph::blast_radius(plan, &failure.step_id),
            direct_dependents,
            on_critical_path: direct_dependents >= self.config.critical_dependents_threshold,
            retries_used: plan.step(&failure.step_id).map_or(0, |s| s.retry_count),
            max_retries: self.max_retries(failure.failure_type),
        }
    }

    /// Whether any recovery strategy applies to this failure.
    ///
    /// False for unrecoverable failures, for steps not in the plan, and when
    /// the retry budget is spent and no non-retry strategy is viable.
    pub fn should_replan(&self, plan: &Plan, failure: &StepFailure) -> bool {
        self.select_strategy(plan, failure, &HashSet::new()).is_some()
    }

    /// Pick a strategy for `failure`, or `None` when nothing applies.
    pub fn select_strategy(
        &self,
        plan: &Plan,
        failure: &StepFailure,
        completed: &HashSet<String>,
    ) -> Option<ReplanStrategy> {
        if failure.unrecoverable {
            return None;
        }
        let step = plan.step(&failure.step_id)?;
        let allowed = failure.failure_type.default_strategies();
        let analysis = self.analyze(plan, failure);

        if analysis.has_budget() {
            if let Some(strategy) = allowed.iter().copied().find(|s| s.consumes_retry()) {
                return Some(strategy);
            }
        }

        // Without any retry budget the step's dependents must not run, so
        // neither a skip nor a substitute may stand in for it.
        let bypassable = analysis.max_retries > 0 || analysis.direct_dependents == 0;
        let has_alternative = bypassable
            && step.alternative_of.is_none()
            && self.config.alternative_agents.contains_key(&step.agent);
        let can_skip = bypassable && allowed.contains(&ReplanStrategy::Skip);

        if allowed.contains(&ReplanStrategy::AlternativePath)
            && has_alternative
            && (analysis.on_critical_path || !can_skip)
        {
            return Some(ReplanStrategy::AlternativePath);
        }

        if can_skip && !analysis.on_critical_path {
            return Some(ReplanStrategy::Skip);
        }

        let can_reduce = allowed.contains(&ReplanStrategy::ReduceScope);
        let can_abort = allowed.contains(&ReplanStrategy::Abort);
        let unaffected_remain = plan.steps.iter().any(|s| {
            s.id != failure.step_id
                && !analysis.blast_radius.contains(&s.id)
                && !completed.contains(&s.id)
        });

        if can_reduce && (unaffected_remain || !can_abort) {
            Some(ReplanStrategy::ReduceScope)
        } else if can_abort {
            Some(ReplanStrategy::Abort)
        } else {
            None
        }
    }

    /// Produce a decision and modified plan for a failure.
    ///
    /// Returns `None` when [`should_replan`](Self::should_replan) would be false.
    pub fn replan(
        &self,
        plan: &Plan,
        failure: &StepFailure,
        completed: &HashSet<String>,
    ) -> Option<ReplanningDecision> {
        let strategy = self.select_strategy(plan, failure, completed)?;
        let analysis = self.analyze(plan, failure);
        let step = plan.step(&failure.step_id)?;

        let (modified_plan, affected_steps) = match strategy {
            ReplanStrategy::Retry => self.rerun(plan, failure, false),
            ReplanStrategy::Delay => self.rerun(plan, failure, true),
            ReplanStrategy::Skip => skip_step(plan, &failure.step_id),
            ReplanStrategy::AlternativePath => self.substitute(plan, step, failure),
            ReplanStrategy::ReduceScope => reduce_scope(plan, &failure.step_id, &analysis.blast_radius),
            ReplanStrategy::Abort => abort(plan, completed),
        };

        let reasoning = self.reasoning(strategy, failure, step, &analysis);
        debug!(
            step_id = %failure.step_id,
            failure_type = %failure.failure_type,
            strategy = %strategy,
            revision = modified_plan.revision,
            "replanned after step failure"
        );

        Some(ReplanningDecision {
            strategy,
            reasoning,
            confidence: self.confidence(strategy, plan.risk_level),
            estimated_success_probability: self.success_probability(strategy, plan.risk_level),
            modified_plan,
            affected_steps,
        })
    }

    // ---- Heuristics ----

    /// Confidence in a strategy, scaled down for riskier plans. Abort is exempt.
    pub fn confidence(&self, strategy: ReplanStrategy, risk: RiskLevel) -> f64 {
        self.scaled(self.config.confidence.get(strategy), strategy, risk)
    }

    /// Probability the decision leads to a successful continuation.
    pub fn success_probability(&self, strategy: ReplanStrategy, risk: RiskLevel) -> f64 {
        self.scaled(self.config.success_probability.get(strategy), strategy, risk)
    }

    fn scaled(&self, base: f64, strategy: ReplanStrategy, risk: RiskLevel) -> f64 {
        let factor = match strategy {
            ReplanStrategy::Abort => 1.0,
            _ => self.config.risk_factors.get(risk),
        };
        (base * factor).clamp(0.0, 1.0)
    }

    fn reasoning(
        &self,
        strategy: ReplanStrategy,
        failure: &StepFailure,
        step: &Step,
        analysis: &FailureAnalysis,
    ) -> String {
        let head = format!(
            "step '{}' failed with {} ({} of {} retries used, {} dependents downstream)",
            failure.step_id,
            failure.failure_type,
            analysis.retries_used,
            analysis.max_retries,
            analysis.blast_radius.len(),
        );
        let tail = match strategy {
            ReplanStrategy::Retry => "retrying the step".to_string(),
            ReplanStrategy::Delay => {
                format!("retrying after a {}s delay", self.config.delay_secs)
            }
            ReplanStrategy::Skip => {
                "step is not on the critical path; skipping it and letting dependents proceed"
                    .to_string()
            }
            ReplanStrategy::AlternativePath => format!(
                "substituting agent '{}' for '{}'",
                self.config
                    .alternative_agents
                    .get(&step.agent)
                    .map_or("?", String::as_str),
                step.agent
            ),
            ReplanStrategy::ReduceScope => {
                "no safe continuation; dropping the step and everything that depends on it"
                    .to_string()
            }
            ReplanStrategy::Abort => {
                "no safe continuation; abandoning all remaining steps".to_string()
            }
        };
        format!("{head}: {tail}")
    }

    // ---- Plan rewrites ----

    fn rerun(&self, plan: &Plan, failure: &StepFailure, delayed: bool) -> (Plan, Vec<String>) {
        let mut next = plan.derive();
        if let Some(step) = next.step_mut(&failure.step_id) {
            step.retry_count += 1;
            step.last_error = Some(failure.message.clone());
            step.not_before = if delayed {
                let delay = i64::try_from(self.config.delay_secs).unwrap_or(i64::MAX);
                Some(Utc::now() + chrono::Duration::seconds(delay))
            } else {
                None
            };
        }
        (next, vec![failure.step_id.clone()])
    }

    fn substitute(&self, plan: &Plan, step: &Step, failure: &StepFailure) -> (Plan, Vec<String>) {
        let mut next = plan.derive();
        let Some(agent) = self.config.alternative_agents.get(&step.agent) else {
            return (next, vec![]);
        };

        let new_id = unique_id(plan, &format!("{}_alt", step.id));
        let mut alternative = step.clone();
        alternative.id = new_id.clone();
        alternative.agent = agent.clone();
        alternative.estimated_cost *= self.config.alternative_cost_multiplier;
        alternative.estimated_time *= self.config.alternative_time_multiplier;
        alternative.retry_count = 0;
        alternative.last_error = Some(failure.message.clone());
        alternative.not_before = None;
        alternative.outputs.clear();
        alternative.alternative_of = Some(step.id.clone());

        let mut affected = vec![step.id.clone(), new_id.clone()];
        if let Some(slot) = next.index_of(&step.id) {
            next.steps[slot] = alternative.into();
        }
        for dependent in graph::dependents(plan, &step.id) {
            if let Some(s) = next.step_mut(dependent) {
                for dep in s.dependencies.iter_mut().filter(|d| **d == step.id) {
                    *dep = new_id.clone();
                }
            }
            affected.push(dependent.to_string());
        }
        next.recompute_estimates();
        (next, affected)
    }
}

fn skip_step(plan: &Plan, step_id: &str) -> (Plan, Vec<String>) {
    let mut next = plan.derive();
    next.remove_steps(&HashSet::from([step_id.to_string()]));

    let mut affected = vec![step_id.to_string()];
    for dependent in graph::dependents(plan, step_id) {
        if let Some(s) = next.step_mut(dependent) {
            s.dependencies.retain(|d| d != step_id);
        }
        affected.push(dependent.to_string());
    }
    (next, affected)
}

fn reduce_scope(plan: &Plan, step_id: &str, blast_radius: &HashSet<String>) -> (Plan, Vec<String>) {
    let mut removed = blast_radius.clone();
    removed.insert(step_id.to_string());

    let affected = in_plan_order(plan, &removed);
    let mut next = plan.derive();
    next.remove_steps(&removed);
    (next, affected)
}

fn abort(plan: &Plan, completed: &HashSet<String>) -> (Plan, Vec<String>) {
    let removed: HashSet<String> = plan
        .steps
        .iter()
        .filter(|s| !completed.contains(&s.id))
        .map(|s| s.id.clone())
        .collect();

    let affected = in_plan_order(plan, &removed);
    let mut next = plan.derive();
    next.remove_steps(&removed);
    next.risk_level = RiskLevel::Critical;
    (next, affected)
}

fn in_plan_order(plan: &Plan, ids: &HashSet<String>) -> Vec<String> {
    plan.steps
        .iter()
        .filter(|s| ids.contains(&s.id))
        .map(|s| s.id.clone())
        .collect()
}

/// `base`, or `base2`, `base3`, ... if that id is taken.
fn unique_id(plan: &Plan, base: &str) -> String {
    if !plan.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}{n}"))
        .find(|id| !plan.contains(id))
        .unwrap_or_else(|| base.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
