//! Graph resolver: plan validation, ready-set computation, and graph queries.
//!
//! Uses `petgraph` to model step dependencies as a directed graph (edge from
//! dependency to dependent). Topological sort detects cycles; a union-find
//! over the undirected edges yields the connected components the adaptive
//! scheduler batches by.

use std::collections::{HashMap, HashSet};

use conductor_types::plan::{Plan, Step};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Plan configuration errors. Always fatal: no step of an invalid plan runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{0}' depends on itself")]
    SelfDependency(String),

    #[error("cyclic dependency involving step '{0}'")]
    CyclicDependency(String),
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Build the dependency graph for a plan, checking ids and references.
fn build_graph(plan: &Plan) -> Result<(DiGraph<&str, ()>, HashMap<&str, NodeIndex>), PlanError> {
    let mut graph = DiGraph::<&str, ()>::with_capacity(plan.steps.len(), 0);
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(plan.steps.len());

    for step in &plan.steps {
        let node = graph.add_node(step.id.as_str());
        if index.insert(step.id.as_str(), node).is_some() {
            return Err(PlanError::DuplicateStep(step.id.clone()));
        }
    }

    for step in &plan.steps {
        let to = index[step.id.as_str()];
        for dep in &step.dependencies {
            if dep == &step.id {
                return Err(PlanError::SelfDependency(step.id.clone()));
            }
            let from = index
                .get(dep.as_str())
                .ok_or_else(|| PlanError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                })?;
            graph.add_edge(*from, to, ());
        }
    }

    Ok((graph, index))
}

/// Validate that a plan's steps form a DAG with unique ids and known references.
pub fn validate(plan: &Plan) -> Result<(), PlanError> {
    let (graph, _) = build_graph(plan)?;
    toposort(&graph, None)
        .map_err(|cycle| PlanError::CyclicDependency(graph[cycle.node_id()].to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Ready set
// ---------------------------------------------------------------------------

/// Steps not yet completed or failed whose dependencies have all completed.
///
/// Returned in plan order, which is the deterministic dispatch order.
pub fn ready_steps<'a>(
    plan: &'a Plan,
    completed: &HashSet<String>,
    failed: &HashSet<String>,
) -> Vec<&'a Step> {
    plan.steps
        .iter()
        .filter(|s| !completed.contains(&s.id) && !failed.contains(&s.id))
        .filter(|s| s.dependencies.iter().all(|d| completed.contains(d)))
        .map(|s| &**s)
        .collect()
}

// ---------------------------------------------------------------------------
// Dependents
// ---------------------------------------------------------------------------

/// Direct dependents of a step, in plan order.
pub fn dependents<'a>(plan: &'a Plan, step_id: &str) -> Vec<&'a str> {
    plan.steps
        .iter()
        .filter(|s| s.dependencies.iter().any(|d| d == step_id))
        .map(|s| s.id.as_str())
        .collect()
}

/// Every step that transitively depends on `step_id` (excluding the step itself).
pub fn blast_radius(plan: &Plan, step_id: &str) -> HashSet<String> {
    let roots = HashSet::from([step_id.to_string()]);
    downstream_of(plan, &roots)
}

/// Every step with an ancestor in `roots`, excluding the roots themselves.
fn downstream_of(plan: &Plan, roots: &HashSet<String>) -> HashSet<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &plan.steps {
        for dep in &step.dependencies {
            children.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut visited = HashSet::new();
    let mut stack: Vec<&str> = roots.iter().map(String::as_str).collect();
    while let Some(current) = stack.pop() {
        if let Some(next) = children.get(current) {
            for child in next {
                if !roots.contains(*child) && visited.insert(child.to_string()) {
                    stack.push(child);
                }
            }
        }
    }
    visited
}

/// Unresolved steps that can never run because an ancestor failed or was skipped.
///
/// `blocked_by` holds the failed and skipped step ids; `resolved` holds every
/// step already completed, failed or skipped. The result excludes `resolved`.
pub fn blocked_steps(
    plan: &Plan,
    blocked_by: &HashSet<String>,
    resolved: &HashSet<String>,
) -> HashSet<String> {
    downstream_of(plan, blocked_by)
        .into_iter()
        .filter(|id| !resolved.contains(id))
        .collect()
}

// ---------------------------------------------------------------------------
// Layers and components
// ---------------------------------------------------------------------------

/// Group steps into depth layers where every step in a layer depends only on
/// earlier layers. Index 0 holds the root steps.
pub fn execution_layers(plan: &Plan) -> Result<Vec<Vec<&Step>>, PlanError> {
    if plan.steps.is_empty() {
        return Ok(vec![]);
    }

    let (graph, _) = build_graph(plan)?;
    let sorted = toposort(&graph, None)
        .map_err(|cycle| PlanError::CyclicDependency(graph[cycle.node_id()].to_string()))?;

    let by_id: HashMap<&str, &Step> = plan.steps.iter().map(|s| (s.id.as_str(), &**s)).collect();
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let id = graph[node];
        let depth = by_id[id]
            .dependencies
            .iter()
            .map(|d| depths.get(d.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<&Step>> = vec![vec![]; max_depth + 1];
    for step in &plan.steps {
        layers[depths[step.id.as_str()]].push(&**step);
    }
    Ok(layers)
}

/// Weakly connected components of the sub-graph induced by `unresolved`.
///
/// Components are ordered by the plan position of their first step; steps
/// inside a component keep plan order.
pub fn components<'a>(plan: &'a Plan, unresolved: &HashSet<String>) -> Vec<Vec<&'a Step>> {
    let members: Vec<&Step> = plan
        .steps
        .iter()
        .filter(|s| unresolved.contains(&s.id))
        .map(|s| &**s)
        .collect();
    let position: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut sets = UnionFind::<usize>::new(members.len());
    for (i, step) in members.iter().enumerate() {
        for dep in &step.dependencies {
            if let Some(&j) = position.get(dep.as_str()) {
                sets.union(i, j);
            }
        }
    }

    let mut order: Vec<usize> = Vec::new();
    let mut grouped: HashMap<usize, Vec<&Step>> = HashMap::new();
    for (i, step) in members.iter().enumerate() {
        let root = sets.find(i);
        let group = grouped.entry(root).or_insert_with(|| {
            order.push(root);
            Vec::new()
        });
        group.push(*step);
    }

    order
        .into_iter()
        .filter_map(|root| grouped.remove(&root))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a step with given ID and dependencies.
    fn step(id: &str, deps: &[&str]) -> Step {
        Step::new(id, "test-agent").depends_on(deps.iter().copied())
    }

    fn plan(steps: Vec<Step>) -> Plan {
        Plan::new("test", steps)
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn ids(steps: &[&Step]) -> Vec<String> {
        steps.iter().map(|s| s.id.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_validate_dag_valid() {
        let p = plan(vec![step("a", &[]), step("b", &["a"])]);
        assert!(validate(&p).is_ok());
    }

    #[test]
    fn test_validate_three_cycle() {
        let p = plan(vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])]);
        let err = validate(&p).unwrap_err();
        assert!(matches!(err, PlanError::CyclicDependency(_)));
        assert!(err.to_string().contains("cyclic dependency"));
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let p = plan(vec![step("a", &["missing"])]);
        let err = validate(&p).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownDependency {
                step: "a".to_string(),
                dependency: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_validate_self_dependency() {
        let p = plan(vec![step("a", &["a"])]);
        assert_eq!(validate(&p).unwrap_err(), PlanError::SelfDependency("a".to_string()));
    }

    #[test]
    fn test_validate_duplicate_id() {
        let p = plan(vec![step("a", &[]), step("a", &[])]);
        assert_eq!(validate(&p).unwrap_err(), PlanError::DuplicateStep("a".to_string()));
    }

    #[test]
    fn test_validate_empty_plan() {
        assert!(validate(&plan(vec![])).is_ok());
    }

    // -----------------------------------------------------------------------
    // Ready set
    // -----------------------------------------------------------------------

    #[test]
    fn test_ready_steps_roots_first() {
        let p = plan(vec![step("a", &[]), step("b", &["a"]), step("c", &[])]);
        let ready = ready_steps(&p, &HashSet::new(), &HashSet::new());
        assert_eq!(ids(&ready), vec!["a", "c"]);
    }

    #[test]
    fn test_ready_steps_requires_all_dependencies() {
        // A -> {B, C} -> D
        let p = plan(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        let ready = ready_steps(&p, &set(&["a", "b"]), &HashSet::new());
        assert_eq!(ids(&ready), vec!["c"]);

        let ready = ready_steps(&p, &set(&["a", "b", "c"]), &HashSet::new());
        assert_eq!(ids(&ready), vec!["d"]);
    }

    #[test]
    fn test_ready_steps_failed_dependency_blocks() {
        let p = plan(vec![step("a", &[]), step("b", &["a"])]);
        let ready = ready_steps(&p, &HashSet::new(), &set(&["a"]));
        assert!(ready.is_empty());
    }

    // -----------------------------------------------------------------------
    // Dependents and blast radius
    // -----------------------------------------------------------------------

    #[test]
    fn test_dependents_direct_only() {
        let p = plan(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        assert_eq!(dependents(&p, "a"), vec!["b"]);
        assert!(dependents(&p, "c").is_empty());
    }

    #[test]
    fn test_blast_radius_transitive() {
        let p = plan(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("d", &[]),
        ]);
        assert_eq!(blast_radius(&p, "a"), set(&["b", "c"]));
        assert!(blast_radius(&p, "d").is_empty());
        assert!(blast_radius(&p, "nonexistent").is_empty());
    }

    #[test]
    fn test_blocked_steps_excludes_resolved() {
        let p = plan(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("x", &[]),
            step("y", &["x"]),
        ]);
        let blocked = blocked_steps(&p, &set(&["a"]), &set(&["a", "b"]));
        assert_eq!(blocked, set(&["c"]));
    }

    // -----------------------------------------------------------------------
    // Layers and components
    // -----------------------------------------------------------------------

    #[test]
    fn test_execution_layers_fork_join() {
        //     A
        //    / \
        //   B   C
        //   |   |
        //   D   E
        //    \ /
        //     F
        let p = plan(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b"]),
            step("e", &["c"]),
            step("f", &["d", "e"]),
        ]);
        let layers = execution_layers(&p).unwrap();
        assert_eq!(layers.len(), 4);
        assert_eq!(ids(&layers[0]), vec!["a"]);
        assert_eq!(ids(&layers[1]), vec!["b", "c"]);
        assert_eq!(ids(&layers[2]), vec!["d", "e"]);
        assert_eq!(ids(&layers[3]), vec!["f"]);
    }

    #[test]
    fn test_execution_layers_rejects_cycle() {
        let p = plan(vec![step("a", &["b"]), step("b", &["a"])]);
        assert!(execution_layers(&p).is_err());
    }

    #[test]
    fn test_components_split_disconnected_chains() {
        let p = plan(vec![
            step("a1", &[]),
            step("b1", &[]),
            step("a2", &["a1"]),
            step("b2", &["b1"]),
            step("solo", &[]),
        ]);
        let all = set(&["a1", "a2", "b1", "b2", "solo"]);
        let comps = components(&p, &all);
        assert_eq!(comps.len(), 3);
        assert_eq!(ids(&comps[0]), vec!["a1", "a2"]);
        assert_eq!(ids(&comps[1]), vec!["b1", "b2"]);
        assert_eq!(ids(&comps[2]), vec!["solo"]);
    }

    #[test]
    fn test_components_ignore_resolved_links() {
        // Once "hub" is resolved, its two dependents become separate components.
        let p = plan(vec![step("hub", &[]), step("x", &["hub"]), step("y", &["hub"])]);
        let comps = components(&p, &set(&["x", "y"]));
        assert_eq!(comps.len(), 2);
    }
}
