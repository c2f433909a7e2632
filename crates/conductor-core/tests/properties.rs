//! Randomized checks over generated plans.
//!
//! Plans are acyclic by construction (each step depends only on steps
//! generated before it) and then shuffled, so plan order is not a
//! topological order. Agent behavior is fixed per step and attempt, which
//! makes sequential runs fully reproducible.

mod support;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use conductor_core::agent::AgentRegistry;
use conductor_core::engine::ExecutionContext;
use conductor_core::repository::MemoryCheckpointStore;
use conductor_core::PlanExecutor;
use conductor_types::config::{CheckpointInterval, EngineConfig, ExecutionMode};
use conductor_types::execution::StepStatus;
use conductor_types::plan::{Plan, Step};
use conductor_types::replan::FailureType;

use support::{Behavior, Entry, Journal, ScriptedAgent, SplitMix64};

const SEEDS: u64 = 40;
const RUN_DEADLINE: Duration = Duration::from_secs(30);

struct Case {
    plan: Plan,
    scripts: HashMap<String, Vec<Behavior>>,
    failure_types: HashMap<String, FailureType>,
}

fn generate(seed: u64) -> Case {
    let mut rng = SplitMix64::new(seed);
    let n = 1 + rng.below(12) as usize;

    let mut steps = Vec::with_capacity(n);
    let mut scripts = HashMap::new();
    let mut failure_types = HashMap::new();
    for i in 0..n {
        let id = format!("s{i}");
        let deps: Vec<String> = (0..i)
            .filter(|_| rng.chance(30))
            .map(|j| format!("s{j}"))
            .collect();
        steps.push(Step::new(id.clone(), "worker").depends_on(deps));

        if rng.chance(35) {
            let failure_type = FailureType::ALL[rng.below(FailureType::ALL.len() as u64) as usize];
            let attempts = 1 + rng.below(4) as usize;
            let behavior = if rng.chance(15) {
                Behavior::FailUnrecoverable(failure_type)
            } else {
                Behavior::Fail(failure_type)
            };
            scripts.insert(id.clone(), vec![behavior; attempts]);
            failure_types.insert(id, failure_type);
        }
    }
    rng.shuffle(&mut steps);

    Case {
        plan: Plan::new(format!("generated-{seed}"), steps),
        scripts,
        failure_types,
    }
}

fn config(mode: ExecutionMode, limit: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.run.execution_mode = mode;
    config.run.max_concurrent_steps = limit;
    config.replan.delay_secs = 0;
    config
        .replan
        .alternative_agents
        .insert("worker".to_string(), "backup".to_string());
    config
}

fn agents(case: &Case, journal: &Arc<Journal>, latency: Duration) -> AgentRegistry {
    let mut worker = ScriptedAgent::new("worker", journal.clone()).latency(latency);
    for (id, script) in &case.scripts {
        worker = worker.script(id, script);
    }
    let backup = ScriptedAgent::new("backup", journal.clone()).latency(latency);
    AgentRegistry::new().with(worker).with(backup)
}

async fn run_case(case: &Case, config: &EngineConfig, journal: &Arc<Journal>) -> ExecutionContext {
    let exec = PlanExecutor::new(
        agents(case, journal, Duration::from_millis(1)),
        MemoryCheckpointStore::new(),
        config,
    );
    tokio::time::timeout(RUN_DEADLINE, exec.run(case.plan.clone()))
        .await
        .expect("run did not terminate")
        .expect("generated plan is valid")
}

/// Every original step reachable downstream of `id`.
fn descendants(plan: &Plan, id: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let mut frontier = vec![id.to_string()];
    while let Some(current) = frontier.pop() {
        for step in &plan.steps {
            if step.dependencies.contains(&current) && out.insert(step.id.clone()) {
                frontier.push(step.id.clone());
            }
        }
    }
    out
}

const MODES: [ExecutionMode; 3] = [
    ExecutionMode::Sequential,
    ExecutionMode::Parallel,
    ExecutionMode::Adaptive,
];

#[tokio::test]
async fn every_run_terminates_with_all_steps_resolved() {
    for seed in 0..SEEDS {
        let case = generate(seed);
        for mode in MODES {
            let journal = Arc::new(Journal::default());
            let ctx = run_case(&case, &config(mode, 3), &journal).await;

            assert!(ctx.status.is_terminal(), "seed {seed} {mode:?}");
            for step in &case.plan.steps {
                assert!(
                    ctx.is_resolved(&step.id),
                    "seed {seed} {mode:?}: {} unresolved",
                    step.id
                );
            }
            assert!(ctx.is_finished());
        }
    }
}

#[tokio::test]
async fn steps_start_only_after_their_dependencies_complete() {
    for seed in 0..SEEDS {
        let case = generate(seed);
        for mode in MODES {
            let journal = Arc::new(Journal::default());
            let ctx = run_case(&case, &config(mode, 4), &journal).await;
            let entries = journal.entries();

            for (pos, entry) in entries.iter().enumerate() {
                let Entry::Started { step_id, .. } = entry else {
                    continue;
                };
                let Some(step) = case.plan.step(step_id) else {
                    continue;
                };
                for dep in &step.dependencies {
                    let finished_before = entries[..pos].iter().any(|e| {
                        matches!(e, Entry::Finished { step_id: id, ok: true } if id == dep)
                    });
                    // A dependency dropped by a skip, or replaced by an
                    // alternative, no longer gates the step.
                    let superseded = ctx.skipped.contains(dep);
                    assert!(
                        finished_before || superseded,
                        "seed {seed} {mode:?}: {step_id} started before {dep}"
                    );
                }
            }
        }
    }
}

#[tokio::test]
async fn in_flight_steps_never_exceed_the_bound() {
    for seed in 0..SEEDS {
        let case = generate(seed);
        for limit in [1, 2, 3] {
            for mode in [ExecutionMode::Parallel, ExecutionMode::Adaptive] {
                let journal = Arc::new(Journal::default());
                run_case(&case, &config(mode, limit), &journal).await;
                assert!(
                    journal.peak() <= limit,
                    "seed {seed} {mode:?}: peak {} over {limit}",
                    journal.peak()
                );
            }
        }
    }
}

#[tokio::test]
async fn dependents_of_failed_steps_are_skipped_without_running() {
    for seed in 0..SEEDS {
        let case = generate(seed);
        for mode in MODES {
            let journal = Arc::new(Journal::default());
            let ctx = run_case(&case, &config(mode, 3), &journal).await;
            let started: HashSet<String> = journal.starts().into_iter().collect();

            for failed in ctx.failed.iter().filter(|id| case.plan.contains(id)) {
                for dependent in descendants(&case.plan, failed) {
                    assert!(
                        ctx.skipped.contains(&dependent),
                        "seed {seed} {mode:?}: {dependent} below failed {failed} not skipped"
                    );
                    assert!(
                        !started.contains(&dependent),
                        "seed {seed} {mode:?}: {dependent} below failed {failed} was started"
                    );
                }
            }

            // Skipped steps with no recorded attempt never reached an agent.
            for id in &ctx.skipped {
                let attempted = ctx.results.iter().any(|r| &r.step_id == id && r.attempt > 0);
                if !attempted {
                    assert!(!started.contains(id), "seed {seed} {mode:?}: {id}");
                }
            }
        }
    }
}

#[tokio::test]
async fn without_retry_budget_nothing_below_a_failing_step_runs() {
    for seed in 0..SEEDS {
        let case = generate(seed);
        for mode in MODES {
            let mut config = config(mode, 3);
            for failure_type in FailureType::ALL {
                config.run.max_retries_by_failure_type.insert(failure_type, 0);
            }
            let journal = Arc::new(Journal::default());
            let ctx = run_case(&case, &config, &journal).await;
            let starts = journal.starts();

            for id in case.scripts.keys() {
                let attempts = starts.iter().filter(|s| *s == id).count();
                assert!(attempts <= 1, "seed {seed} {mode:?}: {id} ran {attempts} times");
                if attempts == 0 {
                    continue;
                }
                for dependent in descendants(&case.plan, id) {
                    assert!(
                        !starts.contains(&dependent),
                        "seed {seed} {mode:?}: {dependent} ran below failing {id}"
                    );
                    assert!(
                        ctx.skipped.contains(&dependent),
                        "seed {seed} {mode:?}: {dependent} below failing {id} not skipped"
                    );
                }
            }
        }
    }
}

#[tokio::test]
async fn retries_stay_within_the_failure_type_budget() {
    for seed in 0..SEEDS {
        let case = generate(seed);
        let config = config(ExecutionMode::Parallel, 3);
        let journal = Arc::new(Journal::default());
        let ctx = run_case(&case, &config, &journal).await;

        for (id, failure_type) in &case.failure_types {
            let budget = config.run.max_retries(*failure_type);
            let retries = ctx
                .results
                .iter()
                .filter(|r| &r.step_id == id && r.status == StepStatus::Retrying)
                .count() as u32;
            assert!(retries <= budget, "seed {seed}: {id} retried {retries} > {budget}");
            if let Some(step) = ctx.plan.step(id) {
                assert!(step.retry_count <= budget, "seed {seed}: {id}");
            }
        }
    }
}

#[tokio::test]
async fn resuming_any_checkpoint_reaches_the_same_outcome() {
    for seed in 0..SEEDS {
        let case = generate(seed);
        let mut config = config(ExecutionMode::Sequential, 1);
        config.run.checkpoint_interval = CheckpointInterval::Steps(1);

        let store = Arc::new(MemoryCheckpointStore::new());
        let exec = PlanExecutor::new(
            agents(&case, &Arc::new(Journal::default()), Duration::ZERO),
            store.clone(),
            &config,
        );
        let full = exec.run(case.plan.clone()).await.expect("valid plan");

        let mut rng = SplitMix64::new(seed ^ 0xC0FF_EE00);
        // The last checkpoint is the final snapshot; it has nothing left to run.
        let resumable = full.checkpoint_ids.len().saturating_sub(1);
        if resumable == 0 {
            continue;
        }
        let pick = full.checkpoint_ids[rng.below(resumable as u64) as usize];

        let record = exec.checkpointer().resume(pick).await.expect("checkpoint saved");
        if !conductor_core::engine::checkpoint::is_resumable(&record) {
            continue;
        }

        let fresh = PlanExecutor::new(
            agents(&case, &Arc::new(Journal::default()), Duration::ZERO),
            store.clone(),
            &config,
        );
        let resumed = fresh.resume(pick).await.expect("resume");

        assert_eq!(resumed.completed, full.completed, "seed {seed}");
        assert_eq!(resumed.failed, full.failed, "seed {seed}");
        assert_eq!(resumed.skipped, full.skipped, "seed {seed}");
    }
}
