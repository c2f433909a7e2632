mod support;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use conductor_core::engine::checkpoint::Checkpointer;
use conductor_core::engine::graph::PlanError;
use conductor_core::repository::MemoryCheckpointStore;
use conductor_core::{ExecutorError, PlanExecutor};
use conductor_types::checkpoint::CheckpointScope;
use conductor_types::config::{CheckpointInterval, EngineConfig, ExecutionMode};
use conductor_types::execution::{ExecutionStatus, StepStatus};
use conductor_types::plan::{Plan, Step};
use conductor_types::replan::{FailureType, ReplanStrategy};

use support::{Behavior, Journal, ScriptedAgent, registry};

fn ids(set: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

#[tokio::test]
async fn independent_steps_share_the_pool_and_join_waits_for_both() {
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone()).latency(Duration::from_millis(30));
    let plan = Plan::new(
        "fan-in",
        vec![
            Step::new("A", "worker"),
            Step::new("B", "worker"),
            Step::new("C", "worker").depends_on(["A", "B"]),
        ],
    );
    let mut config = EngineConfig::default();
    config.run.max_concurrent_steps = 2;

    let exec = PlanExecutor::new(registry(agent), MemoryCheckpointStore::new(), &config);
    let ctx = exec.run(plan).await.unwrap();

    assert_eq!(ctx.status, ExecutionStatus::Completed);
    assert_eq!(journal.peak(), 2);

    let starts = journal.starts();
    assert_eq!(starts.len(), 3);
    assert_eq!(&starts[2], "C");
    let c_started = journal.started_at("C").unwrap();
    assert!(journal.finished_ok_at("A").unwrap() < c_started);
    assert!(journal.finished_ok_at("B").unwrap() < c_started);
    // A and B were both in flight before either finished.
    assert!(journal.started_at("B").unwrap() < journal.finished_ok_at("A").unwrap());
}

#[tokio::test(start_paused = true)]
async fn timed_out_step_is_retried_and_completes() {
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone())
        .script("B", &[Behavior::Hang, Behavior::Succeed]);
    let plan = Plan::new(
        "timeout",
        vec![Step::new("A", "worker"), Step::new("B", "worker").depends_on(["A"])],
    );
    let mut config = EngineConfig::default();
    config.run.step_timeout_secs = 5;
    config.run.max_retries_by_failure_type.insert(FailureType::Timeout, 2);

    let exec = PlanExecutor::new(registry(agent), MemoryCheckpointStore::new(), &config);
    let ctx = exec.run(plan).await.unwrap();

    assert_eq!(ctx.status, ExecutionStatus::Completed);
    assert!(ctx.completed.contains("B"));
    assert_eq!(ctx.plan.step("B").unwrap().retry_count, 1);

    let b_results: Vec<_> = ctx.results.iter().filter(|r| r.step_id == "B").collect();
    assert_eq!(b_results.len(), 2);
    assert_eq!(b_results[0].status, StepStatus::Retrying);
    assert_eq!(b_results[0].failure_type, Some(FailureType::Timeout));
    assert_eq!(b_results[1].status, StepStatus::Completed);
    assert_eq!(b_results[1].attempt, 2);
    assert_eq!(ctx.decisions[0].decision.strategy, ReplanStrategy::Retry);
}

#[tokio::test]
async fn permission_denied_fails_step_and_skips_its_dependents() {
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone())
        .script("X", &[Behavior::Fail(FailureType::PermissionDenied)]);
    let plan = Plan::new(
        "denied",
        vec![
            Step::new("X", "worker"),
            Step::new("Y", "worker").depends_on(["X"]),
            Step::new("U", "worker"),
            Step::new("V", "worker").depends_on(["U"]),
        ],
    );
    let mut config = EngineConfig::default();
    config.run.execution_mode = ExecutionMode::Sequential;

    let exec = PlanExecutor::new(registry(agent), MemoryCheckpointStore::new(), &config);
    let ctx = exec.run(plan).await.unwrap();

    assert_eq!(ctx.status, ExecutionStatus::Failed);
    assert_eq!(ids(&ctx.failed), vec!["X"]);
    assert_eq!(ids(&ctx.skipped), vec!["Y"]);
    assert_eq!(ids(&ctx.completed), vec!["U", "V"]);
    assert_eq!(ctx.last_result("Y").unwrap().status, StepStatus::Skipped);
    assert!(journal.started_at("Y").is_none());
    // Zero retry budget: exactly one attempt.
    assert_eq!(journal.starts().iter().filter(|s| *s == "X").count(), 1);
}

#[tokio::test]
async fn zero_budget_failure_skips_dependents_even_when_skip_is_allowed() {
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone())
        .script("F", &[Behavior::Fail(FailureType::ToolError)]);
    let plan = Plan::new(
        "no budget",
        vec![Step::new("F", "worker"), Step::new("S", "worker").depends_on(["F"])],
    );
    let mut config = EngineConfig::default();
    config.run.max_retries_by_failure_type.insert(FailureType::ToolError, 0);
    config
        .replan
        .alternative_agents
        .insert("worker".to_string(), "worker".to_string());

    let exec = PlanExecutor::new(registry(agent), MemoryCheckpointStore::new(), &config);
    let ctx = exec.run(plan).await.unwrap();

    assert_eq!(ctx.status, ExecutionStatus::Failed);
    assert_eq!(ids(&ctx.failed), vec!["F"]);
    assert_eq!(ids(&ctx.skipped), vec!["S"]);
    assert!(ctx.completed.is_empty());
    assert_eq!(journal.starts(), vec!["F"]);
    assert_eq!(ctx.decisions[0].decision.strategy, ReplanStrategy::ReduceScope);
}

#[tokio::test]
async fn unrecoverable_failure_is_not_replanned() {
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone())
        .script("X", &[Behavior::FailUnrecoverable(FailureType::ToolError)]);
    let plan = Plan::new(
        "fatal",
        vec![
            Step::new("X", "worker"),
            Step::new("Y", "worker").depends_on(["X"]),
            Step::new("Z", "worker").depends_on(["Y"]),
        ],
    );

    let exec = PlanExecutor::new(registry(agent), MemoryCheckpointStore::new(), &EngineConfig::default());
    let ctx = exec.run(plan).await.unwrap();

    assert!(ctx.decisions.is_empty());
    assert_eq!(ids(&ctx.failed), vec!["X"]);
    assert_eq!(ids(&ctx.skipped), vec!["Y", "Z"]);
    assert_eq!(ctx.results.len(), 3);
}

#[tokio::test]
async fn resumed_run_matches_uninterrupted_run() {
    let plan = Plan::new(
        "five",
        vec![
            Step::new("s1", "worker"),
            Step::new("s2", "worker").depends_on(["s1"]),
            Step::new("s3", "worker").depends_on(["s2"]),
            Step::new("s4", "worker").depends_on(["s2"]),
            Step::new("s5", "worker").depends_on(["s3", "s4"]),
        ],
    );
    let mut config = EngineConfig::default();
    config.run.execution_mode = ExecutionMode::Sequential;
    config.run.checkpoint_interval = CheckpointInterval::Steps(1);

    // Uninterrupted reference run.
    let reference = {
        let agent = ScriptedAgent::new("worker", Arc::new(Journal::default()));
        let exec = PlanExecutor::new(registry(agent), MemoryCheckpointStore::new(), &config);
        exec.run(plan.clone()).await.unwrap()
    };

    // First process: run to completion, keeping the checkpoint taken after s2.
    let store = Arc::new(MemoryCheckpointStore::new());
    let first = {
        let agent = ScriptedAgent::new("worker", Arc::new(Journal::default()));
        let exec = PlanExecutor::new(registry(agent), store.clone(), &config);
        exec.run(plan.clone()).await.unwrap()
    };
    let after_two = first.checkpoint_ids[1];

    // Second process: fresh executor and agents over the same store.
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone());
    let exec = PlanExecutor::new(registry(agent), store.clone(), &config);
    let resumed = exec.resume(after_two).await.unwrap();

    assert_eq!(journal.starts(), vec!["s3", "s4", "s5"]);
    assert_eq!(resumed.execution_id, first.execution_id);
    assert_eq!(resumed.status, ExecutionStatus::Completed);

    let summary = |ctx: &conductor_core::engine::ExecutionContext| -> Vec<(String, StepStatus)> {
        ctx.results.iter().map(|r| (r.step_id.clone(), r.status)).collect()
    };
    assert_eq!(summary(&resumed), summary(&reference));
    assert_eq!(resumed.results.len(), 5);
}

#[tokio::test]
async fn resume_after_reduce_scope_keeps_original_plan_and_decisions() {
    let plan = Plan::new(
        "denied",
        vec![
            Step::new("X", "worker"),
            Step::new("Y", "worker").depends_on(["X"]),
            Step::new("U", "worker"),
            Step::new("V", "worker").depends_on(["U"]),
        ],
    );
    let mut config = EngineConfig::default();
    config.run.execution_mode = ExecutionMode::Sequential;
    config.run.checkpoint_interval = CheckpointInterval::Steps(1);

    let store = Arc::new(MemoryCheckpointStore::new());
    let first = {
        let agent = ScriptedAgent::new("worker", Arc::new(Journal::default()))
            .script("X", &[Behavior::Fail(FailureType::PermissionDenied)]);
        let exec = PlanExecutor::new(registry(agent), store.clone(), &config);
        exec.run(plan.clone()).await.unwrap()
    };
    assert_eq!(first.decisions.len(), 1);

    // The first checkpoint follows X's failure and the scope reduction.
    let agent = ScriptedAgent::new("worker", Arc::new(Journal::default()));
    let exec = PlanExecutor::new(registry(agent), store, &config);
    let resumed = exec.resume(first.checkpoint_ids[0]).await.unwrap();

    assert_eq!(resumed.original_plan.step_ids(), vec!["X", "Y", "U", "V"]);
    assert_eq!(resumed.plan.step_ids(), vec!["U", "V"]);
    assert_eq!(resumed.decisions.len(), 1);
    assert_eq!(resumed.decisions[0].decision.strategy, ReplanStrategy::ReduceScope);
    assert_eq!(ids(&resumed.failed), vec!["X"]);
    assert_eq!(ids(&resumed.skipped), vec!["Y"]);
    assert_eq!(ids(&resumed.completed), vec!["U", "V"]);
}

#[tokio::test]
async fn resume_from_explicit_checkpoint_sees_same_ready_set() {
    let plan = Plan::new(
        "explicit",
        vec![
            Step::new("a", "worker"),
            Step::new("b", "worker").depends_on(["a"]),
            Step::new("c", "worker").depends_on(["a"]),
            Step::new("d", "worker").depends_on(["b", "c"]),
        ],
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let checkpointer = Checkpointer::new(store.clone());
    let completed = HashSet::from(["a".to_string()]);
    let outputs: HashMap<String, serde_json::Value> =
        HashMap::from([("a".to_string(), serde_json::json!({"step": "a"}))]);

    let id = checkpointer
        .checkpoint(&plan, &completed, &HashSet::new(), &outputs, &CheckpointScope::default())
        .await
        .unwrap();

    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone());
    let mut config = EngineConfig::default();
    config.run.execution_mode = ExecutionMode::Sequential;
    let exec = PlanExecutor::new(registry(agent), store, &config);
    let ctx = exec.resume(id).await.unwrap();

    assert_eq!(journal.starts(), vec!["b", "c", "d"]);
    assert_eq!(ids(&ctx.completed), vec!["a", "b", "c", "d"]);
    assert_eq!(ctx.outputs["a"], serde_json::json!({"step": "a"}));
}

#[tokio::test]
async fn resume_of_unknown_checkpoint_is_an_error() {
    let exec = PlanExecutor::new(
        registry(ScriptedAgent::new("worker", Arc::new(Journal::default()))),
        MemoryCheckpointStore::new(),
        &EngineConfig::default(),
    );
    let err = exec.resume(uuid::Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Checkpoint(_)));
}

#[tokio::test]
async fn cyclic_plan_is_rejected_before_any_step_runs() {
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone());
    let plan = Plan::new(
        "cycle",
        vec![
            Step::new("A", "worker").depends_on(["B"]),
            Step::new("B", "worker").depends_on(["A"]),
        ],
    );

    let exec = PlanExecutor::new(registry(agent), MemoryCheckpointStore::new(), &EngineConfig::default());
    let mut events = exec.event_bus().subscribe();
    let err = exec.run(plan.clone()).await.unwrap_err();

    assert!(matches!(err, ExecutorError::Plan(PlanError::CyclicDependency(_))));
    assert!(matches!(exec.validate(&plan), Err(PlanError::CyclicDependency(_))));
    assert!(journal.entries().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn cancellation_stops_dispatch_and_allows_resume() {
    let journal = Arc::new(Journal::default());
    let agent = ScriptedAgent::new("worker", journal.clone()).latency(Duration::from_millis(50));
    let plan = Plan::new(
        "cancel",
        vec![
            Step::new("a", "worker"),
            Step::new("b", "worker").depends_on(["a"]),
            Step::new("c", "worker").depends_on(["b"]),
        ],
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let exec = PlanExecutor::new(registry(agent), store.clone(), &EngineConfig::default());

    let handle = conductor_core::RunHandle::new();
    let canceller = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let ctx = exec.run_with(plan, &handle).await.unwrap();

    assert_eq!(ctx.status, ExecutionStatus::Cancelled);
    // The in-flight step drained; nothing after it was dispatched.
    assert_eq!(ids(&ctx.completed), vec!["a"]);
    assert_eq!(journal.starts(), vec!["a"]);

    let checkpoint = *ctx.checkpoint_ids.last().unwrap();
    let resumed = exec.resume(checkpoint).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(journal.starts(), vec!["a", "b", "c"]);
}
