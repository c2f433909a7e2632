//! Plan executor: dependency-aware scheduling with replanning and checkpoints.
//!
//! A single scheduler task owns the `ExecutionContext`. Step attempts run as
//! tasks on a `tokio::JoinSet` and report back through `join_next_with_id`;
//! every state change (completion, failure, replan, skip) is committed by
//! the scheduler between two awaits, so status queries and checkpoints
//! always observe a consistent snapshot.
//!
//! # Execution flow
//!
//! 1. Validate the plan (unique ids, known dependencies, no cycles).
//! 2. Skip every step whose ancestor failed or was skipped.
//! 3. Dispatch ready steps up to the concurrency bound.
//! 4. Commit each outcome; failures go through the replanner, which may
//!    swap in a new plan revision.
//! 5. Checkpoint on the configured cadence or when requested.
//! 6. Stop when every step is resolved or the run is cancelled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use conductor_types::config::{CheckpointInterval, EngineConfig, ExecutionMode, RunConfig};
use conductor_types::event::ExecutionEvent;
use conductor_types::execution::{
    ExecutionStatus, RunStage, RunStatusReport, StepResult, StepStatus,
};
use conductor_types::plan::{Plan, Step};
use conductor_types::replan::{ReplanStrategy, ReplanningDecision};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentError, AgentRegistry};
use crate::cost::CostEstimator;
use crate::event::EventBus;
use crate::repository::checkpoint::{CheckpointStore, MemoryCheckpointStore};

use super::checkpoint::{CheckpointError, Checkpointer, restore};
use super::context::{AppliedDecision, ExecutionContext};
use super::graph::{self, PlanError};
use super::replanner::Replanner;
use super::step_runner::{StepOutcome, StepRunner};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that stop a run before or instead of producing an execution context.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("plan {plan_id} requires approval; rerun with auto-approve enabled")]
    ApprovalRequired { plan_id: Uuid },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("checkpoint {0} has no unresolved steps left to run")]
    NothingToResume(Uuid),
}

// ---------------------------------------------------------------------------
// RunHandle
// ---------------------------------------------------------------------------

/// Caller-side handle to a run: cancellation, status queries and on-demand
/// checkpoints.
///
/// Clone it before passing it to [`PlanExecutor::run_with`] to keep control
/// of the run from another task.
#[derive(Clone)]
pub struct RunHandle {
    cancel: CancellationToken,
    status: Arc<watch::Sender<RunStatusReport>>,
    checkpoint_requested: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunStatusReport::pending(Uuid::nil(), 0));
        Self {
            cancel: CancellationToken::new(),
            status: Arc::new(tx),
            checkpoint_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop dispatching new steps. In-flight steps finish or time out.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The latest status report published by the scheduler.
    pub fn status(&self) -> RunStatusReport {
        self.status.borrow().clone()
    }

    /// Watch status reports as the scheduler publishes them.
    pub fn subscribe(&self) -> watch::Receiver<RunStatusReport> {
        self.status.subscribe()
    }

    /// Ask the scheduler to checkpoint at its next commit point.
    pub fn request_checkpoint(&self) {
        self.checkpoint_requested.store(true, Ordering::SeqCst);
    }

    fn take_checkpoint_request(&self) -> bool {
        self.checkpoint_requested.swap(false, Ordering::SeqCst)
    }

    fn publish(&self, report: RunStatusReport) {
        self.status.send_replace(report);
    }
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("cancelled", &self.is_cancelled())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PlanExecutor
// ---------------------------------------------------------------------------

/// Runs plans to completion against an agent registry.
pub struct PlanExecutor<S: CheckpointStore = MemoryCheckpointStore> {
    runner: StepRunner,
    replanner: Replanner,
    checkpointer: Arc<Checkpointer<S>>,
    event_bus: EventBus,
    config: RunConfig,
}

/// Bookkeeping for one spawned attempt.
struct InFlight {
    step_id: String,
    attempt: u32,
    started: Instant,
}

/// Checkpoint cadence tracking across commits.
struct Cadence {
    commits: u32,
    last: Instant,
}

impl<S: CheckpointStore> PlanExecutor<S> {
    /// Build an executor from the engine configuration.
    pub fn new(agents: AgentRegistry, store: S, config: &EngineConfig) -> Self {
        let replanner = Replanner::new(config.replan.clone())
            .with_max_retries(config.run.max_retries_by_failure_type.clone());
        Self {
            runner: StepRunner::new(Arc::new(agents)),
            replanner,
            checkpointer: Arc::new(Checkpointer::with_config(store, &config.checkpoint)),
            event_bus: EventBus::default(),
            config: config.run.clone(),
        }
    }

    /// Publish events on a shared bus instead of a private one.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_cost_estimator(mut self, costs: Arc<dyn CostEstimator>) -> Self {
        self.runner = self.runner.with_cost_estimator(costs);
        self
    }

    pub fn with_replanner(mut self, replanner: Replanner) -> Self {
        self.replanner = replanner;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn checkpointer(&self) -> &Checkpointer<S> {
        &self.checkpointer
    }

    pub fn replanner(&self) -> &Replanner {
        &self.replanner
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Validate a plan without running it.
    pub fn validate(&self, plan: &Plan) -> Result<(), PlanError> {
        graph::validate(plan)
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run a plan to completion.
    pub async fn run(&self, plan: Plan) -> Result<ExecutionContext, ExecutorError> {
        self.run_with(plan, &RunHandle::new()).await
    }

    /// Run a plan, observing cancellation and status through `handle`.
    ///
    /// Validation errors are returned before any step runs.
    pub async fn run_with(
        &self,
        plan: Plan,
        handle: &RunHandle,
    ) -> Result<ExecutionContext, ExecutorError> {
        self.admit(&plan)?;
        let ctx = ExecutionContext::new(plan);
        self.execute(ctx, handle, false).await
    }

    /// Continue a run from a checkpoint.
    pub async fn resume(&self, checkpoint_id: Uuid) -> Result<ExecutionContext, ExecutorError> {
        self.resume_with(checkpoint_id, &RunHandle::new()).await
    }

    /// Continue a run from a checkpoint, observing `handle`.
    ///
    /// Completed steps are never executed again.
    pub async fn resume_with(
        &self,
        checkpoint_id: Uuid,
        handle: &RunHandle,
    ) -> Result<ExecutionContext, ExecutorError> {
        let record = self.checkpointer.resume(checkpoint_id).await?;
        if !super::checkpoint::is_resumable(&record) {
            return Err(ExecutorError::NothingToResume(checkpoint_id));
        }
        self.admit(&record.plan)?;

        let mut ctx = restore(record);
        ctx.finished_at = None;
        info!(
            execution_id = %ctx.execution_id,
            checkpoint_id = %checkpoint_id,
            completed = ctx.completed.len(),
            "resuming run from checkpoint"
        );
        self.execute(ctx, handle, true).await
    }

    /// Write a checkpoint for a context outside the scheduler loop.
    pub async fn checkpoint(&self, ctx: &ExecutionContext) -> Result<Uuid, ExecutorError> {
        Ok(self.checkpointer.checkpoint_context(ctx).await?)
    }

    fn admit(&self, plan: &Plan) -> Result<(), ExecutorError> {
        graph::validate(plan)?;
        if plan.requires_approval && !self.config.auto_approve {
            return Err(ExecutorError::ApprovalRequired { plan_id: plan.id });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduler loop
    // -----------------------------------------------------------------------

    async fn execute(
        &self,
        mut ctx: ExecutionContext,
        handle: &RunHandle,
        resumed: bool,
    ) -> Result<ExecutionContext, ExecutorError> {
        let run_started = Instant::now();
        ctx.status = ExecutionStatus::Running;
        handle.publish(ctx.status_report(RunStage::Executing));

        info!(
            execution_id = %ctx.execution_id,
            plan_id = %ctx.plan.id,
            steps = ctx.plan.steps.len(),
            mode = ?self.config.execution_mode,
            resumed,
            "run started"
        );
        self.event_bus.publish(ExecutionEvent::RunStarted {
            execution_id: ctx.execution_id,
            plan_id: ctx.plan.id,
            total_steps: ctx.total_steps(),
            resumed,
        });

        let limit = self.config.concurrency_limit();
        let mut tasks: JoinSet<StepOutcome> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, InFlight> = HashMap::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut round: VecDeque<String> = VecDeque::new();
        let mut cadence = Cadence {
            commits: 0,
            last: Instant::now(),
        };
        let mut cancelled = handle.is_cancelled();

        loop {
            self.skip_blocked(&mut ctx);

            if ctx.is_finished() && running.is_empty() {
                break;
            }

            if !cancelled {
                let candidates = self.candidates(&ctx, &running, &mut round);
                for step in candidates {
                    if running.len() >= limit {
                        break;
                    }
                    self.dispatch(&ctx, step, &mut tasks, &mut in_flight, &mut running);
                }
            }

            let next_wake = next_wake(&ctx, &running);

            if running.is_empty() {
                if cancelled {
                    break;
                }
                let Some(wait) = next_wake else {
                    // Unresolved steps with nothing ready or delayed can only
                    // come from a dependency cycle introduced at runtime.
                    let stuck = ctx
                        .plan
                        .steps
                        .iter()
                        .find(|s| !ctx.is_resolved(&s.id))
                        .map(|s| s.id.clone())
                        .unwrap_or_default();
                    return Err(ExecutorError::Plan(PlanError::CyclicDependency(stuck)));
                };
                debug!(execution_id = %ctx.execution_id, wait_ms = wait.as_millis() as u64, "waiting for delayed steps");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = handle.cancel.cancelled() => {
                        cancelled = true;
                        info!(execution_id = %ctx.execution_id, "run cancelled");
                    }
                }
                continue;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let outcome = match joined {
                        Some(Ok((id, outcome))) => {
                            in_flight.remove(&id);
                            outcome
                        }
                        Some(Err(err)) => {
                            let Some(flight) = in_flight.remove(&err.id()) else {
                                warn!(error = %err, "untracked step task failed");
                                continue;
                            };
                            StepOutcome::failed(
                                &flight.step_id,
                                flight.attempt,
                                AgentError::tool_error(format!("step task failed: {err}")),
                                flight.started.elapsed(),
                            )
                        }
                        None => continue,
                    };
                    running.remove(&outcome.result.step_id);
                    self.commit(&mut ctx, outcome, &running, handle);
                    cadence.commits += 1;
                    self.maybe_checkpoint(&mut ctx, &mut cadence, handle).await;
                }
                _ = tokio::time::sleep(next_wake.unwrap_or(Duration::from_secs(3600))), if next_wake.is_some() => {}
                _ = handle.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    info!(
                        execution_id = %ctx.execution_id,
                        in_flight = running.len(),
                        "run cancelled, draining in-flight steps"
                    );
                }
            }
        }

        ctx.finish(cancelled);

        if cancelled || self.config.checkpoint_interval != CheckpointInterval::Off {
            self.save_checkpoint(&mut ctx, handle).await;
        }

        handle.publish(ctx.status_report(RunStage::Finished));
        let duration_ms = run_started.elapsed().as_millis() as u64;
        info!(
            execution_id = %ctx.execution_id,
            status = %ctx.status,
            completed = ctx.completed.len(),
            failed = ctx.failed.len(),
            skipped = ctx.skipped.len(),
            cost = ctx.total_cost,
            duration_ms,
            "run finished"
        );
        self.event_bus.publish(ExecutionEvent::RunFinished {
            execution_id: ctx.execution_id,
            status: ctx.status,
            duration_ms,
            completed: ctx.completed.len(),
            failed: ctx.failed.len(),
            skipped: ctx.skipped.len(),
        });

        Ok(ctx)
    }

    /// Steps to dispatch next, in dispatch order.
    ///
    /// Parallel and sequential modes refill greedily from the ready set.
    /// Adaptive mode works in rounds: one batch holding the ready layer of
    /// every connected component, drained before the next batch is formed.
    /// Batch steps beyond the free slots stay queued in `round`.
    fn candidates(
        &self,
        ctx: &ExecutionContext,
        running: &HashSet<String>,
        round: &mut VecDeque<String>,
    ) -> Vec<Arc<Step>> {
        let now = Utc::now();
        let ready: Vec<Arc<Step>> = ctx
            .ready_steps()
            .into_iter()
            .filter(|s| !running.contains(&s.id) && !s.is_delayed(now))
            .collect();

        match self.config.execution_mode {
            ExecutionMode::Sequential | ExecutionMode::Parallel => ready,
            ExecutionMode::Adaptive => {
                round.retain(|id| {
                    ctx.plan.contains(id) && !ctx.is_resolved(id) && !running.contains(id)
                });
                if round.is_empty() && running.is_empty() {
                    let ready_ids: HashSet<&str> = ready.iter().map(|s| s.id.as_str()).collect();
                    for component in graph::components(&ctx.plan, &ctx.unresolved()) {
                        round.extend(
                            component
                                .iter()
                                .filter(|s| ready_ids.contains(s.id.as_str()))
                                .map(|s| s.id.clone()),
                        );
                    }
                    if !round.is_empty() {
                        debug!(
                            execution_id = %ctx.execution_id,
                            batch = round.len(),
                            "adaptive round formed"
                        );
                    }
                }
                // Only take what fits; the rest of the round waits for a free slot.
                let slots = self.config.concurrency_limit().saturating_sub(running.len());
                let mut batch = Vec::new();
                while batch.len() < slots {
                    let Some(id) = round.pop_front() else {
                        break;
                    };
                    if let Some(step) = ready.iter().find(|s| s.id == id) {
                        batch.push(Arc::clone(step));
                    }
                }
                batch
            }
        }
    }

    fn dispatch(
        &self,
        ctx: &ExecutionContext,
        step: Arc<Step>,
        tasks: &mut JoinSet<StepOutcome>,
        in_flight: &mut HashMap<tokio::task::Id, InFlight>,
        running: &mut HashSet<String>,
    ) {
        let attempt = step.retry_count + 1;
        let step_id = step.id.clone();

        self.event_bus.publish(ExecutionEvent::StepStarted {
            execution_id: ctx.execution_id,
            step_id: step_id.clone(),
            agent: step.agent.clone(),
            attempt,
        });

        let runner = self.runner.clone();
        let timeout = self.config.step_timeout();
        let task = tasks.spawn(async move { runner.run(step, attempt, timeout).await });

        in_flight.insert(
            task.id(),
            InFlight {
                step_id: step_id.clone(),
                attempt,
                started: Instant::now(),
            },
        );
        running.insert(step_id);
    }

    /// Mark every step downstream of a failed or skipped step as skipped.
    fn skip_blocked(&self, ctx: &mut ExecutionContext) {
        let blocked_by: HashSet<String> = ctx.failed.union(&ctx.skipped).cloned().collect();
        if blocked_by.is_empty() {
            return;
        }
        let blocked = graph::blocked_steps(&ctx.plan, &blocked_by, &ctx.resolved());
        if blocked.is_empty() {
            return;
        }

        let ordered: Vec<Arc<Step>> = ctx
            .plan
            .steps
            .iter()
            .filter(|s| blocked.contains(&s.id))
            .cloned()
            .collect();
        for step in ordered {
            let cause = step
                .dependencies
                .iter()
                .find(|d| !ctx.completed.contains(*d))
                .cloned()
                .unwrap_or_default();
            let reason = format!("dependency '{cause}' did not complete");
            self.mark_skipped(ctx, &step.id, reason);
        }
    }

    fn mark_skipped(&self, ctx: &mut ExecutionContext, step_id: &str, reason: String) {
        debug!(execution_id = %ctx.execution_id, step_id, reason = %reason, "step skipped");
        ctx.record(StepResult::skipped(step_id, reason.clone()));
        ctx.mark_skipped(step_id);
        self.event_bus.publish(ExecutionEvent::StepSkipped {
            execution_id: ctx.execution_id,
            step_id: step_id.to_string(),
            reason,
        });
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    fn commit(
        &self,
        ctx: &mut ExecutionContext,
        outcome: StepOutcome,
        running: &HashSet<String>,
        handle: &RunHandle,
    ) {
        let StepOutcome { mut result, failure } = outcome;
        let step_id = result.step_id.clone();

        let Some(failure) = failure else {
            debug!(
                execution_id = %ctx.execution_id,
                step_id = %step_id,
                attempt = result.attempt,
                "step completed"
            );
            let duration_ms = (result.execution_time * 1000.0) as u64;
            let output = result.output.clone();
            if let (Some(value), Some(step)) = (&output, ctx.plan.step_mut(&step_id)) {
                step.outputs = output_map(value);
            }
            ctx.record(result);
            ctx.mark_completed(&step_id, output);
            self.event_bus.publish(ExecutionEvent::StepCompleted {
                execution_id: ctx.execution_id,
                step_id,
                duration_ms,
            });
            handle.publish(ctx.status_report(RunStage::Executing));
            return;
        };

        let error = failure.message.clone();
        let decision = if ctx.plan.contains(&step_id) {
            handle.publish(ctx.status_report(RunStage::Replanning));
            self.replanner.replan(&ctx.plan, &failure, &ctx.completed)
        } else {
            // Removed from the plan while in flight.
            None
        };

        let will_retry = matches!(
            decision.as_ref().map(|d| d.strategy),
            Some(ReplanStrategy::Retry | ReplanStrategy::Delay)
        );

        warn!(
            execution_id = %ctx.execution_id,
            step_id = %step_id,
            failure_type = %failure.failure_type,
            attempt = result.attempt,
            strategy = ?decision.as_ref().map(|d| d.strategy),
            error = %error,
            "step failed"
        );
        self.event_bus.publish(ExecutionEvent::StepFailed {
            execution_id: ctx.execution_id,
            step_id: step_id.clone(),
            failure_type: failure.failure_type,
            error,
            will_retry,
        });

        match decision {
            None => {
                result.status = StepStatus::Failed;
                ctx.record(result);
                ctx.mark_failed(&step_id);
            }
            Some(decision) => {
                result.status = match decision.strategy {
                    ReplanStrategy::Retry | ReplanStrategy::Delay => StepStatus::Retrying,
                    ReplanStrategy::Skip | ReplanStrategy::AlternativePath => StepStatus::Skipped,
                    ReplanStrategy::ReduceScope | ReplanStrategy::Abort => StepStatus::Failed,
                };
                match result.status {
                    StepStatus::Skipped => ctx.mark_skipped(&step_id),
                    StepStatus::Failed => ctx.mark_failed(&step_id),
                    _ => {}
                }
                ctx.record(result);
                self.apply(ctx, &step_id, decision, running);
            }
        }

        handle.publish(ctx.status_report(RunStage::Executing));
    }

    /// Swap in the decision's plan and resolve the steps it removed.
    fn apply(
        &self,
        ctx: &mut ExecutionContext,
        step_id: &str,
        decision: ReplanningDecision,
        running: &HashSet<String>,
    ) {
        let removed: Vec<String> = ctx
            .plan
            .steps
            .iter()
            .filter(|s| {
                s.id != step_id
                    && !decision.modified_plan.contains(&s.id)
                    && !ctx.is_resolved(&s.id)
                    && !running.contains(&s.id)
            })
            .map(|s| s.id.clone())
            .collect();

        ctx.plan = decision.modified_plan.clone();
        for id in removed {
            let reason = format!("removed by {} after '{step_id}' failed", decision.strategy);
            self.mark_skipped(ctx, &id, reason);
        }

        info!(
            execution_id = %ctx.execution_id,
            step_id,
            strategy = %decision.strategy,
            revision = ctx.plan.revision,
            confidence = decision.confidence,
            "applied replanning decision"
        );
        self.event_bus.publish(ExecutionEvent::Replanned {
            execution_id: ctx.execution_id,
            step_id: step_id.to_string(),
            strategy: decision.strategy,
            revision: ctx.plan.revision,
            affected_steps: decision.affected_steps.clone(),
        });
        ctx.decisions.push(AppliedDecision {
            step_id: step_id.to_string(),
            decided_at: Utc::now(),
            decision,
        });
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    async fn maybe_checkpoint(
        &self,
        ctx: &mut ExecutionContext,
        cadence: &mut Cadence,
        handle: &RunHandle,
    ) {
        let due = match self.config.checkpoint_interval {
            CheckpointInterval::Off => false,
            CheckpointInterval::Steps(n) => cadence.commits >= n.max(1),
            CheckpointInterval::Seconds(s) => cadence.last.elapsed() >= Duration::from_secs(s),
        };
        if !(due || handle.take_checkpoint_request()) {
            return;
        }
        self.save_checkpoint(ctx, handle).await;
        cadence.commits = 0;
        cadence.last = Instant::now();
    }

    /// Checkpoint failures never abort the run; they are logged and kept on
    /// the context.
    async fn save_checkpoint(&self, ctx: &mut ExecutionContext, handle: &RunHandle) {
        handle.publish(ctx.status_report(RunStage::Checkpointing));
        match self.checkpointer.checkpoint_context(ctx).await {
            Ok(checkpoint_id) => {
                ctx.checkpoint_ids.push(checkpoint_id);
                self.event_bus.publish(ExecutionEvent::CheckpointSaved {
                    execution_id: ctx.execution_id,
                    checkpoint_id,
                    progress_percentage: ctx.progress_percentage(),
                });
            }
            Err(e) => {
                warn!(execution_id = %ctx.execution_id, error = %e, "checkpoint failed");
                ctx.checkpoint_failures.push(e.to_string());
            }
        }
        let stage = if ctx.status.is_terminal() {
            RunStage::Finished
        } else {
            RunStage::Executing
        };
        handle.publish(ctx.status_report(stage));
    }
}

impl<S: CheckpointStore> std::fmt::Debug for PlanExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("runner", &self.runner)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Time until the earliest delayed step whose dependencies are met.
fn next_wake(ctx: &ExecutionContext, running: &HashSet<String>) -> Option<Duration> {
    let now = Utc::now();
    ctx.ready_steps()
        .iter()
        .filter(|s| !running.contains(&s.id))
        .filter_map(|s| s.not_before.filter(|t| *t > now))
        .min()
        .map(|t| (t - now).to_std().unwrap_or(Duration::ZERO))
}

/// Object outputs are kept key by key; anything else lands under `result`.
fn output_map(value: &Value) -> HashMap<String, Value> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        other => HashMap::from([("result".to_string(), other.clone())]),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
