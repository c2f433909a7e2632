//! Plan commands: validate, run, resume and status.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use console::style;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use conductor_core::agent::{AgentRegistry, BoxAgent};
use conductor_core::engine::checkpoint::{is_resumable, restore};
use conductor_core::engine::{Checkpointer, ExecutionContext, graph};
use conductor_core::repository::CheckpointStore;
use conductor_core::{ExecutorError, PlanExecutor, RunHandle};
use conductor_infra::agent::EchoAgent;
use conductor_types::checkpoint::{CheckpointFilter, CheckpointRecord};
use conductor_types::event::ExecutionEvent;
use conductor_types::execution::{ExecutionStatus, RunStage, RunStatusReport};
use conductor_types::plan::Plan;

use super::RunOverrides;
use super::render;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Read a plan descriptor from a JSON file.
pub async fn load_plan(path: &Path) -> Result<Plan> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    let mut plan: Plan = serde_json::from_str(&content)
        .with_context(|| format!("Invalid plan descriptor in {}", path.display()))?;
    plan.recompute_estimates();
    Ok(plan)
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("'{raw}' is not a valid ID"))
}

/// Agents for a plan: the built-in echo agent, plus an echo stand-in for
/// every other agent name when simulating.
fn agent_registry(plan: &Plan, simulate: bool) -> AgentRegistry {
    let mut agents = AgentRegistry::new().with(EchoAgent::new());
    let wanted: BTreeSet<&str> = plan.steps.iter().map(|s| s.agent.as_str()).collect();

    for name in wanted {
        if agents.contains(name) {
            continue;
        }
        if simulate {
            agents.register(name, BoxAgent::new(EchoAgent::named(name)));
        } else {
            tracing::warn!(agent = name, "no agent registered; its steps will fail as agent_unavailable");
        }
    }
    agents
}

/// Print events until the run finishes.
fn spawn_event_printer(mut events: tokio::sync::broadcast::Receiver<ExecutionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    render::print_event(&event);
                    if matches!(event, ExecutionEvent::RunFinished { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Cancel the run on Ctrl+C. In-flight steps are allowed to finish.
fn cancel_on_ctrl_c(handle: RunHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n  {} Cancelling; waiting for in-flight steps...",
                style("!").yellow().bold()
            );
            handle.cancel();
        }
    })
}

fn explain(err: ExecutorError) -> anyhow::Error {
    match err {
        ExecutorError::ApprovalRequired { .. } => anyhow!("{err} (pass --approve)"),
        other => anyhow::Error::new(other),
    }
}

fn sorted(ids: &std::collections::HashSet<String>) -> Vec<&str> {
    let mut v: Vec<&str> = ids.iter().map(String::as_str).collect();
    v.sort_unstable();
    v
}

fn run_json(ctx: &ExecutionContext) -> serde_json::Value {
    let decisions: Vec<_> = ctx
        .decisions
        .iter()
        .map(|d| {
            json!({
                "step_id": d.step_id,
                "strategy": d.decision.strategy,
                "reasoning": d.decision.reasoning,
                "confidence": d.decision.confidence,
                "affected_steps": d.decision.affected_steps,
            })
        })
        .collect();

    json!({
        "report": ctx.status_report(RunStage::Finished),
        "plan_id": ctx.plan.id,
        "revision": ctx.plan.revision,
        "completed": sorted(&ctx.completed),
        "failed": sorted(&ctx.failed),
        "skipped": sorted(&ctx.skipped),
        "total_tokens": ctx.total_tokens,
        "results": ctx.results,
        "outputs": ctx.outputs,
        "decisions": decisions,
        "checkpoint_ids": ctx.checkpoint_ids,
        "checkpoint_failures": ctx.checkpoint_failures,
    })
}

/// Drive a run (fresh or resumed) with live output, then report it.
async fn drive<S, F>(exec: &PlanExecutor<S>, handle: &RunHandle, json: bool, run: F) -> Result<()>
where
    S: CheckpointStore + 'static,
    F: std::future::Future<Output = Result<ExecutionContext, ExecutorError>>,
{
    let printer = (!json).then(|| spawn_event_printer(exec.event_bus().subscribe()));
    let canceller = cancel_on_ctrl_c(handle.clone());

    let result = run.await;
    canceller.abort();

    let ctx = match result {
        Ok(ctx) => {
            if let Some(printer) = printer {
                let _ = printer.await;
            }
            ctx
        }
        Err(err) => {
            if let Some(printer) = printer {
                printer.abort();
            }
            return Err(explain(err));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&run_json(&ctx))?);
    } else {
        println!();
        println!("{}", render::step_table(&ctx));
        render::print_run_summary(&ctx);
    }

    match ctx.status {
        ExecutionStatus::Completed => Ok(()),
        ExecutionStatus::Cancelled => match ctx.checkpoint_ids.last() {
            Some(id) => bail!("run cancelled; continue with `cndr resume {id}`"),
            None => bail!("run cancelled"),
        },
        _ => bail!(
            "run {} failed: {} step(s) failed, {} skipped",
            ctx.execution_id,
            ctx.failed.len(),
            ctx.skipped.len()
        ),
    }
}

/// Status report for a stored checkpoint.
pub fn report_for(record: &CheckpointRecord) -> RunStatusReport {
    let resumable = is_resumable(record);
    let status = if resumable {
        ExecutionStatus::Running
    } else if record.failed_steps.is_empty() {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Failed
    };

    RunStatusReport {
        execution_id: record.execution_id,
        current_stage: if resumable {
            RunStage::Checkpointing
        } else {
            RunStage::Finished
        },
        status,
        completed_count: record.completed_steps.len(),
        failed_count: record.failed_steps.len(),
        skipped_count: record.skipped_steps.len(),
        total_steps: record.plan.steps.len(),
        elapsed_time: record.total_time,
        accumulated_cost: record.total_cost,
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn validate(file: &Path, json: bool) -> Result<()> {
    let plan = load_plan(file).await?;

    let layers = match graph::execution_layers(&plan) {
        Ok(layers) => layers,
        Err(err) => {
            if json {
                let out = json!({
                    "valid": false,
                    "plan_id": plan.id,
                    "goal": plan.goal,
                    "error": err.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            bail!("invalid plan: {err}");
        }
    };

    if json {
        let ids: Vec<Vec<&str>> = layers
            .iter()
            .map(|layer| layer.iter().map(|s| s.id.as_str()).collect())
            .collect();
        let out = json!({
            "valid": true,
            "plan_id": plan.id,
            "goal": plan.goal,
            "steps": plan.steps.len(),
            "layers": ids,
            "requires_approval": plan.requires_approval,
            "risk_level": plan.risk_level,
            "estimated_cost": plan.cost_estimate,
            "estimated_time": plan.total_time_estimate,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} is valid",
        style("✓").green().bold(),
        style(&plan.goal).cyan()
    );
    println!(
        "  {} steps in {} layers, risk {}, est. cost ${:.4}",
        plan.steps.len(),
        layers.len(),
        plan.risk_level,
        plan.cost_estimate
    );
    if plan.requires_approval {
        println!("  {}", style("Requires approval (run with --approve)").yellow());
    }
    println!();
    for (depth, layer) in layers.iter().enumerate() {
        let ids: Vec<&str> = layer.iter().map(|s| s.id.as_str()).collect();
        println!("  {} {}", style(format!("{depth:>2}")).dim(), ids.join(", "));
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run / resume
// ---------------------------------------------------------------------------

pub async fn run<S>(
    state: &AppState,
    store: S,
    file: &Path,
    overrides: &RunOverrides,
    json: bool,
) -> Result<()>
where
    S: CheckpointStore + 'static,
{
    let plan = load_plan(file).await?;
    let config = state.engine_config(overrides);
    let exec = PlanExecutor::new(agent_registry(&plan, overrides.simulate), store, &config);

    let handle = RunHandle::new();
    drive(&exec, &handle, json, exec.run_with(plan, &handle)).await
}

pub async fn resume<S>(
    state: &AppState,
    store: S,
    raw_id: &str,
    overrides: &RunOverrides,
    json: bool,
) -> Result<()>
where
    S: CheckpointStore + 'static,
{
    let checkpoint_id = parse_id(raw_id)?;
    let store = Arc::new(store);
    let record = Checkpointer::new(store.clone())
        .resume(checkpoint_id)
        .await
        .context("Failed to load checkpoint")?;

    let config = state.engine_config(overrides);
    let agents = agent_registry(&record.plan, overrides.simulate);
    let exec = PlanExecutor::new(agents, store, &config);

    let handle = RunHandle::new();
    drive(&exec, &handle, json, exec.resume_with(checkpoint_id, &handle)).await
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Latest recorded progress for an execution, or the state in one checkpoint.
pub async fn status<S>(state: &AppState, store: S, raw_id: &str, json: bool) -> Result<()>
where
    S: CheckpointStore + 'static,
{
    let id = parse_id(raw_id)?;
    let checkpointer = Checkpointer::with_config(store, &state.config.checkpoint);

    let record = match checkpointer.store().get(&id).await? {
        Some(record) => record,
        None => {
            let filter = CheckpointFilter {
                execution_id: Some(id),
                ..Default::default()
            };
            checkpointer
                .list(&filter, Some(1))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("No checkpoints recorded for '{raw_id}'"))?
        }
    };

    let report = report_for(&record);
    let resumable = is_resumable(&record);

    if json {
        let out = json!({
            "checkpoint_id": record.checkpoint_id,
            "created_at": record.created_at,
            "goal": record.plan.goal,
            "progress_percentage": record.progress_percentage,
            "resumable": resumable,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let ctx = restore(record.clone());
    println!();
    println!(
        "  {} {}  {}",
        style("Run").bold(),
        style(record.execution_id).cyan(),
        style(&record.plan.goal).dim()
    );
    println!(
        "  As of checkpoint {} ({})",
        render::short_id(&record.checkpoint_id),
        record.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  {} completed, {} failed, {} skipped of {} steps ({:.0}%)",
        style(report.completed_count).green(),
        style(report.failed_count).red(),
        style(report.skipped_count).dim(),
        report.total_steps,
        record.progress_percentage
    );
    println!(
        "  Cost: ${:.4}   Step time: {}",
        report.accumulated_cost,
        render::format_seconds(report.elapsed_time)
    );
    println!();
    println!("{}", render::step_table(&ctx));
    if resumable {
        println!(
            "\n  Continue with: {}",
            style(format!("cndr resume {}", record.checkpoint_id)).cyan()
        );
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::repository::MemoryCheckpointStore;
    use conductor_types::config::EngineConfig;
    use conductor_types::plan::Step;

    fn state() -> AppState {
        AppState {
            data_dir: std::env::temp_dir(),
            config: EngineConfig::default(),
        }
    }

    async fn write_plan(dir: &Path, plan: &serde_json::Value) -> std::path::PathBuf {
        let path = dir.join("plan.json");
        tokio::fs::write(&path, serde_json::to_vec(plan).unwrap())
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn load_plan_accepts_descriptor_without_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            &json!({
                "goal": "report",
                "steps": [
                    {"id": "fetch", "agent": "echo", "estimated_cost": 0.5},
                    {"id": "write", "agent": "echo", "dependencies": ["fetch"], "estimated_cost": 0.25}
                ]
            }),
        )
        .await;

        let plan = load_plan(&path).await.unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!((plan.cost_estimate - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn validate_rejects_dangling_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            &json!({"goal": "bad", "steps": [{"id": "a", "agent": "echo", "dependencies": ["ghost"]}]}),
        )
        .await;

        let err = validate(&path, true).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn simulate_registers_every_plan_agent() {
        let plan = Plan::new(
            "sim",
            vec![Step::new("a", "researcher"), Step::new("b", "writer")],
        );
        assert!(!agent_registry(&plan, false).contains("researcher"));

        let agents = agent_registry(&plan, true);
        assert_eq!(agents.list_names(), vec!["echo", "researcher", "writer"]);
    }

    #[tokio::test]
    async fn simulated_run_completes_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            &json!({
                "goal": "sim",
                "steps": [
                    {"id": "a", "agent": "researcher"},
                    {"id": "b", "agent": "writer", "dependencies": ["a"]}
                ]
            }),
        )
        .await;

        let store = Arc::new(MemoryCheckpointStore::new());
        let overrides = RunOverrides {
            simulate: true,
            checkpoint_every: Some(1),
            ..Default::default()
        };
        run(&state(), store.clone(), &path, &overrides, true).await.unwrap();

        let records = store.list(&CheckpointFilter::default(), None).await.unwrap();
        assert!(!records.is_empty());
        let latest = &records[0];
        assert!(!is_resumable(latest));
        assert_eq!(report_for(latest).status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn failing_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            &json!({
                "goal": "doomed",
                "steps": [{"id": "a", "agent": "echo", "inputs": {"fail_with": "permission_denied"}}]
            }),
        )
        .await;

        let err = run(&state(), MemoryCheckpointStore::new(), &path, &RunOverrides::default(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }

    #[tokio::test]
    async fn approval_is_required_unless_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plan(
            dir.path(),
            &json!({"goal": "gated", "requires_approval": true, "steps": [{"id": "a", "agent": "echo"}]}),
        )
        .await;

        let err = run(&state(), MemoryCheckpointStore::new(), &path, &RunOverrides::default(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--approve"));

        let approved = RunOverrides {
            approve: true,
            ..Default::default()
        };
        run(&state(), MemoryCheckpointStore::new(), &path, &approved, true)
            .await
            .unwrap();
    }
}
