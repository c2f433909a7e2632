//! Styled terminal output shared by plan and checkpoint commands.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use conductor_core::engine::ExecutionContext;
use conductor_types::event::ExecutionEvent;
use conductor_types::execution::{ExecutionStatus, StepStatus};

/// First 8 characters of a UUID, enough to tell runs apart in a table.
pub fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub fn format_seconds(secs: f64) -> String {
    if secs >= 60.0 {
        format!("{}m{:02}s", (secs / 60.0).floor() as u64, (secs % 60.0).floor() as u64)
    } else if secs >= 1.0 {
        format!("{secs:.1}s")
    } else {
        format!("{}ms", (secs * 1000.0).round() as u64)
    }
}

pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

pub fn run_status_cell(status: ExecutionStatus) -> Cell {
    match status {
        ExecutionStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        ExecutionStatus::Running => Cell::new("running").fg(Color::Blue),
        ExecutionStatus::Completed => Cell::new("completed").fg(Color::Green),
        ExecutionStatus::Failed => Cell::new("failed").fg(Color::Red),
        ExecutionStatus::Cancelled => Cell::new("cancelled").fg(Color::DarkYellow),
    }
}

pub fn step_status_cell(status: StepStatus) -> Cell {
    match status {
        StepStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        StepStatus::Running => Cell::new("running").fg(Color::Blue),
        StepStatus::Completed => Cell::new("completed").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
        StepStatus::Skipped => Cell::new("skipped").fg(Color::DarkGrey),
        StepStatus::Retrying => Cell::new("retrying").fg(Color::Magenta),
    }
}

/// Where a step stands in a context, by its resolved sets.
pub fn step_status(ctx: &ExecutionContext, step_id: &str) -> StepStatus {
    if ctx.completed.contains(step_id) {
        StepStatus::Completed
    } else if ctx.failed.contains(step_id) {
        StepStatus::Failed
    } else if ctx.skipped.contains(step_id) {
        StepStatus::Skipped
    } else {
        StepStatus::Pending
    }
}

/// One row per step: the working plan's steps in order, then steps the
/// replanner removed along the way.
pub fn step_table(ctx: &ExecutionContext) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Agent"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Time"),
            Cell::new("Note"),
        ]);

    let removed = ctx
        .original_plan
        .steps
        .iter()
        .filter(|s| !ctx.plan.contains(&s.id));

    for step in ctx.plan.steps.iter().chain(removed) {
        let results: Vec<_> = ctx
            .results
            .iter()
            .filter(|r| r.step_id == step.id && r.attempt > 0)
            .collect();
        let time: f64 = results.iter().map(|r| r.execution_time).sum();
        let note = ctx
            .last_result(&step.id)
            .and_then(|r| r.error.clone())
            .or_else(|| {
                step.alternative_of
                    .as_ref()
                    .map(|original| format!("alternative for '{original}'"))
            })
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(&step.agent),
            step_status_cell(step_status(ctx, &step.id)),
            Cell::new(results.len()),
            Cell::new(if results.is_empty() {
                "-".to_string()
            } else {
                format_seconds(time)
            }),
            Cell::new(note),
        ]);
    }
    table
}

/// Totals line printed under a run's step table.
pub fn print_run_summary(ctx: &ExecutionContext) {
    let headline = match ctx.status {
        ExecutionStatus::Completed => style("Run completed").green().bold(),
        ExecutionStatus::Failed => style("Run failed").red().bold(),
        ExecutionStatus::Cancelled => style("Run cancelled").yellow().bold(),
        ExecutionStatus::Pending | ExecutionStatus::Running => style("Run in progress").bold(),
    };

    println!();
    println!("  {headline}  {}", style(ctx.execution_id).dim());
    println!(
        "  {} completed, {} failed, {} skipped of {} steps ({:.0}%)",
        style(ctx.completed.len()).green(),
        style(ctx.failed.len()).red(),
        style(ctx.skipped.len()).dim(),
        ctx.total_steps(),
        ctx.progress_percentage(),
    );
    println!(
        "  Cost: ${:.4}   Tokens: {}   Step time: {}",
        ctx.total_cost,
        format_tokens(ctx.total_tokens),
        format_seconds(ctx.total_time),
    );
    if !ctx.decisions.is_empty() {
        println!("  Replanning decisions: {}", ctx.decisions.len());
        for applied in &ctx.decisions {
            println!(
                "    {} {} ({})",
                style(&applied.step_id).cyan(),
                applied.decision.strategy,
                applied.decision.reasoning,
            );
        }
    }
    if let Some(last) = ctx.checkpoint_ids.last() {
        println!("  Last checkpoint: {}", style(last).cyan());
    }
    for failure in &ctx.checkpoint_failures {
        println!("  {} {failure}", style("checkpoint failed:").yellow());
    }
    println!();
}

/// One line per execution event, for live progress.
pub fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            execution_id,
            total_steps,
            resumed,
            ..
        } => {
            let verb = if *resumed { "Resuming" } else { "Starting" };
            println!(
                "  {} {verb} run {} ({total_steps} steps)",
                style("▶").cyan().bold(),
                style(short_id(execution_id)).dim(),
            );
        }
        ExecutionEvent::StepStarted {
            step_id,
            agent,
            attempt,
            ..
        } => {
            let retry = if *attempt > 1 {
                format!(" (attempt {attempt})")
            } else {
                String::new()
            };
            println!(
                "  {} {} {}{retry}",
                style("·").dim(),
                style(step_id).bold(),
                style(format!("→ {agent}")).dim(),
            );
        }
        ExecutionEvent::StepCompleted {
            step_id,
            duration_ms,
            ..
        } => {
            println!(
                "  {} {} {}",
                style("✓").green(),
                step_id,
                style(format!("{duration_ms}ms")).dim(),
            );
        }
        ExecutionEvent::StepFailed {
            step_id,
            failure_type,
            error,
            will_retry,
            ..
        } => {
            let suffix = if *will_retry { ", will retry" } else { "" };
            println!(
                "  {} {step_id}: {error} {}",
                style("✗").red(),
                style(format!("[{failure_type}{suffix}]")).dim(),
            );
        }
        ExecutionEvent::StepSkipped {
            step_id, reason, ..
        } => {
            println!(
                "  {} {step_id} skipped: {}",
                style("↷").dim(),
                style(reason).dim(),
            );
        }
        ExecutionEvent::Replanned {
            step_id,
            strategy,
            revision,
            affected_steps,
            ..
        } => {
            println!(
                "  {} replanned after '{step_id}': {strategy} (revision {revision}, {} affected)",
                style("⟳").magenta(),
                affected_steps.len(),
            );
        }
        ExecutionEvent::CheckpointSaved {
            checkpoint_id,
            progress_percentage,
            ..
        } => {
            println!(
                "  {} checkpoint {} at {progress_percentage:.0}%",
                style("◆").blue(),
                style(short_id(checkpoint_id)).dim(),
            );
        }
        ExecutionEvent::RunFinished { .. } => {}
    }
}
