//! CLI checkpoint management subcommands.
//!
//! Lists, shows, deletes and expires stored checkpoints. Listing and cleanup
//! honor the configured workspace/user scope.

use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::json;

use conductor_core::engine::Checkpointer;
use conductor_core::engine::checkpoint::{is_resumable, restore};
use conductor_core::repository::CheckpointStore;
use conductor_types::checkpoint::{CheckpointFilter, CheckpointRecord};

use super::plan::{parse_id, report_for};
use super::render;
use crate::state::AppState;

/// Checkpoint management subcommands.
#[derive(Subcommand)]
pub enum CheckpointCommand {
    /// List checkpoints, newest first.
    #[command(alias = "ls")]
    List {
        /// Only checkpoints of this plan.
        #[arg(long)]
        plan: Option<String>,

        /// Only checkpoints of this execution.
        #[arg(long)]
        execution: Option<String>,

        /// Maximum number of checkpoints to display.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one checkpoint in detail.
    Show {
        /// Checkpoint ID.
        id: String,
    },

    /// Delete a checkpoint.
    #[command(alias = "rm")]
    Delete {
        /// Checkpoint ID.
        id: String,
    },

    /// Delete checkpoints older than the retention period.
    Cleanup {
        /// Override the configured retention, in days.
        #[arg(long)]
        older_than_days: Option<u64>,
    },
}

/// Handle a checkpoint subcommand.
pub async fn handle_checkpoint_command<S>(
    cmd: CheckpointCommand,
    state: &AppState,
    store: S,
    json: bool,
) -> Result<()>
where
    S: CheckpointStore,
{
    let checkpointer = Checkpointer::with_config(store, &state.config.checkpoint);

    match cmd {
        CheckpointCommand::List {
            plan,
            execution,
            limit,
        } => handle_list(&checkpointer, plan.as_deref(), execution.as_deref(), limit, json).await,
        CheckpointCommand::Show { id } => handle_show(&checkpointer, &id, json).await,
        CheckpointCommand::Delete { id } => handle_delete(&checkpointer, &id, json).await,
        CheckpointCommand::Cleanup { older_than_days } => {
            handle_cleanup(&checkpointer, older_than_days, json).await
        }
    }
}

fn summary_json(record: &CheckpointRecord) -> serde_json::Value {
    json!({
        "checkpoint_id": record.checkpoint_id,
        "execution_id": record.execution_id,
        "plan_id": record.plan_id,
        "goal": record.plan.goal,
        "created_at": record.created_at,
        "progress_percentage": record.progress_percentage,
        "completed": record.completed_steps.len(),
        "failed": record.failed_steps.len(),
        "skipped": record.skipped_steps.len(),
        "total_steps": record.plan.steps.len(),
        "resumable": is_resumable(record),
    })
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list<S: CheckpointStore>(
    checkpointer: &Checkpointer<S>,
    plan: Option<&str>,
    execution: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let scope = checkpointer.scope();
    let filter = CheckpointFilter {
        plan_id: plan.map(parse_id).transpose()?,
        execution_id: execution.map(parse_id).transpose()?,
        workspace_id: scope.workspace_id.clone(),
        user_id: scope.user_id.clone(),
    };
    let records = checkpointer.list(&filter, Some(limit)).await?;

    if json {
        let out: Vec<_> = records.iter().map(summary_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  No checkpoints found.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Checkpoint").fg(Color::Cyan),
            Cell::new("Execution"),
            Cell::new("Goal"),
            Cell::new("Progress"),
            Cell::new("Status"),
            Cell::new("Created"),
        ]);

    for record in &records {
        let report = report_for(record);
        table.add_row(vec![
            Cell::new(record.checkpoint_id),
            Cell::new(render::short_id(&record.execution_id)),
            Cell::new(&record.plan.goal),
            Cell::new(format!("{:.0}%", record.progress_percentage)),
            render::run_status_cell(report.status),
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

async fn handle_show<S: CheckpointStore>(
    checkpointer: &Checkpointer<S>,
    raw_id: &str,
    json: bool,
) -> Result<()> {
    let record = checkpointer.resume(parse_id(raw_id)?).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Checkpoint").bold(),
        style(record.checkpoint_id).cyan()
    );
    println!("  Execution: {}", record.execution_id);
    println!("  Plan:      {} (revision {})", record.plan_id, record.plan.revision);
    println!("  Goal:      {}", record.plan.goal);
    println!("  Created:   {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(ws) = &record.workspace_id {
        println!("  Workspace: {ws}");
    }
    if let Some(user) = &record.user_id {
        println!("  User:      {user}");
    }
    println!(
        "  Progress:  {:.0}%   Cost: ${:.4}   Tokens: {}",
        record.progress_percentage,
        record.total_cost,
        render::format_tokens(record.total_tokens)
    );
    println!();
    let resumable = is_resumable(&record);
    println!("{}", render::step_table(&restore(record.clone())));
    if resumable {
        println!(
            "\n  Continue with: {}",
            style(format!("cndr resume {}", record.checkpoint_id)).cyan()
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete<S: CheckpointStore>(
    checkpointer: &Checkpointer<S>,
    raw_id: &str,
    json: bool,
) -> Result<()> {
    let id = parse_id(raw_id)?;
    if !checkpointer.delete(id).await? {
        return Err(anyhow!("Checkpoint '{raw_id}' not found"));
    }

    if json {
        println!("{}", json!({ "deleted": id }));
    } else {
        println!();
        println!("  {} Deleted checkpoint {}", style("✓").green().bold(), id);
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

async fn handle_cleanup<S: CheckpointStore>(
    checkpointer: &Checkpointer<S>,
    older_than_days: Option<u64>,
    json: bool,
) -> Result<()> {
    let deleted = match older_than_days {
        Some(days) => {
            checkpointer
                .cleanup(Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
                .await?
        }
        None => checkpointer.cleanup_default().await?,
    };

    if json {
        println!("{}", json!({ "deleted": deleted }));
    } else {
        println!();
        println!(
            "  {} Removed {} expired checkpoint(s)",
            style("✓").green().bold(),
            deleted
        );
        println!();
    }
    Ok(())
}
