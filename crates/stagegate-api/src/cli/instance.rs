//! CLI workflow instance subcommands, plus `start` and `recover`.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stagegate_core::repository::entity::EntityRepository;
use stagegate_core::repository::workflow::WorkflowRepository;
use stagegate_core::workflow::engine::{EngineError, RestartOutcome};
use stagegate_types::workflow::{WorkflowInstance, WorkflowInstanceTask};
use uuid::Uuid;

use super::workflow::load_definition;
use super::{format_state, instance_json, parse_uuid, short_id};
use crate::state::AppState;

/// Instance subcommands.
#[derive(Subcommand)]
pub enum InstanceCommand {
    /// Show an instance and its tasks.
    Show {
        /// Instance UUID.
        id: String,
    },

    /// List instances of an entity, or all running instances.
    List {
        /// Entity type (requires --entity-id).
        #[arg(long, requires = "entity_id")]
        entity_type: Option<String>,

        /// Entity ID (requires --entity-type).
        #[arg(long, requires = "entity_type")]
        entity_id: Option<String>,
    },

    /// Iterate a running instance again (re-runs its open automatic task).
    Resume {
        /// Instance UUID.
        id: String,
    },

    /// Restart a failed instance.
    Restart {
        /// Instance UUID.
        id: String,
    },

    /// Terminate an instance and start a fresh one for the same entity.
    Reset {
        /// Instance UUID.
        id: String,

        /// Workflow UUID for the new instance (defaults to the instance's own workflow).
        #[arg(long)]
        workflow: Option<String>,
    },
}

/// Handle an instance subcommand.
pub async fn handle_instance_command(
    cmd: InstanceCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        InstanceCommand::Show { id } => handle_show(&id, state, json).await,
        InstanceCommand::List {
            entity_type,
            entity_id,
        } => handle_list(entity_type.as_deref(), entity_id.as_deref(), state, json).await,
        InstanceCommand::Resume { id } => handle_resume(&id, state, json).await,
        InstanceCommand::Restart { id } => handle_restart(&id, state, json).await,
        InstanceCommand::Reset { id, workflow } => {
            handle_reset(&id, workflow.as_deref(), state, json).await
        }
    }
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

pub async fn handle_start(
    entity_type: &str,
    entity_id: &str,
    workflow: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let entity = state
        .repo
        .get_entity(entity_type, entity_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up entity: {e}"))?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Entity {entity_type}/{entity_id} not found. Create it with: sgate entity put {entity_type} {entity_id}"
            )
        })?;

    let workflow = match workflow {
        Some(id) => load_definition(id, state.repo.as_ref()).await?,
        None => state
            .engine
            .determine_workflow(&entity)
            .await
            .context("Cannot pick a workflow; pass --workflow")?,
    };

    let instance_id = started_or_recorded(state.engine.start_workflow(&entity, &workflow).await)?;
    print_outcome("Started", instance_id, state, json).await
}

// ---------------------------------------------------------------------------
// Show / List
// ---------------------------------------------------------------------------

async fn handle_show(id: &str, state: &AppState, json: bool) -> Result<()> {
    let instance = load_instance(id, state).await?;
    let tasks = state
        .repo
        .list_tasks(&instance.id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list tasks: {e}"))?;

    if json {
        let out = serde_json::json!({
            "instance": instance_json(&instance),
            "tasks": tasks.iter().map(task_json).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Instance:").bold(), style(instance.id).cyan());
    println!("  Workflow: {}", instance.workflow_id);
    println!("  Entity: {}/{}", instance.entity_type, instance.entity_id);
    println!("  State: {}", instance.state());
    println!("  Started: {}", instance.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ended) = instance.ended_at {
        println!("  Ended: {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(err) = &instance.error {
        let origin = if instance.error_in_task { " (in task)" } else { "" };
        println!("  Error{origin}: {}", style(err).red());
    }
    println!();

    if tasks.is_empty() {
        println!("  No tasks.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Task").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Started"),
            Cell::new("Ended"),
        ]);
    for t in &tasks {
        let marker = if instance.current_task_id == Some(t.id) { " *" } else { "" };
        let ended = match t.ended_at {
            Some(at) => Cell::new(at.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Cell::new("open").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(format!("{}{marker}", t.id)),
            Cell::new(&t.step_id),
            Cell::new(t.started_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            ended,
        ]);
    }
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_list(
    entity_type: Option<&str>,
    entity_id: Option<&str>,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let instances = match (entity_type, entity_id) {
        (Some(t), Some(i)) => state.repo.list_instances_for_entity(t, i).await,
        _ => state.repo.list_running_instances().await,
    }
    .map_err(|e| anyhow::anyhow!("Failed to list instances: {e}"))?;

    if json {
        let out: Vec<_> = instances.iter().map(instance_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!("  No instances.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Instance").fg(Color::Cyan),
            Cell::new("Entity"),
            Cell::new("State"),
            Cell::new("Started"),
        ]);
    for i in &instances {
        table.add_row(vec![
            Cell::new(i.id),
            Cell::new(format!("{}/{}", i.entity_type, i.entity_id)),
            format_state(i.state()),
            Cell::new(i.started_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Resume / Restart / Reset
// ---------------------------------------------------------------------------

async fn handle_resume(id: &str, state: &AppState, json: bool) -> Result<()> {
    let instance_id = parse_uuid(id, "instance")?;
    started_or_recorded(state.engine.iterate(instance_id).await)?;
    print_outcome("Resumed", instance_id, state, json).await
}

async fn handle_restart(id: &str, state: &AppState, json: bool) -> Result<()> {
    let instance_id = parse_uuid(id, "instance")?;
    let outcome = state.engine.restart_workflow(instance_id).await;

    match outcome {
        Ok(RestartOutcome::Restarted) => print_outcome("Restarted", instance_id, state, json).await,
        Ok(RestartOutcome::StillRunning) => {
            print_notice(instance_id, "still running, nothing to restart", json)
        }
        Ok(RestartOutcome::FinishedSuccessfully) => {
            print_notice(instance_id, "finished successfully, nothing to restart", json)
        }
        Err(e) => {
            started_or_recorded(Err(e))?;
            Ok(())
        }
    }
}

async fn handle_reset(id: &str, workflow: Option<&str>, state: &AppState, json: bool) -> Result<()> {
    let instance = load_instance(id, state).await?;
    let workflow_ref = workflow.map(str::to_string).unwrap_or_else(|| instance.workflow_id.to_string());
    let workflow = load_definition(&workflow_ref, state.repo.as_ref()).await?;

    let new_id = started_or_recorded(state.engine.reset_workflow(instance.id, &workflow).await)?;
    print_outcome("Reset into", new_id, state, json).await
}

// ---------------------------------------------------------------------------
// Recover
// ---------------------------------------------------------------------------

pub async fn handle_recover(state: &AppState, json: bool) -> Result<()> {
    let report = state
        .engine
        .recover_running_instances()
        .await
        .context("Failed to recover running instances")?;

    if json {
        let out = serde_json::json!({
            "resumed": report.resumed,
            "failed": report
                .failed
                .iter()
                .map(|(id, err)| serde_json::json!({ "instance_id": id.to_string(), "error": err }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Iterated {} running instance(s)",
        style("*").green().bold(),
        report.resumed + report.failed.len()
    );
    for (id, err) in &report.failed {
        println!("  {} {}: {}", style("!").red().bold(), short_id(id), style(err).red());
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load_instance(id: &str, state: &AppState) -> Result<WorkflowInstance> {
    let instance_id = parse_uuid(id, "instance")?;
    state
        .repo
        .get_instance(&instance_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up instance: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Instance {instance_id} not found"))
}

/// Attach the inspect hint to engine errors that concern an instance.
pub(crate) fn started_or_recorded<T>(result: Result<T, EngineError>) -> Result<T> {
    result.map_err(|e| match e.instance_id() {
        Some(id) if !matches!(e, EngineError::InstanceNotFound(_)) => anyhow::Error::new(e)
            .context(format!("Instance {id}: inspect with `sgate instance show {id}`")),
        _ => anyhow::Error::new(e),
    })
}

async fn print_outcome(verb: &str, instance_id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let instance = state
        .repo
        .get_instance(&instance_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up instance: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Instance {instance_id} not found"))?;

    let current_task = match instance.current_task_id {
        Some(task_id) => state
            .repo
            .get_task(&task_id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to look up task: {e}"))?,
        None => None,
    };

    if json {
        let out = serde_json::json!({
            "instance": instance_json(&instance),
            "current_task": current_task.as_ref().map(task_json),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} instance {}",
        style("*").green().bold(),
        verb,
        style(instance.id).cyan()
    );
    println!("  State: {}", instance.state());
    if let Some(task) = current_task.filter(|t| t.is_open()) {
        println!("  Waiting on task {} (step '{}')", task.id, task.step_id);
        println!(
            "  Finish it with: {}",
            style(format!("sgate task finish {}", task.id)).dim()
        );
    }
    println!();

    Ok(())
}

fn print_notice(instance_id: Uuid, message: &str, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "instance_id": instance_id.to_string(),
            "restarted": false,
            "reason": message,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {} Instance {instance_id} {message}.", style("!").yellow().bold());
        println!();
    }
    Ok(())
}

fn task_json(task: &WorkflowInstanceTask) -> serde_json::Value {
    serde_json::json!({
        "id": task.id.to_string(),
        "step_id": task.step_id,
        "started_at": task.started_at.to_rfc3339(),
        "ended_at": task.ended_at.map(|t| t.to_rfc3339()),
    })
}
