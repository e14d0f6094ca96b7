//! CLI workflow definition subcommands.
//!
//! Provides import, list, show and delete for workflow definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stagegate_core::repository::workflow::WorkflowRepository;
use stagegate_core::workflow::definition::{
    DefinitionError, load_workflow_file, serialize_workflow_yaml,
};
use stagegate_types::workflow::Workflow;

use super::parse_uuid;
use crate::state::AppState;

/// Workflow definition subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Import (create or replace) a workflow from a YAML file.
    Import {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// List workflow definitions.
    List {
        /// Only workflows for this entity type.
        #[arg(long)]
        entity_type: Option<String>,
    },

    /// Show a workflow definition as YAML.
    Show {
        /// Workflow UUID.
        id: String,
    },

    /// Delete a workflow definition.
    Delete {
        /// Workflow UUID.
        id: String,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let repo = state.repo.as_ref();
    match cmd {
        WorkflowCommand::Import { file } => handle_import(&file, repo, json).await,
        WorkflowCommand::List { entity_type } => {
            handle_list(entity_type.as_deref(), repo, json).await
        }
        WorkflowCommand::Show { id } => handle_show(&id, repo, json).await,
        WorkflowCommand::Delete { id } => handle_delete(&id, repo, json).await,
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

async fn handle_import(file: &PathBuf, repo: &impl WorkflowRepository, json: bool) -> Result<()> {
    let workflow = load_workflow_file(file).map_err(|e| match e {
        DefinitionError::ParseError(msg) => anyhow::anyhow!("Failed to parse workflow YAML: {msg}"),
        DefinitionError::ValidationError(msg) => {
            anyhow::anyhow!("Workflow validation failed: {msg}")
        }
        other => anyhow::anyhow!("Failed to load workflow: {other}"),
    })?;

    repo.save_definition(&workflow)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save workflow: {e}"))?;

    if json {
        let out = serde_json::json!({
            "id": workflow.id.to_string(),
            "name": workflow.name,
            "entity_type": workflow.entity_type,
            "active": workflow.active,
            "steps": workflow.steps.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Imported workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  ID: {}", workflow.id);
        println!("  Entity type: {}", workflow.entity_type);
        println!("  Steps: {}", workflow.steps.len());
        if !workflow.active {
            println!("  {}", style("Inactive: instances cannot be started").yellow());
        }
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(
    entity_type: Option<&str>,
    repo: &impl WorkflowRepository,
    json: bool,
) -> Result<()> {
    let defs = repo
        .list_definitions(entity_type)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list workflows: {e}"))?;

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id.to_string(),
                    "name": d.name,
                    "entity_type": d.entity_type,
                    "active": d.active,
                    "steps": d.steps.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!(
            "  Import one with: {}",
            style("sgate workflow import <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Entity type"),
            Cell::new("Active"),
            Cell::new("Steps"),
        ]);

    for d in &defs {
        let active = if d.active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkYellow)
        };
        table.add_row(vec![
            Cell::new(d.id),
            Cell::new(&d.name),
            Cell::new(&d.entity_type),
            active,
            Cell::new(d.steps.len()),
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

async fn handle_show(id: &str, repo: &impl WorkflowRepository, json: bool) -> Result<()> {
    let workflow = load_definition(id, repo).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        let yaml = serialize_workflow_yaml(&workflow).context("Failed to render workflow")?;
        println!("{yaml}");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(id: &str, repo: &impl WorkflowRepository, json: bool) -> Result<()> {
    let workflow_id = parse_uuid(id, "workflow")?;
    let deleted = repo
        .delete_definition(&workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to delete workflow: {e}"))?;

    if !deleted {
        anyhow::bail!("Workflow {workflow_id} not found");
    }

    if json {
        let out = serde_json::json!({ "deleted": workflow_id.to_string() });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {} Deleted workflow {}", style("*").green().bold(), workflow_id);
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) async fn load_definition(id: &str, repo: &impl WorkflowRepository) -> Result<Workflow> {
    let workflow_id = parse_uuid(id, "workflow")?;
    repo.get_definition(&workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up workflow: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Workflow {workflow_id} not found"))
}
