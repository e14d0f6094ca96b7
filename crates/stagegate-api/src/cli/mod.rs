//! CLI command definitions for the `sgate` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by the
//! record they act on (e.g., `sgate workflow import`, `sgate instance show`).

pub mod context;
pub mod entity;
pub mod instance;
pub mod task;
pub mod workflow;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color};
use stagegate_types::workflow::{InstanceState, WorkflowInstance};
use uuid::Uuid;

/// Drive business entities through stage-gate workflows.
#[derive(Parser)]
#[command(name = "sgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for engine debug logs, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "STAGEGATE_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow definitions (import, list, show, delete).
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Manage business entities (put, show).
    Entity {
        #[command(subcommand)]
        action: entity::EntityCommand,
    },

    /// Start a workflow for an entity.
    Start {
        /// Entity type.
        entity_type: String,

        /// Entity ID.
        entity_id: String,

        /// Workflow UUID (defaults to the single active workflow for the type).
        #[arg(long)]
        workflow: Option<String>,
    },

    /// Act on tasks (finish).
    Task {
        #[command(subcommand)]
        action: task::TaskCommand,
    },

    /// Inspect and control workflow instances.
    Instance {
        #[command(subcommand)]
        action: instance::InstanceCommand,
    },

    /// Read or write an instance's execution context.
    Context {
        #[command(subcommand)]
        action: context::ContextCommand,
    },

    /// Iterate every running instance once.
    Recover,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Tracing filter directives for the chosen verbosity.
pub fn verbosity_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info,stagegate_core=debug,stagegate_infra=debug",
        _ => "trace",
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .with_context(|| format!("Invalid {what} ID: '{raw}'"))
}

/// Split `key=value`. The key must be non-empty; the value may be empty.
pub(crate) fn parse_key_value(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Expected KEY=VALUE, got '{raw}'");
    };
    if key.trim().is_empty() {
        bail!("Empty key in '{raw}'");
    }
    Ok((key.trim().to_string(), value.to_string()))
}

pub(crate) fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub(crate) fn format_state(state: InstanceState) -> Cell {
    match state {
        InstanceState::Running => Cell::new("running").fg(Color::Blue),
        InstanceState::Done => Cell::new("done").fg(Color::Green),
        InstanceState::Failed => Cell::new("failed").fg(Color::Red),
    }
}

pub(crate) fn instance_json(instance: &WorkflowInstance) -> serde_json::Value {
    serde_json::json!({
        "id": instance.id.to_string(),
        "workflow_id": instance.workflow_id.to_string(),
        "entity_type": instance.entity_type,
        "entity_id": instance.entity_id,
        "state": instance.state().to_string(),
        "started_at": instance.started_at.to_rfc3339(),
        "ended_at": instance.ended_at.map(|t| t.to_rfc3339()),
        "error": instance.error,
        "error_in_task": instance.error_in_task,
        "current_task_id": instance.current_task_id.map(|id| id.to_string()),
    })
}
