//! CLI execution context subcommands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use super::instance::started_or_recorded;
use super::{parse_key_value, parse_uuid};
use crate::state::AppState;

/// Execution context subcommands.
#[derive(Subcommand)]
pub enum ContextCommand {
    /// Print the whole context, or a single parameter.
    Get {
        /// Instance UUID.
        instance: String,

        /// Parameter name.
        key: Option<String>,
    },

    /// Set and remove parameters.
    Set {
        /// Instance UUID.
        instance: String,

        /// Parameters as KEY=VALUE.
        pairs: Vec<String>,

        /// Parameter to remove. Repeatable.
        #[arg(long)]
        unset: Vec<String>,
    },
}

/// Handle a context subcommand.
pub async fn handle_context_command(cmd: ContextCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ContextCommand::Get { instance, key } => {
            handle_get(&instance, key.as_deref(), state, json).await
        }
        ContextCommand::Set {
            instance,
            pairs,
            unset,
        } => handle_set(&instance, &pairs, &unset, state, json).await,
    }
}

async fn handle_get(raw_id: &str, key: Option<&str>, state: &AppState, json: bool) -> Result<()> {
    let instance_id = parse_uuid(raw_id, "instance")?;

    if let Some(key) = key {
        let value = started_or_recorded(state.engine.get_parameter(instance_id, key).await)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ key: value }))?);
        } else {
            match value {
                Some(v) => println!("{v}"),
                None => anyhow::bail!("Parameter '{key}' is not set"),
            }
        }
        return Ok(());
    }

    let context = started_or_recorded(state.engine.get_execution_context(instance_id).await)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&context.to_value())?);
        return Ok(());
    }

    if context.is_empty() {
        println!();
        println!("  Execution context is empty.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Key").fg(Color::Cyan), Cell::new("Value")]);
    for (k, v) in context.iter() {
        table.add_row(vec![Cell::new(k), Cell::new(v)]);
    }
    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_set(
    raw_id: &str,
    pairs: &[String],
    unset: &[String],
    state: &AppState,
    json: bool,
) -> Result<()> {
    let instance_id = parse_uuid(raw_id, "instance")?;
    if pairs.is_empty() && unset.is_empty() {
        anyhow::bail!("Nothing to change: pass KEY=VALUE pairs or --unset KEY");
    }

    // Parse everything before touching the instance.
    let parsed = pairs
        .iter()
        .map(|p| parse_key_value(p))
        .collect::<Result<Vec<_>>>()?;

    // Each parameter is written under the instance lock.
    for (key, value) in parsed {
        started_or_recorded(state.engine.set_parameter(instance_id, &key, Some(value)).await)?;
    }
    for key in unset {
        started_or_recorded(state.engine.set_parameter(instance_id, key, None).await)?;
    }
    let context = started_or_recorded(state.engine.get_execution_context(instance_id).await)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&context.to_value())?);
    } else {
        println!();
        println!(
            "  {} Updated context of instance {} ({} parameter(s))",
            style("*").green().bold(),
            style(instance_id).cyan(),
            context.len()
        );
        println!();
    }

    Ok(())
}
