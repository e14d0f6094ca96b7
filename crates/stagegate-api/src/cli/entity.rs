//! CLI business entity subcommands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stagegate_core::repository::entity::EntityRepository;
use stagegate_core::repository::workflow::WorkflowRepository;
use stagegate_types::entity::WorkflowEntity;

use super::{format_state, instance_json, parse_key_value, short_id};
use crate::state::AppState;

/// Entity subcommands.
#[derive(Subcommand)]
pub enum EntityCommand {
    /// Create or update an entity's attributes.
    Put {
        /// Entity type.
        entity_type: String,

        /// Entity ID.
        id: String,

        /// Attribute as KEY=VALUE (VALUE parsed as JSON, else kept as a string). Repeatable.
        #[arg(long = "attr")]
        attributes: Vec<String>,
    },

    /// Show an entity and its workflow instances.
    Show {
        /// Entity type.
        entity_type: String,

        /// Entity ID.
        id: String,
    },
}

/// Handle an entity subcommand.
pub async fn handle_entity_command(cmd: EntityCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        EntityCommand::Put {
            entity_type,
            id,
            attributes,
        } => handle_put(&entity_type, &id, &attributes, state, json).await,
        EntityCommand::Show { entity_type, id } => handle_show(&entity_type, &id, state, json).await,
    }
}

async fn handle_put(
    entity_type: &str,
    id: &str,
    attributes: &[String],
    state: &AppState,
    json: bool,
) -> Result<()> {
    if entity_type.trim().is_empty() || id.trim().is_empty() {
        anyhow::bail!("Entity type and ID must not be empty");
    }

    // Existing status and step are kept; only attributes change.
    let mut entity = state
        .repo
        .get_entity(entity_type, id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up entity: {e}"))?
        .unwrap_or_else(|| WorkflowEntity::new(entity_type, id));

    for raw in attributes {
        let (key, value) = parse_key_value(raw)?;
        entity.attributes.insert(key, attribute_value(&value));
    }

    state
        .repo
        .save_entity(&entity)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save entity: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entity)?);
    } else {
        println!();
        println!(
            "  {} Saved entity {}/{}",
            style("*").green().bold(),
            style(entity_type).cyan(),
            style(id).cyan()
        );
        println!("  Status: {}", entity.status);
        println!("  Attributes: {}", entity.attributes.len());
        println!();
    }

    Ok(())
}

async fn handle_show(entity_type: &str, id: &str, state: &AppState, json: bool) -> Result<()> {
    let entity = state
        .repo
        .get_entity(entity_type, id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up entity: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Entity {entity_type}/{id} not found"))?;

    let instances = state
        .repo
        .list_instances_for_entity(entity_type, id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list instances: {e}"))?;

    if json {
        let out = serde_json::json!({
            "entity": entity,
            "instances": instances.iter().map(instance_json).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}/{}",
        style("Entity:").bold(),
        style(&entity.entity_type).cyan(),
        style(&entity.id).cyan()
    );
    println!("  Status: {}", entity.status);
    if let Some(step) = &entity.step_name {
        println!("  Stage: {step}");
    }
    for (key, value) in &entity.attributes {
        println!("  {} = {}", style(key).dim(), value);
    }
    println!();

    if instances.is_empty() {
        println!("  No workflow instances.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Instance").fg(Color::Cyan),
            Cell::new("State"),
            Cell::new("Started"),
            Cell::new("Ended"),
        ]);
    for i in &instances {
        table.add_row(vec![
            Cell::new(short_id(&i.id)),
            format_state(i.state()),
            Cell::new(i.started_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(
                i.ended_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    println!("{table}");
    println!();

    Ok(())
}

/// JSON if it parses, otherwise the raw string.
fn attribute_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_value_parses_json_or_keeps_string() {
        assert_eq!(attribute_value("1500"), json!(1500));
        assert_eq!(attribute_value("true"), json!(true));
        assert_eq!(attribute_value(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(attribute_value("ACME Corp"), json!("ACME Corp"));
    }
}
