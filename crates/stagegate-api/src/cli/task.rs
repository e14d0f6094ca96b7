//! CLI task subcommands.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Subcommand;
use console::style;

use stagegate_core::repository::workflow::WorkflowRepository;

use super::instance::started_or_recorded;
use super::{instance_json, parse_key_value, parse_uuid};
use crate::state::AppState;

/// Task subcommands.
#[derive(Subcommand)]
pub enum TaskCommand {
    /// Close an open manual task and advance its instance.
    Finish {
        /// Task UUID.
        task_id: String,

        /// Parameter merged into the execution context, as KEY=VALUE. Repeatable.
        #[arg(long = "param")]
        params: Vec<String>,
    },
}

/// Handle a task subcommand.
pub async fn handle_task_command(cmd: TaskCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        TaskCommand::Finish { task_id, params } => {
            handle_finish(&task_id, &params, state, json).await
        }
    }
}

async fn handle_finish(raw_id: &str, raw_params: &[String], state: &AppState, json: bool) -> Result<()> {
    let task_id = parse_uuid(raw_id, "task")?;
    let params = collect_params(raw_params)?;

    started_or_recorded(state.engine.finish_task(task_id, params).await)?;

    let task = state
        .repo
        .get_task(&task_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up task: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Task {task_id} not found"))?;
    let instance = state
        .repo
        .get_instance(&task.instance_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to look up instance: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("Instance {} not found", task.instance_id))?;

    if json {
        let out = serde_json::json!({
            "task_id": task_id.to_string(),
            "instance": instance_json(&instance),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Finished task {} (step '{}')",
        style("*").green().bold(),
        style(task_id).cyan(),
        task.step_id
    );
    println!("  Instance {} is {}", instance.id, instance.state());
    println!();

    Ok(())
}

/// `None` when no parameters were given, so the context is left untouched.
fn collect_params(raw: &[String]) -> Result<Option<BTreeMap<String, String>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut params = BTreeMap::new();
    for entry in raw {
        let (key, value) = parse_key_value(entry)?;
        params.insert(key, value);
    }
    Ok(Some(params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_params() {
        assert!(collect_params(&[]).unwrap().is_none());

        let params = collect_params(&["approved=yes".to_string(), "approved=no".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["approved"], "no");

        assert!(collect_params(&["broken".to_string()]).is_err());
    }
}
