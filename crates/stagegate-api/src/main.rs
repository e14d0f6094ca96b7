//! Stagegate operator CLI entry point.
//!
//! Binary name: `sgate`
//!
//! Parses CLI arguments, sets up tracing, opens the workflow store and
//! dispatches to the matching command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use stagegate_observe::tracing_setup::{TracingConfig, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "sgate", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&TracingConfig {
        default_filter: cli::verbosity_filter(cli.verbose, cli.quiet).to_string(),
        json: false,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;
    let json = cli.json;

    match cli.command {
        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, json).await?;
        }
        Commands::Entity { action } => {
            cli::entity::handle_entity_command(action, &state, json).await?;
        }
        Commands::Start {
            entity_type,
            entity_id,
            workflow,
        } => {
            cli::instance::handle_start(&entity_type, &entity_id, workflow.as_deref(), &state, json)
                .await?;
        }
        Commands::Task { action } => {
            cli::task::handle_task_command(action, &state, json).await?;
        }
        Commands::Instance { action } => {
            cli::instance::handle_instance_command(action, &state, json).await?;
        }
        Commands::Context { action } => {
            cli::context::handle_context_command(action, &state, json).await?;
        }
        Commands::Recover => {
            cli::instance::handle_recover(&state, json).await?;
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
