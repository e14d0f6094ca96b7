//! Application state wiring the engine to the SQLite store.
//!
//! The engine is generic over its repository and script evaluator; AppState
//! pins it to the concrete infra implementations.

use std::sync::Arc;

use anyhow::Context;
use stagegate_core::workflow::engine::WorkflowEngine;
use stagegate_core::workflow::expression::JexlScriptEvaluator;
use stagegate_infra::config::{load_global_config, resolve_database_url};
use stagegate_infra::filesystem::{ensure_data_dir, resolve_data_dir};
use stagegate_infra::sqlite::pool::DatabasePool;
use stagegate_infra::sqlite::workflow::SqliteWorkflowRepository;

/// The engine pinned to SQLite storage and JEXL scripts.
pub type ConcreteEngine = WorkflowEngine<SqliteWorkflowRepository, JexlScriptEvaluator>;

/// Shared application state used by every CLI command.
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub repo: Arc<SqliteWorkflowRepository>,
}

impl AppState {
    /// Resolve the data directory, load configuration, open the database and
    /// build the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        ensure_data_dir(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_global_config(&data_dir).await;
        let db_url = resolve_database_url(&config, &data_dir);
        let pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("Failed to open database at {db_url}"))?;

        let repo = Arc::new(SqliteWorkflowRepository::new(pool));
        let engine = WorkflowEngine::new(
            repo.clone(),
            Arc::new(JexlScriptEvaluator::new()),
            config.engine.clone(),
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state initialized");

        Ok(Self {
            engine: Arc::new(engine),
            repo,
        })
    }
}
