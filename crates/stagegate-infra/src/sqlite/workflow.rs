//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `stagegate-core` using sqlx with split
//! read/write pools. Workflow definitions are stored as JSON blobs next to the
//! indexed columns used for lookups. Instances and tasks are plain rows; a
//! `Changeset` is written in a single transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqliteConnection};
use stagegate_core::repository::workflow::{Changeset, WorkflowRepository};
use stagegate_types::error::RepositoryError;
use stagegate_types::workflow::{Workflow, WorkflowInstance, WorkflowInstanceTask};
use uuid::Uuid;

use super::entity::upsert_entity;
use super::pool::DatabasePool;

/// SQLite-backed store for definitions, instances, tasks and entities.
///
/// Implements both `WorkflowRepository` and `EntityRepository` (see
/// `sqlite::entity`) so one value can back a `WorkflowEngine`.
pub struct SqliteWorkflowRepository {
    pub(super) pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowDefRow {
    definition: String,
}

impl WorkflowDefRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            definition: row.try_get("definition")?,
        })
    }

    fn into_definition(self) -> Result<Workflow, RepositoryError> {
        serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))
    }
}

struct InstanceRow {
    id: String,
    workflow_id: String,
    entity_type: String,
    entity_id: String,
    started_at: String,
    ended_at: Option<String>,
    error: Option<String>,
    error_in_task: bool,
    context: Option<String>,
    current_task_id: Option<String>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            error: row.try_get("error")?,
            error_in_task: row.try_get("error_in_task")?,
            context: row.try_get("context")?,
            current_task_id: row.try_get("current_task_id")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            started_at: parse_datetime(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_datetime).transpose()?,
            error: self.error,
            error_in_task: self.error_in_task,
            context: self.context,
            current_task_id: self.current_task_id.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

struct TaskRow {
    id: String,
    instance_id: String,
    step_id: String,
    started_at: String,
    ended_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            step_id: row.try_get("step_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }

    fn into_task(self) -> Result<WorkflowInstanceTask, RepositoryError> {
        Ok(WorkflowInstanceTask {
            id: parse_uuid(&self.id)?,
            instance_id: parse_uuid(&self.instance_id)?,
            step_id: self.step_id,
            started_at: parse_datetime(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(super) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(super) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so stored timestamps sort as text.
pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

async fn upsert_instance(
    conn: &mut SqliteConnection,
    instance: &WorkflowInstance,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO workflow_instances
           (id, workflow_id, entity_type, entity_id, started_at, ended_at,
            error, error_in_task, context, current_task_id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
             ended_at = excluded.ended_at,
             error = excluded.error,
             error_in_task = excluded.error_in_task,
             context = excluded.context,
             current_task_id = excluded.current_task_id"#,
    )
    .bind(instance.id.to_string())
    .bind(instance.workflow_id.to_string())
    .bind(&instance.entity_type)
    .bind(&instance.entity_id)
    .bind(format_datetime(&instance.started_at))
    .bind(instance.ended_at.as_ref().map(format_datetime))
    .bind(&instance.error)
    .bind(instance.error_in_task)
    .bind(&instance.context)
    .bind(instance.current_task_id.map(|id| id.to_string()))
    .execute(conn)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(())
}

async fn upsert_task(
    conn: &mut SqliteConnection,
    task: &WorkflowInstanceTask,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO workflow_instance_tasks (id, instance_id, step_id, started_at, ended_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET ended_at = excluded.ended_at"#,
    )
    .bind(task.id.to_string())
    .bind(task.instance_id.to_string())
    .bind(&task.step_id)
    .bind(format_datetime(&task.started_at))
    .bind(task.ended_at.as_ref().map(format_datetime))
    .execute(conn)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(())
}

fn rows_into_instances(
    rows: &[sqlx::sqlite::SqliteRow],
) -> Result<Vec<WorkflowInstance>, RepositoryError> {
    let mut instances = Vec::with_capacity(rows.len());
    for row in rows {
        let r = InstanceRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        instances.push(r.into_instance()?);
    }
    Ok(instances)
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(workflow)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO workflows (id, name, entity_type, active, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 entity_type = excluded.entity_type,
                 active = excluded.active,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.entity_type)
        .bind(workflow.active)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowDefRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn list_definitions(
        &self,
        entity_type: Option<&str>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = match entity_type {
            Some(t) => {
                sqlx::query(
                    "SELECT definition FROM workflows WHERE entity_type = ? ORDER BY name ASC",
                )
                .bind(t)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT definition FROM workflows ORDER BY name ASC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = WorkflowDefRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            defs.push(r.into_definition()?);
        }
        Ok(defs)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn list_instances_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_instances WHERE entity_type = ? AND entity_id = ? ORDER BY started_at DESC, id DESC",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_into_instances(&rows)
    }

    async fn list_running_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_instances WHERE ended_at IS NULL ORDER BY started_at ASC, id ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows_into_instances(&rows)
    }

    async fn get_task(&self, id: &Uuid) -> Result<Option<WorkflowInstanceTask>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instance_tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = TaskRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_task()?))
            }
            None => Ok(None),
        }
    }

    async fn list_tasks(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<WorkflowInstanceTask>, RepositoryError> {
        // rowid is insertion order; upserts keep it.
        let rows = sqlx::query(
            "SELECT * FROM workflow_instance_tasks WHERE instance_id = ? ORDER BY rowid ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = TaskRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    async fn commit(&self, changes: &Changeset) -> Result<(), RepositoryError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Instance first: tasks reference it.
        if let Some(instance) = &changes.instance {
            upsert_instance(&mut tx, instance).await?;
        }
        for task in &changes.tasks {
            upsert_task(&mut tx, task).await?;
        }
        if let Some(entity) = &changes.entity {
            upsert_entity(&mut tx, entity).await?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
