//! SQLite entity repository implementation.
//!
//! Entities live in `workflow_entities` keyed by `(entity_type, id)`, with
//! their free-form attributes as a JSON object. Query conditions are SQL
//! boolean expressions evaluated against the entity's row (aliased `e`),
//! e.g. `json_extract(e.attributes, '$.amount') > 1000`. The condition text
//! comes from workflow definitions and is spliced into the statement, so
//! definitions must come from trusted authors.

use chrono::Utc;
use sqlx::{Row, SqliteConnection};
use stagegate_core::repository::entity::EntityRepository;
use stagegate_types::entity::{EntityStatus, WorkflowEntity};
use stagegate_types::error::RepositoryError;

use super::workflow::{SqliteWorkflowRepository, format_datetime};

struct EntityRow {
    entity_type: String,
    id: String,
    status: String,
    step_name: Option<String>,
    attributes: String,
}

impl EntityRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            entity_type: row.try_get("entity_type")?,
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            step_name: row.try_get("step_name")?,
            attributes: row.try_get("attributes")?,
        })
    }

    fn into_entity(self) -> Result<WorkflowEntity, RepositoryError> {
        let status: EntityStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let attributes = serde_json::from_str(&self.attributes)
            .map_err(|e| RepositoryError::Query(format!("invalid entity attributes JSON: {e}")))?;

        Ok(WorkflowEntity {
            entity_type: self.entity_type,
            id: self.id,
            status,
            step_name: self.step_name,
            attributes,
        })
    }
}

pub(super) async fn upsert_entity(
    conn: &mut SqliteConnection,
    entity: &WorkflowEntity,
) -> Result<(), RepositoryError> {
    let attributes = serde_json::to_string(&entity.attributes)
        .map_err(|e| RepositoryError::Query(format!("serialize entity attributes: {e}")))?;

    sqlx::query(
        r#"INSERT INTO workflow_entities (entity_type, id, status, step_name, attributes, updated_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(entity_type, id) DO UPDATE SET
             status = excluded.status,
             step_name = excluded.step_name,
             attributes = excluded.attributes,
             updated_at = excluded.updated_at"#,
    )
    .bind(&entity.entity_type)
    .bind(&entity.id)
    .bind(entity.status.to_string())
    .bind(&entity.step_name)
    .bind(&attributes)
    .bind(format_datetime(&Utc::now()))
    .execute(conn)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(())
}

impl EntityRepository for SqliteWorkflowRepository {
    async fn get_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<WorkflowEntity>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_entities WHERE entity_type = ? AND id = ?")
            .bind(entity_type)
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = EntityRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_entity()?))
            }
            None => Ok(None),
        }
    }

    async fn save_entity(&self, entity: &WorkflowEntity) -> Result<(), RepositoryError> {
        let mut conn = self
            .pool
            .writer
            .acquire()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        upsert_entity(&mut conn, entity).await
    }

    async fn entity_matches(
        &self,
        entity_type: &str,
        id: &str,
        filter: &str,
    ) -> Result<bool, RepositoryError> {
        let sql = format!(
            "SELECT COUNT(*) FROM workflow_entities e WHERE e.entity_type = ? AND e.id = ? AND ({filter})"
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(entity_type)
            .bind(id)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(format!("query condition `{filter}`: {e}")))?;

        tracing::trace!(entity_type, id, filter, count, "evaluated query condition");
        Ok(count > 0)
    }
}
