//! Terminal outcome handler.
//!
//! Marks an instance done or failed and keeps the bound entity's status in
//! step with it. Each outcome is written as one changeset so the instance,
//! its current task and the entity never disagree.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use stagegate_types::entity::{EntityStatus, WorkflowEntity};
use stagegate_types::error::RepositoryError;
use stagegate_types::workflow::{WorkflowInstance, WorkflowInstanceTask};

use crate::repository::workflow::{Changeset, WorkflowRepository};

/// Recorded when a failure carries no message of its own.
pub const FALLBACK_ERROR: &str = "internal error";

pub struct OutcomeRecorder<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> OutcomeRecorder<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Terminate `instance` successfully.
    pub async fn mark_done(
        &self,
        instance: &mut WorkflowInstance,
        entity: Option<&mut WorkflowEntity>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        instance.ended_at = Some(now);
        instance.error = None;
        instance.error_in_task = false;

        let mut changes = Changeset::new().instance(instance);
        if let Some(entity) = entity {
            entity.status = EntityStatus::Done;
            changes = changes.entity(entity);
        }
        self.repo.commit(&changes).await?;

        tracing::info!(instance_id = %instance.id, "workflow instance done");
        Ok(())
    }

    /// Terminate `instance` with an error.
    ///
    /// When a task is given the failure is attributed to it: `error_in_task`
    /// is set and the task is closed unless it already was.
    pub async fn mark_failed(
        &self,
        instance: &mut WorkflowInstance,
        task: Option<&mut WorkflowInstanceTask>,
        entity: Option<&mut WorkflowEntity>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let error = if error.trim().is_empty() { FALLBACK_ERROR } else { error };

        instance.ended_at = Some(now);
        instance.error = Some(error.to_string());
        instance.error_in_task = task.is_some();

        let mut changes = Changeset::new().instance(instance);
        if let Some(task) = task {
            if task.ended_at.is_none() {
                task.ended_at = Some(now);
            }
            changes = changes.task(task);
        }
        if let Some(entity) = entity {
            entity.status = EntityStatus::Failed;
            changes = changes.entity(entity);
        }
        self.repo.commit(&changes).await?;

        tracing::info!(
            instance_id = %instance.id,
            error_in_task = instance.error_in_task,
            "workflow instance failed"
        );
        Ok(())
    }
}

/// Render an error and its whole `source()` chain.
///
/// Sources whose text already appears in the rendered message are skipped,
/// since many error types repeat their source in their own message.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str("\ncaused by: ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}
