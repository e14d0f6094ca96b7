//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions, instances and
//! their tasks. The infrastructure layer (stagegate-infra) implements this
//! trait with SQLite persistence.

use stagegate_types::entity::WorkflowEntity;
use stagegate_types::error::RepositoryError;
use stagegate_types::workflow::{Workflow, WorkflowInstance, WorkflowInstanceTask};
use uuid::Uuid;

/// A group of records written together or not at all.
///
/// Every record is upserted by identity. The engine uses this to keep an
/// instance, its tasks and the bound entity consistent with each other.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub instance: Option<WorkflowInstance>,
    pub tasks: Vec<WorkflowInstanceTask>,
    pub entity: Option<WorkflowEntity>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(mut self, instance: &WorkflowInstance) -> Self {
        self.instance = Some(instance.clone());
        self
    }

    pub fn task(mut self, task: &WorkflowInstanceTask) -> Self {
        self.tasks.push(task.clone());
        self
    }

    pub fn entity(mut self, entity: &WorkflowEntity) -> Self {
        self.entity = Some(entity.clone());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.instance.is_none() && self.tasks.is_empty() && self.entity.is_none()
    }
}

/// Repository trait for workflow persistence.
///
/// Covers three record families:
/// - **Definitions:** CRUD for workflow definitions.
/// - **Instances:** lookups over running and terminated executions.
/// - **Tasks:** lookups over the step-execution attempts of an instance.
///
/// All runtime writes go through [`WorkflowRepository::commit`].
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn save_definition(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List workflow definitions, optionally filtered by entity type.
    fn list_definitions(
        &self,
        entity_type: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Delete a workflow definition by ID. Returns `true` if it existed.
    fn delete_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Get an instance by its UUID.
    fn get_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// List the instances bound to an entity, newest first.
    fn list_instances_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// List all instances without an end date, oldest first.
    fn list_running_instances(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Get a task by its UUID.
    fn get_task(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstanceTask>, RepositoryError>> + Send;

    /// List the tasks of an instance in creation order.
    fn list_tasks(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstanceTask>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Atomically upsert every record in the changeset.
    fn commit(
        &self,
        changes: &Changeset,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
