//! In-memory test doubles for the repository ports and the script evaluator.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use stagegate_types::entity::WorkflowEntity;
use stagegate_types::error::RepositoryError;
use stagegate_types::workflow::{Workflow, WorkflowInstance, WorkflowInstanceTask};
use uuid::Uuid;

use super::expression::{ScriptBindings, ScriptError, ScriptEvaluator};
use crate::repository::entity::EntityRepository;
use crate::repository::workflow::{Changeset, WorkflowRepository};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    workflows: HashMap<Uuid, Workflow>,
    instances: HashMap<Uuid, WorkflowInstance>,
    /// Insertion order is creation order.
    tasks: Vec<WorkflowInstanceTask>,
    entities: HashMap<(String, String), WorkflowEntity>,
    commits: usize,
}

/// Implements both repository traits over plain maps.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    query_results: Mutex<HashMap<String, bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result returned by `entity_matches` for `filter`; unknown filters match nothing.
    pub fn set_query_result(&self, filter: &str, matched: bool) {
        self.query_results
            .lock()
            .unwrap()
            .insert(filter.to_string(), matched);
    }

    pub fn put_workflow(&self, workflow: &Workflow) {
        self.state
            .lock()
            .unwrap()
            .workflows
            .insert(workflow.id, workflow.clone());
    }

    pub fn put_entity(&self, entity: &WorkflowEntity) {
        self.state.lock().unwrap().entities.insert(
            (entity.entity_type.clone(), entity.id.clone()),
            entity.clone(),
        );
    }

    pub fn remove_entity(&self, entity_type: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .entities
            .remove(&(entity_type.to_string(), id.to_string()));
    }

    pub fn instance(&self, id: &Uuid) -> Option<WorkflowInstance> {
        self.state.lock().unwrap().instances.get(id).cloned()
    }

    pub fn task(&self, id: &Uuid) -> Option<WorkflowInstanceTask> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .find(|t| t.id == *id)
            .cloned()
    }

    pub fn tasks_of(&self, instance_id: &Uuid) -> Vec<WorkflowInstanceTask> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.instance_id == *instance_id)
            .cloned()
            .collect()
    }

    pub fn entity(&self, entity_type: &str, id: &str) -> Option<WorkflowEntity> {
        self.state
            .lock()
            .unwrap()
            .entities
            .get(&(entity_type.to_string(), id.to_string()))
            .cloned()
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commits
    }
}

impl WorkflowRepository for MemoryStore {
    async fn save_definition(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        self.put_workflow(workflow);
        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.state.lock().unwrap().workflows.get(id).cloned())
    }

    async fn list_definitions(
        &self,
        entity_type: Option<&str>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut workflows: Vec<Workflow> = state
            .workflows
            .values()
            .filter(|w| entity_type.is_none_or(|t| w.entity_type == t))
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.state.lock().unwrap().workflows.remove(id).is_some())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.instance(id))
    }

    async fn list_instances_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut instances: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| i.entity_type == entity_type && i.entity_id == entity_id)
            .cloned()
            .collect();
        instances.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(instances)
    }

    async fn list_running_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut instances: Vec<WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| i.ended_at.is_none())
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(instances)
    }

    async fn get_task(&self, id: &Uuid) -> Result<Option<WorkflowInstanceTask>, RepositoryError> {
        Ok(self.task(id))
    }

    async fn list_tasks(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<WorkflowInstanceTask>, RepositoryError> {
        Ok(self.tasks_of(instance_id))
    }

    async fn commit(&self, changes: &Changeset) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if let Some(instance) = &changes.instance {
            state.instances.insert(instance.id, instance.clone());
        }
        for task in &changes.tasks {
            match state.tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => state.tasks.push(task.clone()),
            }
        }
        if let Some(entity) = &changes.entity {
            state.entities.insert(
                (entity.entity_type.clone(), entity.id.clone()),
                entity.clone(),
            );
        }
        state.commits += 1;
        Ok(())
    }
}

impl EntityRepository for MemoryStore {
    async fn get_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<WorkflowEntity>, RepositoryError> {
        Ok(self.entity(entity_type, id))
    }

    async fn save_entity(&self, entity: &WorkflowEntity) -> Result<(), RepositoryError> {
        self.put_entity(entity);
        Ok(())
    }

    async fn entity_matches(
        &self,
        entity_type: &str,
        id: &str,
        filter: &str,
    ) -> Result<bool, RepositoryError> {
        if self.entity(entity_type, id).is_none() {
            return Ok(false);
        }
        Ok(self
            .query_results
            .lock()
            .unwrap()
            .get(filter)
            .copied()
            .unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// ScriptedEvaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Behavior {
    Return(Value),
    Fail(String),
    Delay(Duration),
}

/// Evaluator whose results are configured per script text. Records every
/// script it is asked to evaluate, in order.
#[derive(Default)]
pub struct ScriptedEvaluator {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returns(&self, script: &str, value: Value) {
        self.set(script, Behavior::Return(value));
    }

    pub fn fails(&self, script: &str, message: &str) {
        self.set(script, Behavior::Fail(message.to_string()));
    }

    /// Sleep for `delay`, then return `true`.
    pub fn delays(&self, script: &str, delay: Duration) {
        self.set(script, Behavior::Delay(delay));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn set(&self, script: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(script.to_string(), behavior);
    }
}

impl ScriptEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, script: &str, _bindings: &ScriptBindings) -> Result<Value, ScriptError> {
        self.calls.lock().unwrap().push(script.to_string());
        let behavior = self.behaviors.lock().unwrap().get(script).cloned();
        match behavior {
            Some(Behavior::Return(value)) => Ok(value),
            Some(Behavior::Fail(message)) => Err(ScriptError::Evaluation(message)),
            Some(Behavior::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Value::Bool(true))
            }
            None => Err(ScriptError::Evaluation(format!("no scripted result for '{script}'"))),
        }
    }
}
