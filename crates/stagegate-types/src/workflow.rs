//! Workflow domain types for Stagegate.
//!
//! Defines the definition model (`Workflow`, `Step`, `Stage`,
//! `StepDirection`), which is immutable while instances run, and the
//! runtime records (`WorkflowInstance`, `WorkflowInstanceTask`) that the
//! engine appends to and updates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A workflow definition: a directed graph of steps bound to one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned when the definition is first parsed.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Entity type this workflow drives. Compared by exact string equality.
    pub entity_type: String,
    /// Only active workflows can be started.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Steps in declaration order. Selection of the first step uses `order`.
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_active() -> bool {
    true
}

/// A node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Author-chosen identifier, unique within the workflow.
    pub id: String,
    /// Selection rank: the step with the lowest order starts the workflow.
    #[serde(default)]
    pub order: i32,
    pub stage: Stage,
    /// Outgoing edges, evaluated in declaration order.
    #[serde(default)]
    pub directions: Vec<StepDirection>,
}

/// Behavior attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    /// Script run for `automatic_execution` stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_script: Option<String>,
    /// Roles allowed to complete a `user_interaction` stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actors: Vec<String>,
    /// Roles allowed to view the entity while it sits in this stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub viewers: Vec<String>,
}

/// How a stage is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Completed by the engine running the stage's script.
    AutomaticExecution,
    /// Completed by an external actor calling `finish_task`.
    UserInteraction,
    /// Parking stage; completed externally like a user interaction.
    Archive,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageType::AutomaticExecution => write!(f, "automatic_execution"),
            StageType::UserInteraction => write!(f, "user_interaction"),
            StageType::Archive => write!(f, "archive"),
        }
    }
}

/// An outgoing edge of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDirection {
    /// Target step id.
    pub to: String,
    /// Expression that must evaluate to boolean `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_condition: Option<String>,
    /// SQL filter clause that the bound entity must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_condition: Option<String>,
}

/// The condition a direction actually carries, after blank texts are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionCondition<'a> {
    Script(&'a str),
    Query(&'a str),
    Unconditional,
}

impl StepDirection {
    /// Resolve which condition kind applies. A script wins over a query.
    pub fn condition(&self) -> DirectionCondition<'_> {
        if let Some(script) = non_blank(self.script_condition.as_deref()) {
            DirectionCondition::Script(script)
        } else if let Some(query) = non_blank(self.query_condition.as_deref()) {
            DirectionCondition::Query(query)
        } else {
            DirectionCondition::Unconditional
        }
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Workflow Instance (runtime record)
// ---------------------------------------------------------------------------

/// Lifecycle state of an instance, derived from its end date and error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Running,
    Done,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Running => write!(f, "running"),
            InstanceState::Done => write!(f, "done"),
            InstanceState::Failed => write!(f, "failed"),
        }
    }
}

/// One execution of a workflow against one business entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// UUIDv7 instance ID.
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, on termination. Cleared only by a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure detail, including the causal chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the failure happened while a task was current.
    #[serde(default)]
    pub error_in_task: bool,
    /// Serialized execution context (JSON object of string to string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// The most recently created task of this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<Uuid>,
}

impl WorkflowInstance {
    pub fn new(workflow_id: Uuid, entity_type: &str, entity_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            started_at: now,
            ended_at: None,
            error: None,
            error_in_task: false,
            context: None,
            current_task_id: None,
        }
    }

    pub fn state(&self) -> InstanceState {
        match (&self.ended_at, self.has_error()) {
            (None, _) => InstanceState::Running,
            (Some(_), true) => InstanceState::Failed,
            (Some(_), false) => InstanceState::Done,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// One attempt to execute a single step within an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceTask {
    /// UUIDv7 task ID; creation order equals ID order.
    pub id: Uuid,
    pub instance_id: Uuid,
    pub step_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowInstanceTask {
    pub fn new(instance_id: Uuid, step_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            instance_id,
            step_id: step_id.to_string(),
            started_at: now,
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn direction(script: Option<&str>, query: Option<&str>) -> StepDirection {
        StepDirection {
            to: "next".to_string(),
            script_condition: script.map(str::to_string),
            query_condition: query.map(str::to_string),
        }
    }

    #[test]
    fn test_direction_condition_precedence() {
        assert_eq!(
            direction(Some("a == 1"), Some("x = 1")).condition(),
            DirectionCondition::Script("a == 1")
        );
        assert_eq!(
            direction(None, Some("x = 1")).condition(),
            DirectionCondition::Query("x = 1")
        );
        assert_eq!(
            direction(Some("  "), Some("x = 1")).condition(),
            DirectionCondition::Query("x = 1")
        );
        assert_eq!(
            direction(Some(""), Some("")).condition(),
            DirectionCondition::Unconditional
        );
        assert_eq!(direction(None, None).condition(), DirectionCondition::Unconditional);
    }

    #[test]
    fn test_instance_state_transitions() {
        let mut instance = WorkflowInstance::new(Uuid::now_v7(), "invoice", "1", Utc::now());
        assert_eq!(instance.state(), InstanceState::Running);

        instance.ended_at = Some(Utc::now());
        assert_eq!(instance.state(), InstanceState::Done);

        instance.error = Some(String::new());
        assert_eq!(instance.state(), InstanceState::Done);

        instance.error = Some("boom".to_string());
        assert_eq!(instance.state(), InstanceState::Failed);
    }

    #[test]
    fn test_workflow_deserialize_defaults() {
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "approval",
            "entity_type": "invoice",
            "steps": [{
                "id": "review",
                "stage": {"name": "Review", "type": "user_interaction", "actors": ["clerk"]}
            }]
        }))
        .unwrap();

        assert!(workflow.active);
        assert_eq!(workflow.steps.len(), 1);
        assert_eq!(workflow.steps[0].order, 0);
        assert!(workflow.steps[0].directions.is_empty());
        assert_eq!(workflow.steps[0].stage.stage_type, StageType::UserInteraction);
        assert_eq!(workflow.steps[0].stage.actors, vec!["clerk".to_string()]);
    }

    #[test]
    fn test_instance_serde_skips_empty_fields() {
        let instance = WorkflowInstance::new(Uuid::now_v7(), "invoice", "1", Utc::now());
        let value = serde_json::to_value(&instance).unwrap();
        assert!(value.get("ended_at").is_none());
        assert!(value.get("error").is_none());
        assert!(value.get("context").is_none());
        assert_eq!(value["error_in_task"], json!(false));
    }
}
