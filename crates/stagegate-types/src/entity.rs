//! Business entity records driven through workflows.
//!
//! The engine does not own business data. It only needs a status, a
//! current-step label and a stable `(entity_type, id)` identity; everything
//! else lives in the free-form `attributes` object that scripts and query
//! conditions read.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Processing status of a business entity, synchronized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    New,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::New => write!(f, "new"),
            EntityStatus::InProgress => write!(f, "in_progress"),
            EntityStatus::Done => write!(f, "done"),
            EntityStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(EntityStatus::New),
            "in_progress" => Ok(EntityStatus::InProgress),
            "done" => Ok(EntityStatus::Done),
            "failed" => Ok(EntityStatus::Failed),
            other => Err(format!("invalid entity status: '{other}'")),
        }
    }
}

impl Default for EntityStatus {
    fn default() -> Self {
        EntityStatus::New
    }
}

/// A business object bound to workflow instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEntity {
    /// Type name matched against `Workflow::entity_type`.
    pub entity_type: String,
    /// String form of the entity's identity, unique within its type.
    pub id: String,
    #[serde(default)]
    pub status: EntityStatus,
    /// Name of the stage the entity currently sits in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Business payload visible to condition and stage scripts.
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowEntity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            status: EntityStatus::New,
            step_name: None,
            attributes: serde_json::Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
