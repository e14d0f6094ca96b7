//! Execution context store.
//!
//! `WorkflowExecutionContext` is the flat string-to-string parameter map
//! shared by every condition and stage script of one instance. It is
//! persisted on the instance as a JSON object; an empty map persists as no
//! blob at all and a missing or empty blob loads as an empty map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// In-memory view of `WorkflowInstance::context`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowExecutionContext {
    params: BTreeMap<String, String>,
}

impl WorkflowExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserialize a persisted blob. `None` and blank text yield an empty map.
    pub fn from_blob(blob: Option<&str>) -> Result<Self, ContextError> {
        match blob {
            Some(text) if !text.trim().is_empty() => {
                serde_json::from_str(text).map_err(|e| ContextError::Malformed(e.to_string()))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Serialize for persistence. An empty map serializes to `None`.
    pub fn to_blob(&self) -> Result<Option<String>, ContextError> {
        if self.params.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(&self.params)
            .map(Some)
            .map_err(|e| ContextError::Serialize(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Set a parameter, or remove it when `value` is `None`.
    pub fn put(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match value {
            Some(v) => {
                self.params.insert(key, v);
            }
            None => {
                self.params.remove(&key);
            }
        }
    }

    /// Merge another map in; incoming keys overwrite existing ones.
    pub fn merge(&mut self, other: impl IntoIterator<Item = (String, String)>) {
        self.params.extend(other);
    }

    /// Apply script-produced updates: `null` removes a key, strings are
    /// stored as-is and other scalars by their JSON text.
    pub fn apply_updates(&mut self, updates: &serde_json::Map<String, Value>) {
        for (key, value) in updates {
            let value = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            self.put(key.clone(), value);
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.params.iter()
    }

    /// JSON object view used as the `context` script binding.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.params
    }
}

impl From<BTreeMap<String, String>> for WorkflowExecutionContext {
    fn from(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }
}

/// Errors from reading or writing a persisted context blob.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("malformed execution context: {0}")]
    Malformed(String),

    #[error("failed to serialize execution context: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_blob_is_empty_context() {
        assert!(WorkflowExecutionContext::from_blob(None).unwrap().is_empty());
        assert!(WorkflowExecutionContext::from_blob(Some("")).unwrap().is_empty());
        assert!(WorkflowExecutionContext::from_blob(Some("  ")).unwrap().is_empty());
    }

    #[test]
    fn test_empty_context_has_no_blob() {
        assert_eq!(WorkflowExecutionContext::new().to_blob().unwrap(), None);
    }

    #[test]
    fn test_roundtrip_keeps_all_keys() {
        let mut ctx = WorkflowExecutionContext::new();
        ctx.put("approved", Some("yes".to_string()));
        ctx.put("reviewer", Some("ana".to_string()));
        ctx.put("note", Some(String::new()));

        let blob = ctx.to_blob().unwrap();
        let loaded = WorkflowExecutionContext::from_blob(blob.as_deref()).unwrap();
        assert_eq!(loaded, ctx);
        assert_eq!(loaded.get("note"), Some(""));
    }

    #[test]
    fn test_malformed_blob() {
        let err = WorkflowExecutionContext::from_blob(Some("[1,2]")).unwrap_err();
        assert!(matches!(err, ContextError::Malformed(_)));
    }

    #[test]
    fn test_put_none_removes() {
        let mut ctx = WorkflowExecutionContext::new();
        ctx.put("a", Some("1".to_string()));
        ctx.put("a", None);
        assert!(ctx.get("a").is_none());
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_apply_updates() {
        let mut ctx = WorkflowExecutionContext::new();
        ctx.put("stale", Some("x".to_string()));
        let updates = json!({"stale": null, "count": 3, "flag": true, "name": "bob"});
        ctx.apply_updates(updates.as_object().unwrap());

        assert!(ctx.get("stale").is_none());
        assert_eq!(ctx.get("count"), Some("3"));
        assert_eq!(ctx.get("flag"), Some("true"));
        assert_eq!(ctx.get("name"), Some("bob"));
    }

    #[test]
    fn test_to_value_is_string_object() {
        let mut ctx = WorkflowExecutionContext::new();
        ctx.put("k", Some("v".to_string()));
        assert_eq!(ctx.to_value(), json!({"k": "v"}));
    }
}
