//! Script evaluation capability for direction conditions and stage scripts.
//!
//! The engine only sees the [`ScriptEvaluator`] trait: evaluate a piece of
//! text against a set of bindings and get a JSON value back. The bundled
//! implementation, [`JexlScriptEvaluator`], wraps `jexl_eval::Evaluator` with
//! pre-registered standard transforms.
//!
//! **Security note:** Bindings are always passed as context objects, NEVER
//! interpolated into script strings.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use stagegate_types::entity::WorkflowEntity;
use stagegate_types::workflow::{WorkflowInstance, WorkflowInstanceTask};

use super::context::WorkflowExecutionContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during script evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("script evaluation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid script bindings: {0}")]
    InvalidBindings(String),
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Variables visible to a script.
///
/// Shape of the evaluation context:
/// ```json
/// {
///   "entity":   { "entity_type": "...", "id": "...", "status": "...", "attributes": { ... } },
///   "context":  { "<key>": "<value>", ... },
///   "instance": { "id": "...", "workflow_id": "...", ... },
///   "task":     { "id": "...", "step_id": "...", ... }
/// }
/// ```
/// `task` is only present for stage scripts.
#[derive(Debug, Clone)]
pub struct ScriptBindings {
    entity: Value,
    context: Value,
    instance: Value,
    task: Option<Value>,
}

impl ScriptBindings {
    pub fn new(
        entity: &WorkflowEntity,
        context: &WorkflowExecutionContext,
        instance: &WorkflowInstance,
    ) -> Result<Self, ScriptError> {
        Ok(Self {
            entity: to_binding(entity)?,
            context: context.to_value(),
            instance: to_binding(instance)?,
            task: None,
        })
    }

    pub fn with_task(mut self, task: &WorkflowInstanceTask) -> Result<Self, ScriptError> {
        self.task = Some(to_binding(task)?);
        Ok(self)
    }

    /// Build the JSON object a script evaluates against.
    pub fn to_value(&self) -> Value {
        let mut root = serde_json::Map::new();
        root.insert("entity".to_string(), self.entity.clone());
        root.insert("context".to_string(), self.context.clone());
        root.insert("instance".to_string(), self.instance.clone());
        if let Some(task) = &self.task {
            root.insert("task".to_string(), task.clone());
        }
        Value::Object(root)
    }
}

fn to_binding<T: Serialize>(value: &T) -> Result<Value, ScriptError> {
    serde_json::to_value(value).map_err(|e| ScriptError::InvalidBindings(e.to_string()))
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Evaluates script text against bindings.
///
/// Implementations may block on arbitrary external work; callers bound each
/// call with a timeout.
pub trait ScriptEvaluator: Send + Sync {
    fn evaluate(
        &self,
        script: &str,
        bindings: &ScriptBindings,
    ) -> impl std::future::Future<Output = Result<Value, ScriptError>> + Send;
}

/// Run one evaluation, failing with [`ScriptError::Timeout`] when it
/// exceeds `limit`.
pub(crate) async fn evaluate_with_timeout<E: ScriptEvaluator>(
    evaluator: &E,
    script: &str,
    bindings: &ScriptBindings,
    limit: std::time::Duration,
) -> Result<Value, ScriptError> {
    tokio::time::timeout(limit, evaluator.evaluate(script, bindings))
        .await
        .map_err(|_| ScriptError::Timeout(limit))?
}

// ---------------------------------------------------------------------------
// JexlScriptEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with standard transforms pre-registered.
///
/// Each evaluation runs on the blocking thread pool so a slow script cannot
/// stall the async runtime and an outer timeout can abandon it.
///
/// Example scripts:
/// - condition: `entity.attributes.amount > 1000 && context.approved == 'yes'`
/// - stage: `{done: true, context: {checked: 'true'}}`
#[derive(Clone)]
pub struct JexlScriptEvaluator {
    evaluator: Arc<jexl_eval::Evaluator<'static>>,
}

impl JexlScriptEvaluator {
    /// Create an evaluator with all standard transforms registered.
    pub fn new() -> Self {
        Self {
            evaluator: Arc::new(build_evaluator()),
        }
    }

    /// Evaluate synchronously on the current thread.
    pub fn evaluate_blocking(&self, script: &str, context: &Value) -> Result<Value, ScriptError> {
        if !context.is_object() {
            return Err(ScriptError::InvalidBindings(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(script, context)
            .map_err(|e| ScriptError::Evaluation(e.to_string()))
    }
}

impl Default for JexlScriptEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JexlScriptEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JexlScriptEvaluator").finish_non_exhaustive()
    }
}

impl ScriptEvaluator for JexlScriptEvaluator {
    async fn evaluate(&self, script: &str, bindings: &ScriptBindings) -> Result<Value, ScriptError> {
        let script = script.to_string();
        let context = bindings.to_value();
        // Shares the transforms built in `new`; only the Arc is cloned.
        let evaluator = self.clone();
        tokio::task::spawn_blocking(move || evaluator.evaluate_blocking(&script, &context))
            .await
            .map_err(|e| ScriptError::Evaluation(format!("evaluation task aborted: {e}")))?
    }
}

fn build_evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        // String transforms
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("trim", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.trim()))
        })
        .with_transform("split", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
            let parts: Vec<&str> = s.split(delimiter).collect();
            Ok(json!(parts))
        })
        // Context values are strings; these let scripts compare them numerically.
        .with_transform("number", |args: &[Value]| {
            let n = match args.first() {
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
                Some(Value::Bool(b)) => f64::from(u8::from(*b)),
                _ => 0.0,
            };
            Ok(json!(n))
        })
        .with_transform("bool", |args: &[Value]| {
            let b = match args.first() {
                Some(Value::Bool(b)) => *b,
                Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
                _ => false,
            };
            Ok(json!(b))
        })
        .with_transform("not", |args: &[Value]| {
            let val = args.first().cloned().unwrap_or(Value::Null);
            let truthy = match &val {
                Value::Bool(b) => *b,
                Value::Null => false,
                Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
                Value::String(s) => !s.is_empty(),
                Value::Array(_) | Value::Object(_) => true,
            };
            Ok(json!(!truthy))
        })
        // String search transforms
        .with_transform("contains", |args: &[Value]| {
            let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(subject.contains(search)))
        })
        .with_transform("startsWith", |args: &[Value]| {
            let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(subject.starts_with(prefix)))
        })
        .with_transform("endsWith", |args: &[Value]| {
            let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
            let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(subject.ends_with(suffix)))
        })
        // Length transform (works on strings, arrays, and objects)
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.len(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
