//! Stage executor for automatic stages.
//!
//! Runs a stage's `execution_script` and interprets the result:
//! - boolean `true`: the stage is finished
//! - `{ "done": true, "context": { ... } }`: finished, and the context
//!   updates are merged into the execution context (`null` removes a key)
//! - anything else: not finished yet, the task stays open
//!
//! A stage without script text is finished immediately.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stagegate_types::workflow::Stage;

use super::context::WorkflowExecutionContext;
use super::expression::{ScriptBindings, ScriptError, ScriptEvaluator, evaluate_with_timeout};

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub done: bool,
    /// Context updates, only ever present when `done`.
    pub context_updates: Option<serde_json::Map<String, Value>>,
}

impl StageOutcome {
    fn finished() -> Self {
        Self { done: true, context_updates: None }
    }

    fn pending() -> Self {
        Self { done: false, context_updates: None }
    }

    /// Merge this outcome's updates into `context`. Returns whether anything changed.
    pub fn apply_to(&self, context: &mut WorkflowExecutionContext) -> bool {
        match &self.context_updates {
            Some(updates) if !updates.is_empty() => {
                context.apply_updates(updates);
                true
            }
            _ => false,
        }
    }
}

pub struct StageExecutor<E: ScriptEvaluator> {
    evaluator: Arc<E>,
    timeout: Duration,
}

impl<E: ScriptEvaluator> StageExecutor<E> {
    pub fn new(evaluator: Arc<E>, timeout: Duration) -> Self {
        Self { evaluator, timeout }
    }

    pub async fn execute(
        &self,
        stage: &Stage,
        bindings: &ScriptBindings,
    ) -> Result<StageOutcome, ScriptError> {
        let script = match stage.execution_script.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                tracing::debug!(stage = %stage.name, "stage has no script, treating as finished");
                return Ok(StageOutcome::finished());
            }
        };

        let result =
            evaluate_with_timeout(self.evaluator.as_ref(), script, bindings, self.timeout).await?;
        Ok(interpret(result))
    }
}

fn interpret(result: Value) -> StageOutcome {
    match result {
        Value::Bool(true) => StageOutcome::finished(),
        Value::Object(mut map) => {
            if map.get("done") != Some(&Value::Bool(true)) {
                return StageOutcome::pending();
            }
            let context_updates = match map.remove("context") {
                Some(Value::Object(updates)) => Some(updates),
                _ => None,
            };
            StageOutcome { done: true, context_updates }
        }
        _ => StageOutcome::pending(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::ScriptedEvaluator;
    use chrono::Utc;
    use serde_json::json;
    use stagegate_types::entity::WorkflowEntity;
    use stagegate_types::workflow::{StageType, WorkflowInstance};
    use uuid::Uuid;

    fn stage(script: Option<&str>) -> Stage {
        Stage {
            name: "Check".to_string(),
            stage_type: StageType::AutomaticExecution,
            execution_script: script.map(str::to_string),
            actors: vec![],
            viewers: vec![],
        }
    }

    fn bindings() -> ScriptBindings {
        let entity = WorkflowEntity::new("invoice", "1");
        let instance = WorkflowInstance::new(Uuid::now_v7(), "invoice", "1", Utc::now());
        ScriptBindings::new(&entity, &WorkflowExecutionContext::new(), &instance).unwrap()
    }

    fn executor(scripted: ScriptedEvaluator) -> StageExecutor<ScriptedEvaluator> {
        StageExecutor::new(Arc::new(scripted), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_empty_script_is_finished() {
        let exec = executor(ScriptedEvaluator::new());
        assert!(exec.execute(&stage(None), &bindings()).await.unwrap().done);
        assert!(exec.execute(&stage(Some("  ")), &bindings()).await.unwrap().done);
    }

    #[tokio::test]
    async fn test_boolean_results() {
        let scripted = ScriptedEvaluator::new();
        scripted.returns("yes", json!(true));
        scripted.returns("no", json!(false));
        scripted.returns("null", Value::Null);
        let exec = executor(scripted);

        assert!(exec.execute(&stage(Some("yes")), &bindings()).await.unwrap().done);
        assert!(!exec.execute(&stage(Some("no")), &bindings()).await.unwrap().done);
        assert!(!exec.execute(&stage(Some("null")), &bindings()).await.unwrap().done);
    }

    #[tokio::test]
    async fn test_object_result_carries_context_only_when_done() {
        let scripted = ScriptedEvaluator::new();
        scripted.returns("done", json!({"done": true, "context": {"score": 7, "old": null}}));
        scripted.returns("later", json!({"done": false, "context": {"score": 1}}));
        let exec = executor(scripted);

        let outcome = exec.execute(&stage(Some("done")), &bindings()).await.unwrap();
        assert!(outcome.done);
        let mut ctx = WorkflowExecutionContext::new();
        ctx.put("old", Some("x".to_string()));
        assert!(outcome.apply_to(&mut ctx));
        assert_eq!(ctx.get("score"), Some("7"));
        assert!(ctx.get("old").is_none());

        let outcome = exec.execute(&stage(Some("later")), &bindings()).await.unwrap();
        assert_eq!(outcome, StageOutcome::pending());
    }

    #[tokio::test]
    async fn test_apply_without_updates_reports_no_change() {
        let scripted = ScriptedEvaluator::new();
        scripted.returns("plain", json!(true));
        scripted.returns("empty", json!({"done": true, "context": {}}));
        let exec = executor(scripted);

        let mut ctx = WorkflowExecutionContext::new();
        ctx.put("kept", Some("1".to_string()));
        for script in ["plain", "empty"] {
            let outcome = exec.execute(&stage(Some(script)), &bindings()).await.unwrap();
            assert!(outcome.done);
            assert!(!outcome.apply_to(&mut ctx));
        }
        assert_eq!(ctx.get("kept"), Some("1"));
    }

    #[tokio::test]
    async fn test_script_error_propagates() {
        let scripted = ScriptedEvaluator::new();
        scripted.fails("boom", "division by zero");
        let exec = executor(scripted);
        let err = exec.execute(&stage(Some("boom")), &bindings()).await.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }
}
