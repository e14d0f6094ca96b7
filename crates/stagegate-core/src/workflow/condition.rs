//! Direction condition evaluation.
//!
//! A direction is satisfied when its script returns boolean `true`, when the
//! bound entity matches its query filter, or unconditionally when it carries
//! neither. Script text takes precedence over query text.

use std::sync::Arc;
use std::time::Duration;

use stagegate_types::entity::WorkflowEntity;
use stagegate_types::error::RepositoryError;
use stagegate_types::workflow::{DirectionCondition, StepDirection};
use thiserror::Error;

use super::expression::{ScriptBindings, ScriptError, ScriptEvaluator, evaluate_with_timeout};
use crate::repository::entity::EntityRepository;

pub struct ConditionEvaluator<E: ScriptEvaluator> {
    evaluator: Arc<E>,
    timeout: Duration,
}

impl<E: ScriptEvaluator> ConditionEvaluator<E> {
    pub fn new(evaluator: Arc<E>, timeout: Duration) -> Self {
        Self { evaluator, timeout }
    }

    /// Decide whether `direction` can be taken.
    ///
    /// Only a literal boolean `true` satisfies a script condition; truthy
    /// non-boolean results do not.
    pub async fn is_satisfied<R: EntityRepository>(
        &self,
        direction: &StepDirection,
        bindings: &ScriptBindings,
        entities: &R,
        entity: &WorkflowEntity,
    ) -> Result<bool, ConditionError> {
        match direction.condition() {
            DirectionCondition::Script(script) => {
                let result =
                    evaluate_with_timeout(self.evaluator.as_ref(), script, bindings, self.timeout)
                        .await?;
                Ok(result == serde_json::Value::Bool(true))
            }
            DirectionCondition::Query(filter) => {
                let matched = tokio::time::timeout(
                    self.timeout,
                    entities.entity_matches(&entity.entity_type, &entity.id, filter),
                )
                .await
                .map_err(|_| ConditionError::Script(ScriptError::Timeout(self.timeout)))??;
                Ok(matched)
            }
            DirectionCondition::Unconditional => Ok(true),
        }
    }
}

/// Why a condition could not be decided.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("query condition failed: {0}")]
    Query(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::WorkflowExecutionContext;
    use crate::workflow::testing::{MemoryStore, ScriptedEvaluator};
    use chrono::Utc;
    use serde_json::json;
    use stagegate_types::workflow::WorkflowInstance;
    use uuid::Uuid;

    fn direction(script: Option<&str>, query: Option<&str>) -> StepDirection {
        StepDirection {
            to: "next".to_string(),
            script_condition: script.map(str::to_string),
            query_condition: query.map(str::to_string),
        }
    }

    fn fixture() -> (WorkflowEntity, ScriptBindings) {
        let entity = WorkflowEntity::new("invoice", "1");
        let instance = WorkflowInstance::new(Uuid::now_v7(), "invoice", "1", Utc::now());
        let bindings =
            ScriptBindings::new(&entity, &WorkflowExecutionContext::new(), &instance).unwrap();
        (entity, bindings)
    }

    fn evaluator(scripts: &[(&str, serde_json::Value)]) -> ConditionEvaluator<ScriptedEvaluator> {
        let scripted = ScriptedEvaluator::new();
        for (script, value) in scripts {
            scripted.returns(script, value.clone());
        }
        ConditionEvaluator::new(Arc::new(scripted), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_unconditional_is_satisfied() {
        let (entity, bindings) = fixture();
        let store = MemoryStore::new();
        let cond = evaluator(&[]);
        assert!(cond
            .is_satisfied(&direction(None, None), &bindings, &store, &entity)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_only_boolean_true_satisfies_script() {
        let (entity, bindings) = fixture();
        let store = MemoryStore::new();
        let cond = evaluator(&[
            ("yes", json!(true)),
            ("no", json!(false)),
            ("one", json!(1)),
            ("text", json!("true")),
        ]);

        for (script, expected) in [("yes", true), ("no", false), ("one", false), ("text", false)] {
            let satisfied = cond
                .is_satisfied(&direction(Some(script), None), &bindings, &store, &entity)
                .await
                .unwrap();
            assert_eq!(satisfied, expected, "script {script}");
        }
    }

    #[tokio::test]
    async fn test_script_wins_over_query() {
        let (entity, bindings) = fixture();
        let store = MemoryStore::new();
        store.set_query_result("status = 'x'", true);
        let cond = evaluator(&[("no", json!(false))]);

        let satisfied = cond
            .is_satisfied(
                &direction(Some("no"), Some("status = 'x'")),
                &bindings,
                &store,
                &entity,
            )
            .await
            .unwrap();
        assert!(!satisfied);
    }

    #[tokio::test]
    async fn test_query_condition_uses_entity_match() {
        let (entity, bindings) = fixture();
        let store = MemoryStore::new();
        store.set_query_result("amount > 10", true);
        let cond = evaluator(&[]);

        assert!(cond
            .is_satisfied(&direction(None, Some("amount > 10")), &bindings, &store, &entity)
            .await
            .unwrap());
        assert!(!cond
            .is_satisfied(&direction(None, Some("amount > 99")), &bindings, &store, &entity)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_script_failure_is_error() {
        let (entity, bindings) = fixture();
        let store = MemoryStore::new();
        let scripted = ScriptedEvaluator::new();
        scripted.fails("broken", "undefined variable");
        let cond = ConditionEvaluator::new(Arc::new(scripted), Duration::from_secs(5));

        let err = cond
            .is_satisfied(&direction(Some("broken"), None), &bindings, &store, &entity)
            .await
            .unwrap_err();
        assert!(matches!(err, ConditionError::Script(ScriptError::Evaluation(_))));
    }

    #[tokio::test]
    async fn test_slow_script_times_out() {
        let (entity, bindings) = fixture();
        let store = MemoryStore::new();
        let scripted = ScriptedEvaluator::new();
        scripted.delays("slow", Duration::from_secs(10));
        let cond = ConditionEvaluator::new(Arc::new(scripted), Duration::from_millis(20));

        let err = cond
            .is_satisfied(&direction(Some("slow"), None), &bindings, &store, &entity)
            .await
            .unwrap_err();
        assert!(matches!(err, ConditionError::Script(ScriptError::Timeout(_))));
    }
}
