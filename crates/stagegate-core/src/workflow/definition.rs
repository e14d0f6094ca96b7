//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and the `Workflow` definition model and
//! validates the structural constraints the engine relies on: unique step
//! IDs and directions that point at existing steps.

use std::collections::HashSet;
use std::path::Path;

use stagegate_types::workflow::{StageType, Workflow};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating a definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A direction targets a step that does not exist.
    #[error("step '{from}' has a direction to unknown step '{to}'")]
    UnknownTarget { from: String, to: String },

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `Workflow`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid.
pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, DefinitionError> {
    let workflow: Workflow =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::ParseError(e.to_string()))?;
    validate_definition(&workflow)?;
    Ok(workflow)
}

/// Serialize a `Workflow` to a YAML string.
pub fn serialize_workflow_yaml(workflow: &Workflow) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `Workflow`.
///
/// Checks:
/// - Name and entity type are non-empty
/// - All step IDs are non-empty and unique
/// - Every stage has a name
/// - All direction targets point to existing step IDs
///
/// A workflow with zero steps is valid: starting it finishes immediately.
pub fn validate_definition(workflow: &Workflow) -> Result<(), DefinitionError> {
    if workflow.name.trim().is_empty() {
        return Err(DefinitionError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if workflow.entity_type.trim().is_empty() {
        return Err(DefinitionError::ValidationError(
            "workflow entity_type must not be empty".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &workflow.steps {
        if step.id.is_empty() {
            return Err(DefinitionError::ValidationError(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(DefinitionError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
        if step.stage.name.trim().is_empty() {
            return Err(DefinitionError::ValidationError(format!(
                "step '{}' has a stage without a name",
                step.id
            )));
        }
        if step.stage.stage_type != StageType::AutomaticExecution
            && step.stage.execution_script.is_some()
        {
            tracing::warn!(
                step_id = %step.id,
                stage_type = %step.stage.stage_type,
                "execution_script is ignored for non-automatic stages"
            );
        }
    }

    for step in &workflow.steps {
        for direction in &step.directions {
            if !seen_ids.contains(direction.to.as_str()) {
                return Err(DefinitionError::UnknownTarget {
                    from: step.id.clone(),
                    to: direction.to.clone(),
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, workflow: &Workflow) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(workflow)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const APPROVAL_YAML: &str = r#"
name: invoice-approval
entity_type: invoice
steps:
  - id: check
    order: 1
    stage:
      name: Automatic check
      type: automatic_execution
      execution_script: "entity.attributes.amount < 1000"
    directions:
      - to: approve
        script_condition: "context.approved == 'yes'"
      - to: review
  - id: review
    order: 2
    stage:
      name: Manual review
      type: user_interaction
      actors: [clerk]
    directions:
      - to: approve
        query_condition: "json_extract(e.attributes, '$.amount') < 5000"
  - id: approve
    order: 3
    stage:
      name: Approved
      type: archive
"#;

    #[test]
    fn test_parse_yaml_roundtrip() {
        let workflow = parse_workflow_yaml(APPROVAL_YAML).expect("should parse");
        assert_eq!(workflow.name, "invoice-approval");
        assert_eq!(workflow.entity_type, "invoice");
        assert!(workflow.active);
        assert_eq!(workflow.steps.len(), 3);
        assert_eq!(workflow.steps[0].directions.len(), 2);
        assert_eq!(workflow.steps[2].stage.stage_type, StageType::Archive);

        let yaml = serialize_workflow_yaml(&workflow).unwrap();
        let reparsed = parse_workflow_yaml(&yaml).expect("should reparse");
        assert_eq!(reparsed.id, workflow.id);
        assert_eq!(reparsed.steps.len(), 3);
        assert_eq!(
            reparsed.steps[1].directions[0].query_condition.as_deref(),
            Some("json_extract(e.attributes, '$.amount') < 5000")
        );
    }

    #[test]
    fn test_validation_accepts_zero_steps() {
        let workflow = parse_workflow_yaml("name: empty\nentity_type: invoice\n").unwrap();
        assert!(workflow.steps.is_empty());
    }

    #[test]
    fn test_validation_rejects_duplicate_step_ids() {
        let yaml = r#"
name: dup
entity_type: invoice
steps:
  - id: a
    stage: { name: A, type: user_interaction }
  - id: a
    stage: { name: B, type: user_interaction }
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));
    }

    #[test]
    fn test_validation_rejects_unknown_target() {
        let yaml = r#"
name: dangling
entity_type: invoice
steps:
  - id: a
    stage: { name: A, type: user_interaction }
    directions:
      - to: nowhere
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::UnknownTarget { ref from, ref to } if from == "a" && to == "nowhere"
        ));
    }

    #[test]
    fn test_validation_rejects_empty_entity_type() {
        let err = parse_workflow_yaml("name: x\nentity_type: ''\n").unwrap_err();
        assert!(err.to_string().contains("entity_type"));
    }

    #[test]
    fn test_parse_rejects_unknown_stage_type() {
        let yaml = r#"
name: bad
entity_type: invoice
steps:
  - id: a
    stage: { name: A, type: teleport }
"#;
        assert!(matches!(
            parse_workflow_yaml(yaml),
            Err(DefinitionError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_and_load_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows/approval.yaml");

        let workflow = parse_workflow_yaml(APPROVAL_YAML).unwrap();
        save_workflow_file(&path, &workflow).expect("should save");

        let loaded = load_workflow_file(&path).expect("should load");
        assert_eq!(loaded.name, "invoice-approval");
        assert_eq!(loaded.steps.len(), 3);
    }
}
