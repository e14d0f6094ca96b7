//! Read-only step graph of a workflow definition.
//!
//! Steps and directions refer to each other by step ID only. The graph
//! indexes the steps once per `iterate` call so lookups never go through
//! live back-references.

use std::collections::HashMap;

use stagegate_types::workflow::{Step, StepDirection, Workflow};

/// Arena of steps indexed by ID.
#[derive(Debug, Clone)]
pub struct DefinitionGraph {
    workflow: Workflow,
    index: HashMap<String, usize>,
}

impl DefinitionGraph {
    pub fn new(workflow: Workflow) -> Self {
        let index = workflow
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.clone(), i))
            .collect();
        Self { workflow, index }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.workflow.steps[i])
    }

    /// The step with the lowest `order`; declaration order breaks ties.
    pub fn first_step(&self) -> Option<&Step> {
        self.workflow
            .steps
            .iter()
            .enumerate()
            .min_by_key(|(i, step)| (step.order, *i))
            .map(|(_, step)| step)
    }

    /// Outgoing directions of a step in declaration order.
    pub fn directions(&self, step_id: &str) -> &[StepDirection] {
        self.step(step_id)
            .map(|step| step.directions.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.workflow.steps.is_empty()
    }
}
