//! Workflow engine core: definitions, conditions, stage execution and the
//! instance state machine.
//!
//! - `definition` -- YAML parsing, validation, filesystem load/save
//! - `graph` -- read-only step index over a definition
//! - `context` -- per-instance string key/value execution context
//! - `expression` -- script evaluator port and the JEXL implementation
//! - `condition` -- direction condition evaluation (script, query, none)
//! - `stage` -- automatic stage execution and result interpretation
//! - `outcome` -- done/failed recording kept in sync with the entity
//! - `lock` -- per-instance lock table
//! - `clock` -- time source
//! - `engine` -- the `WorkflowEngine` orchestrating all of the above

pub mod clock;
pub mod condition;
pub mod context;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod graph;
pub mod lock;
pub mod outcome;
pub mod stage;

#[cfg(test)]
pub(crate) mod testing;
