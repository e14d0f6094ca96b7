//! Workflow engine and repository trait definitions for Stagegate.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the engine that drives workflow instances. It
//! depends only on `stagegate-types` -- never on `stagegate-infra` or any
//! database/IO crate.

pub mod repository;
pub mod workflow;
