//! Shared domain types for Stagegate.
//!
//! This crate contains the workflow definition model, the runtime records
//! (instances and tasks), the business entity capability the engine drives,
//! global configuration and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod entity;
pub mod error;
pub mod workflow;
