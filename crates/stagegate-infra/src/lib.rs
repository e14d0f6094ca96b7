//! Infrastructure layer for Stagegate.
//!
//! Contains the SQLite implementation of the repository traits defined in
//! `stagegate-core`, the `config.toml` loader and data directory resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
