use thiserror::Error;

/// Errors from repository operations (used by trait definitions in stagegate-core).
///
/// Missing records are not errors: lookups return `Ok(None)` and deletes
/// report whether a row was removed.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("query error: {0}")]
    Query(String),
}
