//! Business entity repository trait definition.
//!
//! The engine reads and writes entity status through this port and asks it
//! to evaluate query-style direction conditions.

use stagegate_types::entity::WorkflowEntity;
use stagegate_types::error::RepositoryError;

/// Repository trait for the business entities bound to workflow instances.
pub trait EntityRepository: Send + Sync {
    /// Get an entity by type and string identity.
    fn get_entity(
        &self,
        entity_type: &str,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowEntity>, RepositoryError>> + Send;

    /// Upsert an entity outside of any workflow changeset.
    fn save_entity(
        &self,
        entity: &WorkflowEntity,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Check whether the identified entity matches an extra filter clause.
    ///
    /// This is an existence check restricted to exactly one entity: the
    /// result is `true` iff the entity exists and satisfies `filter`.
    fn entity_matches(
        &self,
        entity_type: &str,
        id: &str,
        filter: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
