use crate::domain::{
    catalog::entities::{Entity, EntityId, SavedEntity},
    common::CoreError,
};

/// Write path shared by the nine retail services.
///
/// Saving an entity only ever reports validation and storage failures. Broker
/// delivery happens later, from the outbox, and never fails a save that
/// already committed.
pub trait CatalogService: Send + Sync {
    /// Validates the entity, then persists it together with a pending outbox
    /// entry addressed to the entity kind's topic.
    ///
    /// # Errors
    ///
    /// - `CoreError::InvalidEntity` if validation fails; nothing is written
    /// - `CoreError::StorageError` if the atomic write cannot commit; nothing is
    ///   written and the call may be retried as a whole
    fn save_entity<E: Entity>(
        &self,
        entity: E,
    ) -> impl Future<Output = Result<SavedEntity, CoreError>> + Send;

    /// # Errors
    ///
    /// `CoreError::EntityNotFound` when no document has this id.
    fn get_entity<E: Entity>(
        &self,
        id: &EntityId,
    ) -> impl Future<Output = Result<E, CoreError>> + Send;

    /// Every stored entity of this kind, ordered by id.
    fn list_entities<E: Entity>(&self) -> impl Future<Output = Result<Vec<E>, CoreError>> + Send;

    /// Validates and replaces an existing entity, enqueueing its new state on the
    /// kind's topic in the same atomic write.
    ///
    /// # Errors
    ///
    /// - `CoreError::InvalidEntity` if validation fails or the entity has no id
    /// - `CoreError::EntityNotFound` when no document has the entity's id
    /// - `CoreError::StorageError` if the atomic write cannot commit
    fn update_entity<E: Entity>(
        &self,
        entity: E,
    ) -> impl Future<Output = Result<SavedEntity, CoreError>> + Send;

    /// Removes the document. No event is published for deletions.
    ///
    /// # Errors
    ///
    /// `CoreError::EntityNotFound` when no document has this id.
    fn delete_entity<E: Entity>(
        &self,
        id: &EntityId,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}
