use thiserror::Error;

use crate::domain::{catalog::entities::EntityKind, outbox::entities::OutboxEntryId};

pub mod services;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Service is currently unavailable: {0}")]
    ServiceUnavailable(String),

    /// The entity document and its outbox entry could not be committed together.
    /// Nothing was persisted, so the whole call can be retried.
    #[error("Storage error: {msg}")]
    StorageError { msg: String },

    /// The broker did not confirm delivery (rejection, disconnect or timeout).
    #[error("Transient publish error: {msg}")]
    TransientPublishError { msg: String },

    #[error("Outbox entry {id} failed permanently after {attempts} attempts")]
    PermanentPublishFailure { id: OutboxEntryId, attempts: u32 },

    #[error("Serialization error: {msg}")]
    SerializationError { msg: String },

    #[error("Invalid {kind}: {msg}")]
    InvalidEntity { kind: EntityKind, msg: String },

    #[error("{kind} with id {id} not found")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("Outbox entry {id} not found")]
    OutboxEntryNotFound { id: OutboxEntryId },
}

impl CoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        CoreError::StorageError { msg: msg.into() }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::TransientPublishError { msg: msg.into() }
    }

    pub fn invalid(kind: EntityKind, msg: impl Into<String>) -> Self {
        CoreError::InvalidEntity {
            kind,
            msg: msg.into(),
        }
    }
}
