use thiserror::Error;

use crate::{EventId, EventStatus, SagaId};

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No saga row exists with the given id.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// No event row exists with the given id.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// No connection exists between the two sagas.
    #[error("Saga connection not found: {parent} -> {child}")]
    ConnectionNotFound { parent: SagaId, child: SagaId },

    /// The event's status changed since it was read.
    #[error("Event {event_id} is {found}, expected {expected}")]
    StaleEvent {
        event_id: EventId,
        expected: EventStatus,
        found: EventStatus,
    },

    /// A row with the same identity already exists.
    #[error("Duplicate row: {0}")]
    Duplicate(String),

    /// A status column held a code that is not part of the status enum.
    #[error("Invalid {column} code: {code}")]
    InvalidStatus { column: &'static str, code: i16 },

    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if this error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::SagaNotFound(_)
                | StoreError::EventNotFound(_)
                | StoreError::ConnectionNotFound { .. }
        )
    }
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
