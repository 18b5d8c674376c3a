//! Orchestrator error types.

use broker::BrokerError;
use common::{EventId, SagaId};
use saga_store::{EventStatus, SagaStatus, StoreError};
use thiserror::Error;

/// Problems found while validating the saga catalog at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Saga type '{0}' declares no events")]
    EmptySaga(String),

    #[error("Saga type '{referenced_by}' references undeclared saga type '{missing}'")]
    UnknownSagaType {
        referenced_by: String,
        missing: String,
    },

    #[error("Saga type '{saga}' uses undeclared event type '{event}'")]
    UnknownEventType { saga: String, event: String },

    #[error("Edge {parent} -> {child} is not declared on both ends")]
    EdgeMismatch { parent: String, child: String },

    #[error("Operation '{0}' has no root saga types")]
    NoRoots(String),

    #[error("Saga dependency cycle through '{0}'")]
    Cycle(String),
}

/// Errors that can occur during saga orchestration.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The operation code is not part of the catalog.
    #[error("Invalid operation code: {0}")]
    InvalidOperation(u8),

    /// A field required to run the operation is missing or malformed.
    #[error("Invalid data for '{operation}': field '{field}' is missing or malformed")]
    InvalidOperationsData { operation: String, field: String },

    /// A persisted name does not match any catalog entry.
    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    /// The event's server is not in the dispatch allow-list.
    #[error("Invalid server: {0}")]
    InvalidServer(String),

    /// The server does not accept this operation.
    #[error("Server '{server}' does not accept operation '{operation}'")]
    InvalidServersOperation { server: String, operation: String },

    /// The server's topic is not in the dispatch allow-list.
    #[error("Server '{server}' has no valid topic (got '{topic}')")]
    InvalidServersTopic { server: String, topic: String },

    /// The event is not in a status that accepts this signal.
    #[error("Event {event_id} in status {status} cannot accept success={success}")]
    InvalidEventStatus {
        event_id: EventId,
        status: EventStatus,
        success: bool,
    },

    /// A completed event has no compensating action defined.
    #[error("No compensating event defined for '{event_type}' in saga {saga_id}")]
    NoRevertEvent { saga_id: SagaId, event_type: String },

    /// A semantic check name is not registered.
    #[error("Unknown additional validation function: {0}")]
    UnknownAdditionalValidationFunction(String),

    /// A semantic check is missing the data it needs.
    #[error("Check '{check}' is missing field '{field}'")]
    CheckData { check: String, field: String },

    /// A semantic check rejected the saga data.
    #[error("Check '{check}' failed: {reason}")]
    CheckFailed { check: String, reason: String },

    /// An inbound reply could not be decoded or correlated.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// A saga status about to be stored disagrees with its events.
    #[error("Saga {saga_id} cannot be marked {expected}: its events derive {derived}")]
    StatusMismatch {
        saga_id: SagaId,
        expected: SagaStatus,
        derived: SagaStatus,
    },

    /// No saga exists with the given id.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// No event exists with the given id.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The saga catalog is inconsistent.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Persistence gateway error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Transport gateway error.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A persistence call did not finish in time.
    #[error("Store call timed out")]
    StoreTimeout,

    /// A publish did not finish in time.
    #[error("Publish to '{0}' timed out")]
    PublishTimeout(String),

    /// The operation was persisted but some of its first requests could
    /// not be published. `saga_id` is the operation's id; each saga in
    /// `undispatched` holds a Created event that can be re-dispatched.
    #[error("Saga {saga_id} was created but not dispatched: {source}")]
    Undispatched {
        saga_id: SagaId,
        undispatched: Vec<SagaId>,
        #[source]
        source: Box<SagaError>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if the failed step may succeed when the triggering
    /// message is delivered again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::Store(err) => !err.is_not_found(),
            SagaError::Broker(BrokerError::Serialization(_)) => false,
            SagaError::Broker(_) | SagaError::StoreTimeout | SagaError::PublishTimeout(_) => true,
            _ => false,
        }
    }

    /// Returns true if the caller supplied bad input.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SagaError::InvalidOperation(_)
                | SagaError::InvalidOperationsData { .. }
                | SagaError::UnknownName { .. }
                | SagaError::InvalidReply(_)
        )
    }

    pub(crate) fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        SagaError::UnknownName {
            kind,
            name: name.into(),
        }
    }
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SagaError::StoreTimeout.is_retryable());
        assert!(SagaError::PublishTimeout("users.requests".into()).is_retryable());
        assert!(SagaError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!SagaError::Store(StoreError::SagaNotFound(SagaId::new())).is_retryable());
        // another writer advanced the event; a redelivery sees its new status
        assert!(
            SagaError::Store(StoreError::StaleEvent {
                event_id: EventId::new(),
                expected: EventStatus::InProgress,
                found: EventStatus::Completed,
            })
            .is_retryable()
        );
        assert!(
            SagaError::Broker(BrokerError::Publish {
                topic: "t".into(),
                reason: "r".into()
            })
            .is_retryable()
        );

        assert!(!SagaError::InvalidOperation(99).is_retryable());
        assert!(
            !SagaError::NoRevertEvent {
                saga_id: SagaId::new(),
                event_type: "close_account".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_input_errors() {
        assert!(SagaError::InvalidOperation(0).is_input_error());
        assert!(
            SagaError::InvalidOperationsData {
                operation: "create_user".into(),
                field: "login".into()
            }
            .is_input_error()
        );
        assert!(!SagaError::StoreTimeout.is_input_error());
    }
}
