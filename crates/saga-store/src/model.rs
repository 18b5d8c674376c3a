//! Saga, event and connection rows plus their status codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, SagaId};

macro_rules! status_codes {
    ($name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl $name {
            /// Returns the persisted status code.
            pub fn code(self) -> u8 {
                self as u8
            }

            /// Parses a persisted status code.
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Returns the status name as a string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

/// Lifecycle of a single event.
///
/// ```text
/// Created ──► InProgress ──┬──► Completed
///                          └──► Error
///
/// Created (roll back) ──► FallBackInProcess ──┬──► FallBackCompleted
///                                             └──► FallBackError
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum EventStatus {
    #[default]
    Undefined = 0,
    Created = 10,
    InProgress = 20,
    Completed = 30,
    FallBackInProcess = 40,
    FallBackCompleted = 50,
    FallBackError = 250,
    Error = 255,
}

status_codes!(EventStatus {
    Undefined = 0,
    Created = 10,
    InProgress = 20,
    Completed = 30,
    FallBackInProcess = 40,
    FallBackCompleted = 50,
    FallBackError = 250,
    Error = 255,
});

impl EventStatus {
    /// Returns true if no further reply can change this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Completed
                | EventStatus::FallBackCompleted
                | EventStatus::FallBackError
                | EventStatus::Error
        )
    }

    /// Returns true if the event is waiting to be sent or waiting for a reply.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EventStatus::Created | EventStatus::InProgress | EventStatus::FallBackInProcess
        )
    }
}

/// Lifecycle of a saga, derived from the status of its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum SagaStatus {
    #[default]
    Undefined = 0,
    Created = 10,
    InProcess = 20,
    Completed = 30,
    FallBackInProcess = 40,
    FallBackSuccess = 50,
    FallBackError = 250,
    Error = 255,
}

status_codes!(SagaStatus {
    Undefined = 0,
    Created = 10,
    InProcess = 20,
    Completed = 30,
    FallBackInProcess = 40,
    FallBackSuccess = 50,
    FallBackError = 250,
    Error = 255,
});

impl SagaStatus {
    /// Returns true if the saga will not change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed
                | SagaStatus::FallBackSuccess
                | SagaStatus::FallBackError
                | SagaStatus::Error
        )
    }

    /// Returns true if the saga has left the forward path.
    pub fn is_rolling_back_or_failed(&self) -> bool {
        matches!(
            self,
            SagaStatus::FallBackInProcess
                | SagaStatus::FallBackSuccess
                | SagaStatus::FallBackError
                | SagaStatus::Error
        )
    }
}

/// Resolution of a parent → child dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ConnectionStatus {
    #[default]
    Unknown = 0,
    Waiting = 10,
    Success = 20,
    FallBack = 30,
    Failed = 255,
}

status_codes!(ConnectionStatus {
    Unknown = 0,
    Waiting = 10,
    Success = 20,
    FallBack = 30,
    Failed = 255,
});

impl ConnectionStatus {
    /// Returns true once the child has finished rolling back, cleanly or not.
    pub fn is_rollback_resolved(&self) -> bool {
        matches!(self, ConnectionStatus::FallBack | ConnectionStatus::Failed)
    }
}

/// A saga instance row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    pub saga_uuid: SagaId,
    /// Root of the operation tree this saga belongs to.
    pub root_saga_uuid: SagaId,
    /// Operation that created the tree.
    pub operation: String,
    pub saga_type: String,
    pub saga_name: String,
    pub saga_status: SagaStatus,
    /// Operation input plus results inherited from ancestor sagas.
    pub saga_data: serde_json::Value,
    /// Owned events in creation order. Maintained by the store.
    pub event_uuids: Vec<EventId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Saga {
    /// Creates a new root saga in status Created.
    pub fn root(
        operation: impl Into<String>,
        saga_type: impl Into<String>,
        saga_data: serde_json::Value,
    ) -> Self {
        let saga_uuid = SagaId::new();
        Self::with_root(saga_uuid, saga_uuid, operation, saga_type, saga_data)
    }

    /// Creates a child saga belonging to the tree rooted at `root_saga_uuid`.
    pub fn child(
        root_saga_uuid: SagaId,
        operation: impl Into<String>,
        saga_type: impl Into<String>,
        saga_data: serde_json::Value,
    ) -> Self {
        Self::with_root(SagaId::new(), root_saga_uuid, operation, saga_type, saga_data)
    }

    fn with_root(
        saga_uuid: SagaId,
        root_saga_uuid: SagaId,
        operation: impl Into<String>,
        saga_type: impl Into<String>,
        saga_data: serde_json::Value,
    ) -> Self {
        let saga_type = saga_type.into();
        let now = Utc::now();
        Self {
            saga_uuid,
            root_saga_uuid,
            operation: operation.into(),
            saga_name: saga_type.clone(),
            saga_type,
            saga_status: SagaStatus::Created,
            saga_data,
            event_uuids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if this saga is the root of its tree.
    pub fn is_root(&self) -> bool {
        self.saga_uuid == self.root_saga_uuid
    }
}

/// An event row: one request/reply exchange with a downstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_uuid: EventId,
    pub saga_uuid: SagaId,
    pub event_name: String,
    pub event_status: EventStatus,
    /// Whether this event undoes a previously completed one.
    pub event_is_roll_back: bool,
    /// Opaque result body returned by the remote service.
    pub event_result: Option<serde_json::Value>,
    /// On a compensated event, the id of its compensating event.
    pub event_rollback_uuid: Option<EventId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Creates a forward event in status Created.
    pub fn new(saga_uuid: SagaId, event_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            event_uuid: EventId::new(),
            saga_uuid,
            event_name: event_name.into(),
            event_status: EventStatus::Created,
            event_is_roll_back: false,
            event_result: None,
            event_rollback_uuid: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a compensating event in status Created.
    pub fn compensating(saga_uuid: SagaId, event_name: impl Into<String>) -> Self {
        Self {
            event_is_roll_back: true,
            ..Self::new(saga_uuid, event_name)
        }
    }
}

/// Directed dependency edge between a parent saga and a child saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaConnection {
    pub current_saga_uuid: SagaId,
    pub next_saga_uuid: SagaId,
    pub connection_status: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_status_codes() {
        assert_eq!(EventStatus::Undefined.code(), 0);
        assert_eq!(EventStatus::Created.code(), 10);
        assert_eq!(EventStatus::InProgress.code(), 20);
        assert_eq!(EventStatus::Completed.code(), 30);
        assert_eq!(EventStatus::FallBackInProcess.code(), 40);
        assert_eq!(EventStatus::FallBackCompleted.code(), 50);
        assert_eq!(EventStatus::FallBackError.code(), 250);
        assert_eq!(EventStatus::Error.code(), 255);
        assert_eq!(EventStatus::from_code(40), Some(EventStatus::FallBackInProcess));
        assert_eq!(EventStatus::from_code(41), None);
    }

    #[test]
    fn test_saga_and_connection_codes() {
        assert_eq!(SagaStatus::from_code(50), Some(SagaStatus::FallBackSuccess));
        assert_eq!(SagaStatus::Error.code(), 255);
        assert_eq!(ConnectionStatus::from_code(30), Some(ConnectionStatus::FallBack));
        assert_eq!(ConnectionStatus::Failed.code(), 255);
    }

    #[test]
    fn test_event_terminal_and_active() {
        assert!(EventStatus::Completed.is_terminal());
        assert!(EventStatus::FallBackCompleted.is_terminal());
        assert!(EventStatus::FallBackError.is_terminal());
        assert!(EventStatus::Error.is_terminal());
        assert!(!EventStatus::InProgress.is_terminal());

        assert!(EventStatus::Created.is_active());
        assert!(EventStatus::InProgress.is_active());
        assert!(EventStatus::FallBackInProcess.is_active());
        assert!(!EventStatus::Completed.is_active());
        assert!(!EventStatus::Undefined.is_active());
    }

    #[test]
    fn test_display() {
        assert_eq!(EventStatus::FallBackInProcess.to_string(), "FallBackInProcess");
        assert_eq!(SagaStatus::InProcess.to_string(), "InProcess");
        assert_eq!(ConnectionStatus::Waiting.to_string(), "Waiting");
    }

    #[test]
    fn test_root_and_child_sagas() {
        let root = Saga::root("add_account", "check_user", serde_json::json!({}));
        assert!(root.is_root());
        assert_eq!(root.saga_status, SagaStatus::Created);
        assert_eq!(root.saga_name, "check_user");

        let child = Saga::child(root.saga_uuid, "add_account", "reserve_account", serde_json::json!({}));
        assert!(!child.is_root());
        assert_eq!(child.root_saga_uuid, root.saga_uuid);
    }

    #[test]
    fn test_compensating_event() {
        let saga_id = SagaId::new();
        let event = Event::compensating(saga_id, "unreserve_account");
        assert!(event.event_is_roll_back);
        assert_eq!(event.event_status, EventStatus::Created);
        assert_eq!(event.saga_uuid, saga_id);
    }
}
