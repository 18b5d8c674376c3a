//! Event state machine.
//!
//! ```text
//! Created ──► InProgress ──┬──► Completed
//!                          └──► Error
//!
//! Created (roll back) ──► FallBackInProcess ──┬──► FallBackCompleted
//!                                             └──► FallBackError
//! ```
//!
//! Terminal statuses absorb every further signal, which is what makes
//! redelivered replies harmless.

use saga_store::{Event, EventStatus};

use crate::error::{Result, SagaError};

/// What the orchestrator must do after persisting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Publish the event's request.
    Dispatch,
    /// The event completed; advance its saga.
    NotifySagaCompletion,
    /// The event failed; roll its saga back.
    NotifySagaFailure,
    /// A compensating event completed; continue the rollback.
    NotifySagaRollbackDone,
    /// A compensating event failed; the rollback cannot finish cleanly.
    NotifySagaRollbackFailed,
    /// Nothing to do (the event was already terminal).
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: EventStatus,
    pub action: EventAction,
}

impl Transition {
    fn to(status: EventStatus, action: EventAction) -> Self {
        Self { status, action }
    }
}

/// Computes the next status of `event` for a success or failure signal.
///
/// Pure: the caller persists the returned status before acting on it.
pub fn advance(event: &Event, success: bool) -> Result<Transition> {
    use EventAction as A;
    use EventStatus as S;

    let current = event.event_status;
    let transition = match (current, success) {
        (S::Created, true) if event.event_is_roll_back => {
            Transition::to(S::FallBackInProcess, A::Dispatch)
        }
        (S::Created, true) => Transition::to(S::InProgress, A::Dispatch),
        (S::InProgress, true) => Transition::to(S::Completed, A::NotifySagaCompletion),
        (S::InProgress, false) => Transition::to(S::Error, A::NotifySagaFailure),
        (S::FallBackInProcess, true) => {
            Transition::to(S::FallBackCompleted, A::NotifySagaRollbackDone)
        }
        (S::FallBackInProcess, false) => {
            Transition::to(S::FallBackError, A::NotifySagaRollbackFailed)
        }
        (status, _) if status.is_terminal() => Transition::to(status, A::None),
        (S::Created, false) | (S::Undefined, _) => {
            return Err(SagaError::InvalidEventStatus {
                event_id: event.event_uuid,
                status: current,
                success,
            });
        }
        // Every non-terminal status is matched above.
        (status, _) => Transition::to(status, A::None),
    };
    Ok(transition)
}
