//! Saga state machine: pure decisions over a saga's event list.

use common::{EventId, SagaId};
use saga_store::{Event, EventStatus, SagaStatus};

use crate::catalog::{Compensation, EventType, SagaCatalog, SagaDefinition};
use crate::error::{Result, SagaError};

/// The outstanding event of a saga, if any. At most one exists.
pub fn active_event(events: &[Event]) -> Option<&Event> {
    events.iter().find(|e| e.event_status.is_active())
}

/// The next forward event type to instantiate, in catalog order.
///
/// Returns `None` when every declared event has been instantiated.
pub fn next_forward_event(def: &SagaDefinition, events: &[Event]) -> Option<EventType> {
    let started = events.iter().filter(|e| !e.event_is_roll_back).count();
    def.events.get(started).copied()
}

/// Status of a saga that has not entered rollback, derived from its events.
pub fn derive_forward_status(def: &SagaDefinition, events: &[Event]) -> SagaStatus {
    let forward: Vec<_> = events.iter().filter(|e| !e.event_is_roll_back).collect();

    if forward.iter().any(|e| e.event_status == EventStatus::Error) {
        return SagaStatus::Error;
    }
    if forward.iter().all(|e| e.event_status == EventStatus::Created) {
        return SagaStatus::Created;
    }
    if forward.len() == def.events.len()
        && forward.iter().all(|e| e.event_status == EventStatus::Completed)
    {
        return SagaStatus::Completed;
    }
    SagaStatus::InProcess
}

/// Fails unless the saga's events derive `expected`.
pub fn check_forward_status(
    saga_id: SagaId,
    def: &SagaDefinition,
    events: &[Event],
    expected: SagaStatus,
) -> Result<()> {
    let derived = derive_forward_status(def, events);
    if derived == expected {
        Ok(())
    } else {
        Err(SagaError::StatusMismatch {
            saga_id,
            expected,
            derived,
        })
    }
}

/// Next step of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationStep {
    /// Undo `original` by dispatching `revert`.
    Dispatch { original: EventId, revert: EventType },
    /// `original` has side effects that nothing can undo.
    Gap { original: EventId, event_type: EventType },
    /// Every completed event has been compensated or needs none.
    Done,
}

/// Picks the most recently completed forward event that still needs undoing.
pub fn next_compensation(events: &[Event], catalog: &SagaCatalog) -> Result<CompensationStep> {
    let pending = events.iter().rev().filter(|e| {
        !e.event_is_roll_back
            && e.event_status == EventStatus::Completed
            && e.event_rollback_uuid.is_none()
    });

    for event in pending {
        let def = catalog.event_by_name(&event.event_name)?;
        match def.compensation {
            Compensation::NotRequired => continue,
            Compensation::Event(revert) => {
                return Ok(CompensationStep::Dispatch {
                    original: event.event_uuid,
                    revert,
                });
            }
            Compensation::Undefined => {
                return Ok(CompensationStep::Gap {
                    original: event.event_uuid,
                    event_type: def.event_type,
                });
            }
        }
    }
    Ok(CompensationStep::Done)
}

/// Terminal status of a saga whose rollback has run to the end.
pub fn rollback_outcome(events: &[Event]) -> SagaStatus {
    let compensations: Vec<_> = events.iter().filter(|e| e.event_is_roll_back).collect();

    if compensations
        .iter()
        .any(|e| e.event_status == EventStatus::FallBackError)
    {
        SagaStatus::FallBackError
    } else if !compensations.is_empty() {
        SagaStatus::FallBackSuccess
    } else if events.iter().any(|e| e.event_status == EventStatus::Error) {
        SagaStatus::Error
    } else {
        SagaStatus::FallBackSuccess
    }
}
