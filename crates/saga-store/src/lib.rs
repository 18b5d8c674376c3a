//! Persistence gateway for the saga orchestrator.
//!
//! Stores saga rows, the events each saga owns, and the connections
//! between parent and child sagas. The store is the system of record:
//! everything the orchestrator holds in memory is rebuilt from it.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{EventId, SagaId};
pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use model::{ConnectionStatus, Event, EventStatus, Saga, SagaConnection, SagaStatus};
pub use postgres::PostgresSagaStore;
pub use store::SagaStore;
