use async_trait::async_trait;

use crate::{
    ConnectionStatus, Event, EventId, EventStatus, Result, Saga, SagaConnection, SagaId, SagaStatus,
};

/// Persistence gateway for saga orchestration state.
///
/// Lookups return `Ok(None)` when the row does not exist; updates of a
/// missing row fail with the matching `*NotFound` error. Everything else is
/// a storage failure. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new saga row. Its `event_uuids` are ignored; events are
    /// attached through [`SagaStore::create_event`].
    async fn create_saga(&self, saga: &Saga) -> Result<()>;

    /// Loads a saga together with the ids of its events in creation order.
    async fn get_saga(&self, saga_id: SagaId) -> Result<Option<Saga>>;

    /// Sets the status of an existing saga.
    async fn update_saga_status(&self, saga_id: SagaId, status: SagaStatus) -> Result<()>;

    /// Inserts a new event and appends it to its saga's event list.
    async fn create_event(&self, event: &Event) -> Result<()>;

    /// Loads a single event.
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>>;

    /// Overwrites the mutable columns of an event whose stored status is
    /// still `expected`. Fails with [`StoreError::StaleEvent`] if another
    /// writer changed the status first.
    ///
    /// [`StoreError::StaleEvent`]: crate::StoreError::StaleEvent
    async fn update_event(&self, event: &Event, expected: EventStatus) -> Result<()>;

    /// Loads every event owned by a saga in creation order.
    async fn get_saga_events(&self, saga_id: SagaId) -> Result<Vec<Event>>;

    /// Records a new parent → child edge.
    async fn create_saga_connection(
        &self,
        parent: SagaId,
        child: SagaId,
        status: ConnectionStatus,
    ) -> Result<()>;

    /// Sets the status of an existing parent → child edge.
    async fn update_saga_connection(
        &self,
        parent: SagaId,
        child: SagaId,
        status: ConnectionStatus,
    ) -> Result<()>;

    /// Lists the edges leaving a parent saga.
    async fn get_connections_by_parent(&self, parent: SagaId) -> Result<Vec<SagaConnection>>;

    /// Lists the edges entering a child saga.
    async fn get_connections_by_child(&self, child: SagaId) -> Result<Vec<SagaConnection>>;
}
