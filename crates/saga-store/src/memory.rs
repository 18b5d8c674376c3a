use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    ConnectionStatus, Event, EventId, EventStatus, Result, Saga, SagaConnection, SagaId,
    SagaStatus, StoreError, store::SagaStore,
};

#[derive(Default)]
struct Tables {
    sagas: HashMap<SagaId, Saga>,
    events: HashMap<EventId, Event>,
    connections: Vec<SagaConnection>,
}

/// In-memory saga store implementation for testing.
///
/// Provides the same interface as the PostgreSQL implementation. It can be
/// switched into an unavailable mode to exercise infrastructure failures.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the total number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.tables.read().await.sagas.len()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }

    /// Returns every saga belonging to the tree rooted at `root`.
    pub async fn sagas_in_tree(&self, root: SagaId) -> Vec<Saga> {
        let tables = self.tables.read().await;
        let mut sagas: Vec<_> = tables
            .sagas
            .values()
            .filter(|s| s.root_saga_uuid == root)
            .cloned()
            .collect();
        sagas.sort_by_key(|s| s.created_at);
        sagas
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create_saga(&self, saga: &Saga) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if tables.sagas.contains_key(&saga.saga_uuid) {
            return Err(StoreError::Duplicate(format!("saga {}", saga.saga_uuid)));
        }
        let mut saga = saga.clone();
        saga.event_uuids.clear();
        tables.sagas.insert(saga.saga_uuid, saga);
        Ok(())
    }

    async fn get_saga(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        self.check_available()?;
        Ok(self.tables.read().await.sagas.get(&saga_id).cloned())
    }

    async fn update_saga_status(&self, saga_id: SagaId, status: SagaStatus) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let saga = tables
            .sagas
            .get_mut(&saga_id)
            .ok_or(StoreError::SagaNotFound(saga_id))?;
        saga.saga_status = status;
        saga.updated_at = Utc::now();
        Ok(())
    }

    async fn create_event(&self, event: &Event) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if tables.events.contains_key(&event.event_uuid) {
            return Err(StoreError::Duplicate(format!("event {}", event.event_uuid)));
        }
        let saga = tables
            .sagas
            .get_mut(&event.saga_uuid)
            .ok_or(StoreError::SagaNotFound(event.saga_uuid))?;
        saga.event_uuids.push(event.event_uuid);
        tables.events.insert(event.event_uuid, event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>> {
        self.check_available()?;
        Ok(self.tables.read().await.events.get(&event_id).cloned())
    }

    async fn update_event(&self, event: &Event, expected: EventStatus) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let stored = tables
            .events
            .get_mut(&event.event_uuid)
            .ok_or(StoreError::EventNotFound(event.event_uuid))?;
        if stored.event_status != expected {
            return Err(StoreError::StaleEvent {
                event_id: event.event_uuid,
                expected,
                found: stored.event_status,
            });
        }
        stored.event_status = event.event_status;
        stored.event_result = event.event_result.clone();
        stored.event_rollback_uuid = event.event_rollback_uuid;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn get_saga_events(&self, saga_id: SagaId) -> Result<Vec<Event>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let Some(saga) = tables.sagas.get(&saga_id) else {
            return Ok(Vec::new());
        };
        Ok(saga
            .event_uuids
            .iter()
            .filter_map(|id| tables.events.get(id).cloned())
            .collect())
    }

    async fn create_saga_connection(
        &self,
        parent: SagaId,
        child: SagaId,
        status: ConnectionStatus,
    ) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        for id in [parent, child] {
            if !tables.sagas.contains_key(&id) {
                return Err(StoreError::SagaNotFound(id));
            }
        }
        if tables
            .connections
            .iter()
            .any(|c| c.current_saga_uuid == parent && c.next_saga_uuid == child)
        {
            return Err(StoreError::Duplicate(format!("connection {parent} -> {child}")));
        }
        tables.connections.push(SagaConnection {
            current_saga_uuid: parent,
            next_saga_uuid: child,
            connection_status: status,
        });
        Ok(())
    }

    async fn update_saga_connection(
        &self,
        parent: SagaId,
        child: SagaId,
        status: ConnectionStatus,
    ) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let connection = tables
            .connections
            .iter_mut()
            .find(|c| c.current_saga_uuid == parent && c.next_saga_uuid == child)
            .ok_or(StoreError::ConnectionNotFound { parent, child })?;
        connection.connection_status = status;
        Ok(())
    }

    async fn get_connections_by_parent(&self, parent: SagaId) -> Result<Vec<SagaConnection>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .connections
            .iter()
            .filter(|c| c.current_saga_uuid == parent)
            .copied()
            .collect())
    }

    async fn get_connections_by_child(&self, child: SagaId) -> Result<Vec<SagaConnection>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .connections
            .iter()
            .filter(|c| c.next_saga_uuid == child)
            .copied()
            .collect())
    }
}
