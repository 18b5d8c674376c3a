//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration
//! ```

use std::sync::Arc;

use saga_store::{
    ConnectionStatus, Event, EventId, EventStatus, PostgresSagaStore, Saga, SagaId, SagaStatus,
    SagaStore, StoreError,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_connections, saga_events, sagas")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

#[tokio::test]
#[serial]
async fn create_and_load_saga_with_events() {
    let store = get_test_store().await;
    let saga = Saga::root(
        "add_account_cache",
        "add_account_cache",
        serde_json::json!({"user_id": "u-1", "amount": 100}),
    );
    store.create_saga(&saga).await.unwrap();

    let first = Event::new(saga.saga_uuid, "get_user_data");
    let second = Event::new(saga.saga_uuid, "get_account_data");
    store.create_event(&first).await.unwrap();
    store.create_event(&second).await.unwrap();

    let loaded = store.get_saga(saga.saga_uuid).await.unwrap().unwrap();
    assert_eq!(loaded.saga_type, "add_account_cache");
    assert_eq!(loaded.saga_status, SagaStatus::Created);
    assert_eq!(loaded.saga_data["amount"], 100);
    assert_eq!(loaded.event_uuids, vec![first.event_uuid, second.event_uuid]);

    let events = store.get_saga_events(saga.saga_uuid).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_name, "get_user_data");
    assert_eq!(events[0].event_status, EventStatus::Created);
}

#[tokio::test]
#[serial]
async fn missing_rows_are_distinct_from_errors() {
    let store = get_test_store().await;

    assert!(store.get_saga(SagaId::new()).await.unwrap().is_none());
    assert!(store.get_event(EventId::new()).await.unwrap().is_none());

    let result = store
        .update_saga_status(SagaId::new(), SagaStatus::Completed)
        .await;
    assert!(matches!(result, Err(StoreError::SagaNotFound(_))));

    let orphan = Event::new(SagaId::new(), "create_user");
    let result = store.create_event(&orphan).await;
    assert!(matches!(result, Err(StoreError::SagaNotFound(_))));
}

#[tokio::test]
#[serial]
async fn duplicate_saga_is_rejected() {
    let store = get_test_store().await;
    let saga = Saga::root("create_user", "create_user", serde_json::json!({}));
    store.create_saga(&saga).await.unwrap();

    let result = store.create_saga(&saga).await;
    assert!(matches!(result, Err(StoreError::Duplicate(_))));
}

#[tokio::test]
#[serial]
async fn update_event_and_saga_status() {
    let store = get_test_store().await;
    let saga = Saga::root("create_user", "create_user", serde_json::json!({}));
    store.create_saga(&saga).await.unwrap();

    let mut event = Event::new(saga.saga_uuid, "create_user");
    store.create_event(&event).await.unwrap();

    let compensation = EventId::new();
    event.event_status = EventStatus::Completed;
    event.event_result = Some(serde_json::json!({"user_id": "u-9"}));
    event.event_rollback_uuid = Some(compensation);
    store.update_event(&event, EventStatus::Created).await.unwrap();
    store
        .update_saga_status(saga.saga_uuid, SagaStatus::Completed)
        .await
        .unwrap();

    let loaded = store.get_event(event.event_uuid).await.unwrap().unwrap();
    assert_eq!(loaded.event_status, EventStatus::Completed);
    assert_eq!(loaded.event_result.unwrap()["user_id"], "u-9");
    assert_eq!(loaded.event_rollback_uuid, Some(compensation));

    let saga = store.get_saga(saga.saga_uuid).await.unwrap().unwrap();
    assert_eq!(saga.saga_status, SagaStatus::Completed);
}

#[tokio::test]
#[serial]
async fn update_event_is_conditional_on_status() {
    let store = get_test_store().await;
    let saga = Saga::root("get_user_data", "get_user_data", serde_json::json!({}));
    store.create_saga(&saga).await.unwrap();
    let mut event = Event::new(saga.saga_uuid, "get_user_data");
    store.create_event(&event).await.unwrap();

    event.event_status = EventStatus::InProgress;
    store.update_event(&event, EventStatus::Created).await.unwrap();

    event.event_status = EventStatus::Completed;
    let result = store.update_event(&event, EventStatus::Created).await;
    assert!(matches!(
        result,
        Err(StoreError::StaleEvent {
            expected: EventStatus::Created,
            found: EventStatus::InProgress,
            ..
        })
    ));

    store.update_event(&event, EventStatus::InProgress).await.unwrap();
    let loaded = store.get_event(event.event_uuid).await.unwrap().unwrap();
    assert_eq!(loaded.event_status, EventStatus::Completed);
}

#[tokio::test]
#[serial]
async fn connections_by_parent_and_child() {
    let store = get_test_store().await;
    let parent = Saga::root("add_account", "create_account", serde_json::json!({}));
    let first = Saga::child(
        parent.saga_uuid,
        "add_account",
        "open_account_and_add_to_user",
        serde_json::json!({}),
    );
    let second = Saga::child(
        parent.saga_uuid,
        "add_account",
        "notify_account_created",
        serde_json::json!({}),
    );
    for saga in [&parent, &first, &second] {
        store.create_saga(saga).await.unwrap();
    }

    store
        .create_saga_connection(parent.saga_uuid, first.saga_uuid, ConnectionStatus::Waiting)
        .await
        .unwrap();
    store
        .create_saga_connection(parent.saga_uuid, second.saga_uuid, ConnectionStatus::Waiting)
        .await
        .unwrap();
    store
        .update_saga_connection(parent.saga_uuid, second.saga_uuid, ConnectionStatus::FallBack)
        .await
        .unwrap();

    let children = store
        .get_connections_by_parent(parent.saga_uuid)
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].next_saga_uuid, first.saga_uuid);
    assert_eq!(children[1].connection_status, ConnectionStatus::FallBack);

    let parents = store
        .get_connections_by_child(first.saga_uuid)
        .await
        .unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].current_saga_uuid, parent.saga_uuid);

    let result = store
        .update_saga_connection(first.saga_uuid, parent.saga_uuid, ConnectionStatus::Failed)
        .await;
    assert!(matches!(result, Err(StoreError::ConnectionNotFound { .. })));
}
