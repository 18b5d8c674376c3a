//! Integration tests for the API gateway.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use broker::{InMemoryBroker, RequestEnvelope, topics};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::OrchestratorConfig;
use saga_store::InMemorySagaStore;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    setup_with_state().0
}

fn setup_with_state() -> (axum::Router, InMemorySagaStore, InMemoryBroker) {
    let store = InMemorySagaStore::new();
    let broker = InMemoryBroker::recording();
    let state = api::create_state(store.clone(), broker.clone(), OrchestratorConfig::default())
        .unwrap();
    let app = api::create_app(state, get_metrics_handle());
    (app, store, broker)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
    )
    .await
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn start_add_account(app: &axum::Router) -> String {
    let (status, json) = post_json(
        app,
        "/operations",
        json!({"operation_code": 2, "fields": {"user_id": "u-1", "currency": "EUR"}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    json["saga_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_list_operations() {
    let app = setup();

    let (status, json) = get(&app, "/operations").await;

    assert_eq!(status, StatusCode::OK);
    let operations = json.as_array().unwrap();
    assert_eq!(operations.len(), 7);

    let add_account = operations
        .iter()
        .find(|op| op["name"] == "add_account")
        .unwrap();
    assert_eq!(add_account["code"], 2);
    assert_eq!(add_account["required_fields"], json!(["user_id", "currency"]));
    assert_eq!(add_account["saga_types"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_start_operation_and_poll_saga() {
    let (app, _, broker) = setup_with_state();

    let saga_id = start_add_account(&app).await;

    let (status, view) = get(&app, &format!("/sagas/{saga_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["saga"]["saga_uuid"], saga_id);
    assert_eq!(view["saga"]["saga_type"], "check_user");
    assert_eq!(view["saga"]["saga_status"], "InProcess");
    assert_eq!(view["events"][0]["event_name"], "check_user");
    assert_eq!(view["events"][0]["event_status"], "InProgress");

    let published = broker.published_to(topics::USERS_REQUESTS).await;
    assert_eq!(published.len(), 1);
}

#[tokio::test]
async fn test_start_operation_missing_field() {
    let (app, store, _) = setup_with_state();

    let (status, json) = post_json(
        &app,
        "/operations",
        json!({"operation_code": 2, "fields": {"user_id": "u-1"}}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("currency"));
    assert_eq!(store.saga_count().await, 0);
}

#[tokio::test]
async fn test_start_unknown_operation() {
    let app = setup();

    let (status, _) = post_json(&app, "/operations", json!({"operation_code": 42})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_nonexistent_saga() {
    let app = setup();

    let (status, _) = get(&app, &format!("/sagas/{}", common::SagaId::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/sagas/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reply_advances_saga() {
    let (app, _, broker) = setup_with_state();
    let saga_id = start_add_account(&app).await;

    let request = broker.take_published().await.remove(0);
    let request = RequestEnvelope::decode(&request.payload).unwrap();
    let reply = json!({
        "saga_uuid": request.saga_uuid,
        "event_uuid": request.event_uuid,
        "operation_name": "check_user",
        "result": {"user_id": "u-1"}
    });

    let (status, json) = post_json(&app, "/replies", reply.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "advanced");
    assert_eq!(json["event_status"], "Completed");
    assert_eq!(json["saga_status"], "Completed");

    let (status, json) = post_json(&app, "/replies", reply).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "duplicate");

    let (_, view) = get(&app, &format!("/sagas/{saga_id}")).await;
    assert_eq!(view["children"].as_array().unwrap().len(), 1);
    assert_eq!(view["children"][0]["connection_status"], "Waiting");
}

#[tokio::test]
async fn test_error_reply_fails_saga() {
    let (app, _, broker) = setup_with_state();
    let saga_id = start_add_account(&app).await;

    let request = broker.take_published().await.remove(0);
    let request = RequestEnvelope::decode(&request.payload).unwrap();
    let (status, json) = post_json(
        &app,
        "/replies",
        json!({
            "saga_uuid": request.saga_uuid,
            "event_uuid": request.event_uuid,
            "operation_name": "check_user",
            "error": "user is blocked"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["event_status"], "Error");

    let (_, view) = get(&app, &format!("/sagas/{saga_id}")).await;
    assert_eq!(view["saga"]["saga_status"], "Error");
    assert_eq!(view["events"][0]["event_result"]["error"], "user is blocked");
}

#[tokio::test]
async fn test_publish_failure_then_retry() {
    let (app, _, broker) = setup_with_state();
    broker.set_fail_publish(true).await;

    let (status, json) = post_json(
        &app,
        "/operations",
        json!({"operation_code": 6, "fields": {"user_id": "u-1"}}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let saga_id = json["saga_id"].as_str().unwrap().to_string();
    assert_eq!(json["undispatched"], json!([saga_id]));

    // the event was never sent, so a reply for it is rejected
    let (_, view) = get(&app, &format!("/sagas/{saga_id}")).await;
    assert_eq!(view["events"][0]["event_status"], "Created");
    let (status, _) = post_json(
        &app,
        "/replies",
        json!({
            "saga_uuid": saga_id,
            "event_uuid": view["events"][0]["event_uuid"],
            "operation_name": "get_user_data",
            "result": {"user_id": "u-1", "accounts": []}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    broker.set_fail_publish(false).await;
    let (status, json) = post_json(&app, &format!("/sagas/{saga_id}/retry"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["dispatched_event"], view["events"][0]["event_uuid"]);

    let (_, view) = get(&app, &format!("/sagas/{saga_id}")).await;
    assert_eq!(view["events"][0]["event_status"], "InProgress");
}

#[tokio::test]
async fn test_store_outage_is_unavailable() {
    let (app, store, _) = setup_with_state();
    store.set_unavailable(true);

    let (status, _) = post_json(
        &app,
        "/operations",
        json!({"operation_code": 6, "fields": {"user_id": "u-1"}}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
