//! API gateway for the saga orchestrator.
//!
//! Exposes operation start, saga polling, reply ingestion and recovery
//! endpoints, with structured logging (tracing) and Prometheus metrics. The
//! binary also runs the [`orchestrator::ReplyWorker`] that consumes replies
//! from the broker.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use broker::MessageBroker;
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{Orchestrator, OrchestratorConfig, SagaError};
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + 'static, B: MessageBroker + 'static>(
    state: Arc<AppState<S, B>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/operations", get(routes::operations::list::<S, B>))
        .route("/operations", post(routes::operations::start::<S, B>))
        .route("/replies", post(routes::replies::submit::<S, B>))
        .route("/sagas/{id}", get(routes::sagas::get::<S, B>))
        .route("/sagas/{id}/retry", post(routes::sagas::retry::<S, B>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state for the banking catalog.
pub fn create_state<S: SagaStore + 'static, B: MessageBroker + 'static>(
    store: S,
    broker: B,
    config: OrchestratorConfig,
) -> Result<Arc<AppState<S, B>>, SagaError> {
    let orchestrator = Orchestrator::banking(store, broker, config)?;
    Ok(Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
    }))
}
