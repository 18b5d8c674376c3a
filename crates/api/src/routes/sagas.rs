//! Saga polling and recovery endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use broker::MessageBroker;
use common::SagaId;
use orchestrator::SagaView;
use saga_store::SagaStore;
use serde::Serialize;

use super::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct RetryResponse {
    pub saga_id: String,
    /// The event that was re-sent, if the saga had one pending.
    pub dispatched_event: Option<String>,
}

/// GET /sagas/{id}: the saga with its events and connections.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + 'static, B: MessageBroker + 'static>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaView>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let view = state
        .orchestrator
        .saga_view(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;
    Ok(Json(view))
}

/// POST /sagas/{id}/retry: re-send a request whose publish failed.
#[tracing::instrument(skip(state))]
pub async fn retry<S: SagaStore + 'static, B: MessageBroker + 'static>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let dispatched = state.orchestrator.retry_pending(saga_id).await?;

    Ok(Json(RetryResponse {
        saga_id: saga_id.to_string(),
        dispatched_event: dispatched.map(|event_id| event_id.to_string()),
    }))
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
