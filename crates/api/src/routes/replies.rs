//! Reply ingestion over HTTP, for services that cannot reach the broker.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use broker::{MessageBroker, ReplyEnvelope};
use orchestrator::ReconcileOutcome;
use saga_store::SagaStore;

use super::AppState;
use crate::error::ApiError;

/// POST /replies: a reply carrying `error` is a failure, any other a success.
#[tracing::instrument(
    skip(state, reply),
    fields(saga_id = %reply.saga_uuid, event_id = %reply.event_uuid)
)]
pub async fn submit<S: SagaStore + 'static, B: MessageBroker + 'static>(
    State(state): State<Arc<AppState<S, B>>>,
    Json(reply): Json<ReplyEnvelope>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    let success = reply.error.is_none();
    let outcome = state.orchestrator.handle_reply(success, reply).await?;
    Ok(Json(outcome))
}
