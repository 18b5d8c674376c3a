//! Operation catalog and operation start endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use broker::MessageBroker;
use orchestrator::Operation;
use saga_store::SagaStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct StartOperationRequest {
    pub operation_code: u8,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OperationStartedResponse {
    pub saga_id: String,
    pub operation: String,
}

#[derive(Serialize)]
pub struct OperationResponse {
    pub code: u8,
    pub name: &'static str,
    pub required_fields: Vec<&'static str>,
    pub saga_types: Vec<&'static str>,
}

// -- Handlers --

/// POST /operations: validate the input, persist the root sagas and send
/// their first requests. The operation then proceeds asynchronously.
#[tracing::instrument(skip(state, req), fields(operation_code = req.operation_code))]
pub async fn start<S: SagaStore + 'static, B: MessageBroker + 'static>(
    State(state): State<Arc<AppState<S, B>>>,
    Json(req): Json<StartOperationRequest>,
) -> Result<(StatusCode, Json<OperationStartedResponse>), ApiError> {
    let saga_id = state
        .orchestrator
        .start_operation(req.operation_code, req.fields)
        .await?;

    let operation = Operation::from_code(req.operation_code)
        .map(|op| op.as_str().to_string())
        .unwrap_or_default();

    Ok((
        StatusCode::ACCEPTED,
        Json(OperationStartedResponse {
            saga_id: saga_id.to_string(),
            operation,
        }),
    ))
}

/// GET /operations: the operations this gateway accepts.
pub async fn list<S: SagaStore + 'static, B: MessageBroker + 'static>(
    State(state): State<Arc<AppState<S, B>>>,
) -> Json<Vec<OperationResponse>> {
    let orchestrator = &state.orchestrator;
    let operations = Operation::ALL
        .iter()
        .filter(|op| orchestrator.catalog().operation(**op).is_some())
        .map(|op| OperationResponse {
            code: op.code(),
            name: op.as_str(),
            required_fields: orchestrator.rules().required_fields(*op).to_vec(),
            saga_types: orchestrator
                .catalog()
                .reachable_saga_types(*op)
                .iter()
                .map(|saga_type| saga_type.as_str())
                .collect(),
        })
        .collect();

    Json(operations)
}
