//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orchestrator::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Orchestration error.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({ "error": self.to_string() });
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => {
                // The saga exists and can be retried through its id.
                if let SagaError::Undispatched {
                    saga_id,
                    undispatched,
                    ..
                } = &err
                {
                    body["saga_id"] = serde_json::json!(saga_id);
                    body["undispatched"] = serde_json::json!(undispatched);
                }
                saga_error_status(&err)
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_status(err: &SagaError) -> StatusCode {
    match err {
        e if e.is_input_error() => StatusCode::BAD_REQUEST,
        SagaError::SagaNotFound(_) | SagaError::EventNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InvalidEventStatus { .. } => StatusCode::CONFLICT,
        SagaError::Undispatched { .. } => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{EventId, SagaId};
    use saga_store::EventStatus;

    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            saga_error_status(&SagaError::InvalidOperation(99)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            saga_error_status(&SagaError::SagaNotFound(SagaId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            saga_error_status(&SagaError::InvalidEventStatus {
                event_id: EventId::new(),
                status: EventStatus::Created,
                success: true,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            saga_error_status(&SagaError::StoreTimeout),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            saga_error_status(&SagaError::NoRevertEvent {
                saga_id: SagaId::new(),
                event_type: "close_account".to_string(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_undispatched_is_unavailable() {
        let saga_id = SagaId::new();
        let err = SagaError::Undispatched {
            saga_id,
            undispatched: vec![saga_id],
            source: Box::new(SagaError::PublishTimeout("users.requests".to_string())),
        };
        assert_eq!(saga_error_status(&err), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_undispatched_body_names_sagas_to_retry() {
        let saga_id = SagaId::new();
        let other = SagaId::new();
        let response = ApiError::Saga(SagaError::Undispatched {
            saga_id,
            undispatched: vec![other],
            source: Box::new(SagaError::StoreTimeout),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["saga_id"], serde_json::json!(saga_id));
        assert_eq!(body["undispatched"], serde_json::json!([other]));
    }
}
