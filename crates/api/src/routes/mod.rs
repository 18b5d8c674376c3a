//! HTTP handlers.

pub mod health;
pub mod metrics;
pub mod operations;
pub mod replies;
pub mod sagas;

use std::sync::Arc;

use broker::MessageBroker;
use orchestrator::Orchestrator;
use saga_store::SagaStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore, B: MessageBroker> {
    pub orchestrator: Arc<Orchestrator<S, B>>,
}
