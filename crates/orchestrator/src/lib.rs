//! Saga orchestration engine for the banking back office.
//!
//! An [`Operation`] requested by a client expands, through the static
//! [`SagaCatalog`], into a tree of sagas. Each saga is a sequence of events,
//! each event one request/reply exchange with a downstream service over the
//! message broker. The [`Orchestrator`] persists every step through a
//! [`saga_store::SagaStore`], dispatches requests, reconciles replies and
//! runs compensating events when a step fails.
//!
//! # Modules
//!
//! - [`catalog`]: operations, saga types and event types
//! - [`event_machine`] / [`saga_machine`]: pure state transitions
//! - [`validation`]: required fields and semantic checks
//! - [`command`]: typed request bodies and reply results
//! - [`dispatcher`]: routing and publishing of requests
//! - [`coordinator`]: the [`Orchestrator`] façade
//! - [`worker`]: the reply consumer

pub mod catalog;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod event_machine;
pub mod locks;
pub mod saga_machine;
pub mod validation;
pub mod worker;

pub use catalog::{
    Compensation, EventDefinition, EventType, ExpandedSaga, Operation, OperationDefinition,
    SagaCatalog, SagaDefinition, SagaType, Server,
};
pub use command::{Command, EventResult, SagaContext};
pub use config::OrchestratorConfig;
pub use coordinator::{Orchestrator, ReconcileOutcome, SagaView};
pub use dispatcher::{AllowList, Dispatcher, PreparedMessage};
pub use error::{CatalogError, Result, SagaError};
pub use event_machine::{EventAction, Transition};
pub use validation::ValidationRules;
pub use worker::{ReplyWorker, RetryPolicy};
