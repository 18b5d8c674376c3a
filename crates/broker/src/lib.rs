//! Transport gateway for the saga orchestrator.
//!
//! The message broker is an external service; this crate specifies the
//! contract the orchestrator relies on (fire-and-forget publish, topic
//! subscription with at-least-once delivery) and the JSON envelopes that
//! travel over it. [`InMemoryBroker`] implements the contract for tests and
//! single-process deployments; with the `kafka` feature, `KafkaBroker`
//! implements it over a Kafka-compatible cluster.

pub mod broker;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod message;
pub mod topics;

pub use broker::{MessageBroker, MessageStream};
pub use error::{BrokerError, Result};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use memory::InMemoryBroker;
pub use message::{InboundMessage, ReplyEnvelope, RequestEnvelope, SagaNotice};
