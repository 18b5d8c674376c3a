use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{InboundMessage, Result};

/// A stream of inbound messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Publish/consume primitives of a topic-based message broker.
///
/// Delivery is at-least-once: consumers must tolerate duplicates and
/// re-deliveries. Publishing is fire-and-forget; a successful return only
/// means the broker accepted the message.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes a payload to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribes to messages published on any of the given topics.
    async fn subscribe(&self, topics: &[&str]) -> Result<MessageStream>;
}
