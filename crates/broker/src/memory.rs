use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::{BrokerError, InboundMessage, MessageBroker, MessageStream, Result};

#[derive(Default)]
struct BrokerState {
    record: bool,
    published: Vec<InboundMessage>,
    subscribers: Vec<(Vec<String>, mpsc::UnboundedSender<InboundMessage>)>,
    fail_publish: bool,
    publish_delay: Option<Duration>,
}

/// In-process broker for tests and single-node deployments.
///
/// Published messages are fanned out to the subscribers of their topic and
/// dropped when nobody listens. A broker built with [`recording`] also
/// keeps every message for inspection.
///
/// [`recording`]: InMemoryBroker::recording
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new broker with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker that records every published message.
    pub fn recording() -> Self {
        let state = BrokerState {
            record: true,
            ..BrokerState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Configures the broker to reject publishes.
    pub async fn set_fail_publish(&self, fail: bool) {
        self.state.lock().await.fail_publish = fail;
    }

    /// Delays every publish, to exercise publish timeouts.
    pub async fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.publish_delay = delay;
    }

    /// Returns every message published so far.
    pub async fn published(&self) -> Vec<InboundMessage> {
        self.state.lock().await.published.clone()
    }

    /// Returns the messages published to one topic.
    pub async fn published_to(&self, topic: &str) -> Vec<InboundMessage> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns the number of messages published so far.
    pub async fn published_count(&self) -> usize {
        self.state.lock().await.published.len()
    }

    /// Drains the record of published messages.
    pub async fn take_published(&self) -> Vec<InboundMessage> {
        std::mem::take(&mut self.state.lock().await.published)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let delay = self.state.lock().await.publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.fail_publish {
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "broker rejected message".to_string(),
            });
        }

        let message = InboundMessage::new(topic, payload);
        state
            .subscribers
            .retain(|(topics, tx)| !topics.iter().any(|t| t == topic) || tx.send(message.clone()).is_ok());
        if state.record {
            state.published.push(message);
        }
        tracing::trace!(topic, "message published");
        Ok(())
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<MessageStream> {
        if topics.is_empty() {
            return Err(BrokerError::Subscribe("no topics given".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let topics = topics.iter().map(|t| t.to_string()).collect();
        self.state.lock().await.subscribers.push((topics, tx));

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        Ok(Box::pin(stream))
    }
}
