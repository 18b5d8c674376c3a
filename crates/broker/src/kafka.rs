//! Kafka-compatible broker adapter built on rdkafka.
//!
//! Offsets are committed only after a message has been handed to the
//! subscriber's channel, so a crash between receipt and hand-off redelivers
//! the message (at-least-once).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio::sync::mpsc;

use crate::{BrokerError, InboundMessage, MessageBroker, MessageStream, Result};

/// Broker backed by a Kafka-compatible cluster (Kafka, Redpanda).
#[derive(Clone)]
pub struct KafkaBroker {
    producer: FutureProducer,
    brokers: String,
    consumer_group: String,
    send_timeout: Duration,
    buffer_size: usize,
}

impl KafkaBroker {
    /// Connects a producer to `brokers` (comma-separated `host:port` list).
    /// Subscriptions join `consumer_group`.
    pub fn new(brokers: &str, consumer_group: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        tracing::info!(brokers, consumer_group, "kafka broker created");
        Ok(Self {
            producer,
            brokers: brokers.to_string(),
            consumer_group: consumer_group.to_string(),
            send_timeout: Duration::from_secs(5),
            buffer_size: 1000,
        })
    }

    /// Sets how long a publish waits for the producer queue.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let record: FutureRecord<'_, (), Vec<u8>> = FutureRecord::to(topic).payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(topic, partition, offset, "message published");
                Ok(())
            }
            Err((e, _)) => Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<MessageStream> {
        if topics.is_empty() {
            return Err(BrokerError::Subscribe("no topics given".to_string()));
        }

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        consumer
            .subscribe(topics)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        tracing::info!(?topics, consumer_group = %self.consumer_group, "subscribed");

        let (tx, rx) = mpsc::channel(self.buffer_size);
        tokio::spawn(async move {
            let mut stream = consumer.stream();
            while let Some(received) = stream.next().await {
                let message = match received {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "kafka receive failed");
                        continue;
                    }
                };

                let inbound = InboundMessage::new(
                    message.topic(),
                    message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                );
                if tx.send(inbound).await.is_err() {
                    // receiver gone: leave the offset uncommitted
                    break;
                }
                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        topic = message.topic(),
                        offset = message.offset(),
                        error = %e,
                        "offset commit failed, message may be redelivered"
                    );
                }
            }
            tracing::debug!("kafka consumer task exiting");
        });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kafka_broker_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<KafkaBroker>();
    }

    #[tokio::test]
    async fn test_subscribe_requires_topics() {
        // creating a producer does not contact the cluster
        let broker = KafkaBroker::new("localhost:9092", "saga-orchestrator").unwrap();
        assert_eq!(broker.brokers(), "localhost:9092");
        assert!(matches!(
            broker.subscribe(&[]).await,
            Err(BrokerError::Subscribe(_))
        ));
    }
}
