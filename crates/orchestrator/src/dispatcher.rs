use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use broker::{MessageBroker, RequestEnvelope, SagaNotice, topics};
use saga_store::Event;

use crate::catalog::{EventType, SagaCatalog, Server};
use crate::command::{Command, SagaContext};
use crate::error::{Result, SagaError};

/// Servers, topics and operations the dispatcher may publish to.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    servers: HashMap<Server, HashSet<EventType>>,
    topics: HashSet<String>,
}

impl AllowList {
    /// An empty allow-list that rejects everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows every server, topic and operation declared in the catalog.
    pub fn from_catalog(catalog: &SagaCatalog) -> Self {
        EventType::ALL
            .iter()
            .filter_map(|event_type| catalog.event(*event_type))
            .fold(Self::new(), |list, def| {
                list.allow_topic(def.server.topic())
                    .allow(def.server, [def.event_type])
            })
    }

    pub fn allow(mut self, server: Server, operations: impl IntoIterator<Item = EventType>) -> Self {
        self.servers.entry(server).or_default().extend(operations);
        self
    }

    pub fn allow_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    fn check(&self, server: Server, event_type: EventType) -> Result<()> {
        let operations = self
            .servers
            .get(&server)
            .ok_or_else(|| SagaError::InvalidServer(server.to_string()))?;
        if !self.topics.contains(server.topic()) {
            return Err(SagaError::InvalidServersTopic {
                server: server.to_string(),
                topic: server.topic().to_string(),
            });
        }
        if !operations.contains(&event_type) {
            return Err(SagaError::InvalidServersOperation {
                server: server.to_string(),
                operation: event_type.to_string(),
            });
        }
        Ok(())
    }
}

/// A request ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMessage {
    pub server: Server,
    pub topic: &'static str,
    pub envelope: RequestEnvelope,
}

/// Routes events to their server's inbound topic.
#[derive(Clone)]
pub struct Dispatcher<B: MessageBroker> {
    broker: B,
    catalog: Arc<SagaCatalog>,
    allow: AllowList,
    publish_timeout: Duration,
}

impl<B: MessageBroker> Dispatcher<B> {
    /// Creates a dispatcher allowing everything the catalog declares.
    pub fn new(broker: B, catalog: Arc<SagaCatalog>, publish_timeout: Duration) -> Self {
        let allow = AllowList::from_catalog(&catalog);
        Self::with_allow_list(broker, catalog, allow, publish_timeout)
    }

    pub fn with_allow_list(
        broker: B,
        catalog: Arc<SagaCatalog>,
        allow: AllowList,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            catalog,
            allow,
            publish_timeout,
        }
    }

    pub fn catalog(&self) -> &Arc<SagaCatalog> {
        &self.catalog
    }

    /// Resolves the server and builds the request for `event`.
    ///
    /// Performs no I/O, so callers can validate a whole batch before
    /// persisting anything.
    pub fn prepare(&self, event: &Event, ctx: &SagaContext) -> Result<PreparedMessage> {
        let def = self.catalog.event_by_name(&event.event_name)?;
        self.allow.check(def.server, def.event_type)?;

        let body = Command::build(def.event_type, ctx)?.to_body()?;
        Ok(PreparedMessage {
            server: def.server,
            topic: def.server.topic(),
            envelope: RequestEnvelope {
                saga_uuid: event.saga_uuid,
                event_uuid: event.event_uuid,
                operation_name: def.event_type.to_string(),
                body,
            },
        })
    }

    /// Publishes a prepared request within the publish timeout.
    pub async fn publish(&self, message: &PreparedMessage) -> Result<()> {
        let payload = message.envelope.encode()?;

        match tokio::time::timeout(self.publish_timeout, self.broker.publish(message.topic, payload))
            .await
        {
            Ok(result) => result?,
            Err(_) => return Err(SagaError::PublishTimeout(message.topic.to_string())),
        }

        metrics::counter!(
            "saga_events_dispatched_total",
            "server" => message.server.as_str(),
            "event_type" => message.envelope.operation_name.clone()
        )
        .increment(1);
        tracing::debug!(
            topic = message.topic,
            event_id = %message.envelope.event_uuid,
            event_type = %message.envelope.operation_name,
            "request published"
        );
        Ok(())
    }

    /// Publishes a terminal-status notice. Failures are only logged.
    pub async fn notify(&self, notice: SagaNotice) {
        let payload = match notice.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, saga_id = %notice.saga_uuid, "failed to encode saga notice");
                return;
            }
        };

        let publish = self
            .broker
            .publish(topics::NOTIFICATION_REQUESTS, payload);
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, saga_id = %notice.saga_uuid, "failed to publish saga notice")
            }
            Err(_) => tracing::warn!(saga_id = %notice.saga_uuid, "saga notice publish timed out"),
        }
    }
}
