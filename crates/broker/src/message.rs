//! Wire envelopes exchanged with downstream services.

use common::{EventId, SagaId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Request sent to a downstream service.
///
/// `saga_uuid` and `event_uuid` must be echoed back in the reply so the
/// orchestrator can correlate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub saga_uuid: SagaId,
    pub event_uuid: EventId,
    pub operation_name: String,
    /// Operation-specific request body.
    pub body: serde_json::Value,
}

/// Reply from a downstream service.
///
/// Whether the remote operation succeeded is decided by the topic the
/// reply arrives on, not by the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub saga_uuid: SagaId,
    pub event_uuid: EventId,
    pub operation_name: String,
    /// Operation-specific result body.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Side-channel notice emitted when a saga reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaNotice {
    pub saga_uuid: SagaId,
    pub root_saga_uuid: SagaId,
    pub operation: String,
    pub saga_type: String,
    pub saga_status: String,
}

macro_rules! json_codec {
    ($($ty:ty),+) => {
        $(
            impl $ty {
                /// Encodes the envelope as JSON bytes.
                pub fn encode(&self) -> Result<Vec<u8>> {
                    Ok(serde_json::to_vec(self)?)
                }

                /// Decodes the envelope from JSON bytes.
                pub fn decode(payload: &[u8]) -> Result<Self> {
                    Ok(serde_json::from_slice(payload)?)
                }
            }
        )+
    };
}

json_codec!(RequestEnvelope, ReplyEnvelope, SagaNotice);
