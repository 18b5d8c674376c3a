use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A client for the broker could not be created.
    #[error("Broker connection failed: {0}")]
    Connect(String),

    /// The broker could not accept the message.
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Subscribing to the requested topics failed.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
