//! Error types for ceremony coordination

use thiserror::Error;

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the coordinator
///
/// None of these are retried internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid session or coordinator configuration, detected locally
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The control plane rejected or failed to deliver the trigger
    #[error("Trigger failed: {0}")]
    TriggerFailed(String),

    /// No complete result before the deadline; the cluster-side outcome is unknown
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// The broker ended the stream before a result arrived
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Signature bytes could not be decoded
    #[error("Malformed signature: {0}")]
    Malformed(String),

    /// No recovery id reproduces the expected address
    #[error("Signature recovery failed: no candidate matches {expected}")]
    RecoveryFailed { expected: String },

    /// Subscription to the result channel could not be opened
    #[error("Broker error: {0}")]
    Broker(String),

    /// Control-plane transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True when the ceremony may still complete on the cluster.
    ///
    /// Callers must not retry such a ceremony with the same session id.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<result_broker::BrokerError> for Error {
    fn from(e: result_broker::BrokerError) -> Self {
        Error::Broker(e.to_string())
    }
}
