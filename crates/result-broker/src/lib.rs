//! Result Broker Library
//!
//! Channel-keyed publish/subscribe hub used to deliver MPC ceremony results.
//! Cluster nodes publish JSON payloads to a channel such as `keygen:<session>`
//! and every subscriber currently attached to that exact channel receives a
//! copy. Delivery is fire-and-forget: a payload published while nobody is
//! subscribed is dropped, the same as a Redis `PUBLISH`.

use dashmap::DashMap;
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Longest channel name accepted by the hub
pub const MAX_CHANNEL_LEN: usize = 256;

/// Broker error types
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Request body for publishing a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Target channel
    pub channel: String,
    /// Opaque payload, delivered verbatim
    pub payload: String,
}

/// Response to a publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Number of subscribers the payload was handed to
    pub receivers: usize,
}

/// Check that a channel name is usable as a hub key
pub fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(BrokerError::InvalidChannel("empty channel name".into()));
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(BrokerError::InvalidChannel(format!(
            "channel name longer than {} bytes",
            MAX_CHANNEL_LEN
        )));
    }
    if channel.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(BrokerError::InvalidChannel(channel.to_string()));
    }
    Ok(())
}

/// Publish/subscribe hub
#[derive(Clone)]
pub struct Hub {
    /// Live channels indexed by name
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    /// Per-channel buffer size
    capacity: usize,
}

impl Hub {
    /// Create a new hub with the given per-channel buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish a payload, returning how many subscribers received it
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> Result<usize> {
        validate_channel(channel)?;

        let receivers = match self.channels.get(channel) {
            // `send` only fails when every receiver is gone
            Some(sender) => sender.send(payload.into()).unwrap_or(0),
            None => 0,
        };

        debug!(channel, receivers, "Published");
        Ok(receivers)
    }

    /// Attach a new subscriber to a channel, creating it if needed
    pub fn subscribe(&self, channel: &str) -> Result<HubReceiver> {
        validate_channel(channel)?;

        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(channel, "Subscriber attached");
        Ok(HubReceiver {
            channel: channel.to_string(),
            receiver,
        })
    }

    /// Number of subscribers currently attached to a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of channels currently tracked
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Terminate a channel; attached subscribers observe end-of-stream
    pub fn close(&self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    /// Drop channels nobody listens to, returning how many were removed
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Receiving half of a hub subscription
///
/// Dropping it detaches the subscriber.
pub struct HubReceiver {
    channel: String,
    receiver: broadcast::Receiver<String>,
}

impl HubReceiver {
    /// Channel this receiver is attached to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload; `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, payloads dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Turn the receiver into a stream of payloads
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        stream::unfold(self, |mut rx| async move {
            let payload = rx.recv().await?;
            Some((payload, rx))
        })
    }
}
