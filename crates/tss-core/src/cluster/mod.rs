//! Seams to the MPC cluster: the control plane that triggers ceremonies and
//! the broker that carries their results

use crate::{ActionRequest, ChannelKey, Result};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;

pub use ::async_trait::async_trait;

/// Control-plane client for the cluster
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Ask the cluster to start a ceremony.
    ///
    /// Returns once the request is acknowledged; the ceremony result is only
    /// ever delivered through the broker.
    async fn notify_action(&self, request: &ActionRequest) -> Result<()>;
}

/// Event-stream broker carrying ceremony results
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a dedicated subscription to one channel
    async fn subscribe(&self, channel: &ChannelKey) -> Result<Subscription>;
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// A live subscription to one broker channel.
///
/// The subscription is released exactly once: either through [`close`] or,
/// on any other exit path including cancellation, when it is dropped.
///
/// [`close`]: Subscription::close
pub struct Subscription {
    channel: String,
    messages: BoxStream<'static, String>,
    on_close: Option<CloseHook>,
}

impl Subscription {
    /// Wrap a message stream; `on_close` runs after the stream is dropped
    pub fn new<S>(channel: impl Into<String>, messages: S, on_close: impl FnOnce() + Send + 'static) -> Self
    where
        S: Stream<Item = String> + Send + 'static,
    {
        Self {
            channel: channel.into(),
            messages: messages.boxed(),
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload; `None` once the broker ends the stream or after teardown
    pub async fn next_message(&mut self) -> Option<String> {
        self.messages.next().await
    }

    /// Tear the subscription down now
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            self.messages = stream::empty().boxed();
            on_close();
            tracing::debug!(channel = %self.channel, "Subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

/// In-memory cluster for testing
pub mod memory;

pub use memory::{MemoryBroker, MemoryCluster};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_runs_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();

        let mut subscription = Subscription::new(
            "keygen:s1",
            stream::iter(vec!["a".to_string()]),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(subscription.next_message().await.as_deref(), Some("a"));
        assert_eq!(subscription.next_message().await, None);

        subscription.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();

        let subscription = Subscription::new("sign:s1", stream::pending(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(subscription);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
