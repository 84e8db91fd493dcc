//! In-memory cluster implementation for testing

use super::{async_trait, Broker, ControlPlane, Subscription};
use crate::{Action, ActionRequest, ChannelKey, Error, Result};
use dashmap::DashMap;
use result_broker::Hub;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Broker backed by an in-process [`Hub`]
#[derive(Clone, Default)]
pub struct MemoryBroker {
    hub: Hub,
    /// Subscriptions opened over the broker's lifetime
    opened: Arc<AtomicUsize>,
}

impl MemoryBroker {
    /// Create a new in-memory broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying hub
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Publish a payload, returning how many subscribers received it
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> Result<usize> {
        Ok(self.hub.publish(channel, payload)?)
    }

    /// Subscribers currently attached to a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.hub.subscriber_count(channel)
    }

    /// Total subscriptions ever opened through this broker
    pub fn subscriptions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Wait until at least one subscriber is attached to `channel`
    pub async fn wait_for_subscriber(&self, channel: &str) {
        while self.hub.subscriber_count(channel) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, channel: &ChannelKey) -> Result<Subscription> {
        let receiver = self.hub.subscribe(channel.as_str())?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        // Dropping the stream drops the hub receiver, which detaches it
        Ok(Subscription::new(
            channel.as_str(),
            receiver.into_stream(),
            || {},
        ))
    }
}

type Responder = Arc<dyn Fn(&ActionRequest) -> Vec<String> + Send + Sync>;

/// How long scripted payloads wait for a subscriber by default
pub const DEFAULT_PUBLISH_DEADLINE: Duration = Duration::from_secs(5);

/// Scripted control plane.
///
/// Records every trigger and, for scripted actions, publishes the scripted
/// payloads on the session's channel as soon as someone subscribes to it.
/// Payloads nobody subscribes for within the publish deadline are dropped.
#[derive(Clone)]
pub struct MemoryCluster {
    broker: MemoryBroker,
    requests: Arc<Mutex<Vec<ActionRequest>>>,
    responders: Arc<DashMap<Action, Responder>>,
    failure: Option<String>,
    publish_deadline: Duration,
}

impl MemoryCluster {
    /// Create a cluster publishing through `broker`
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            requests: Arc::new(Mutex::new(Vec::new())),
            responders: Arc::new(DashMap::new()),
            failure: None,
            publish_deadline: DEFAULT_PUBLISH_DEADLINE,
        }
    }

    /// Publish the same payloads for every trigger of `action`
    pub fn respond_with(self, action: Action, payloads: Vec<String>) -> Self {
        self.respond_with_fn(action, move |_| payloads.clone())
    }

    /// Build the payloads from the trigger
    pub fn respond_with_fn<F>(self, action: Action, responder: F) -> Self
    where
        F: Fn(&ActionRequest) -> Vec<String> + Send + Sync + 'static,
    {
        self.responders.insert(action, Arc::new(responder));
        self
    }

    /// Fail every trigger with a transport error
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Give up on scripted payloads when no subscriber attaches within `deadline`
    pub fn with_publish_deadline(mut self, deadline: Duration) -> Self {
        self.publish_deadline = deadline;
        self
    }

    /// Triggers received so far
    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ControlPlane for MemoryCluster {
    async fn notify_action(&self, request: &ActionRequest) -> Result<()> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(reason) = &self.failure {
            return Err(Error::Transport(reason.clone()));
        }

        let responder = self
            .responders
            .get(&request.action)
            .map(|entry| entry.value().clone());

        if let Some(responder) = responder {
            let payloads = responder(request);
            let channel = ChannelKey::new(request.action.purpose(), &request.session_id);
            let broker = self.broker.clone();
            let deadline = self.publish_deadline;

            tokio::spawn(async move {
                let attached =
                    tokio::time::timeout(deadline, broker.wait_for_subscriber(channel.as_str()))
                        .await;
                if attached.is_err() {
                    warn!(channel = %channel, "No subscriber attached, dropping scripted payloads");
                    return;
                }

                for payload in payloads {
                    if let Err(e) = broker.publish(channel.as_str(), payload) {
                        warn!(channel = %channel, error = %e, "Scripted publish failed");
                    }
                }
            });
        }

        Ok(())
    }
}
