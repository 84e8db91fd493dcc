//! Result channel listener
//!
//! Waits on one session-scoped subscription for the first complete result.
//! The wait is a small state machine:
//!
//! ```text
//!                 message (partial / undecodable)
//!                 +------+
//!                 v      |
//!   AwaitingMessage -----+---- complete message ----> Complete
//!          |  \
//!          |   +-------- stream ended --------------> Closed
//!          +------------ deadline ------------------> TimedOut
//! ```
//!
//! The subscription is released on every transition into a terminal state,
//! and by its `Drop` impl if the wait itself is cancelled.
//!
//! Subscribing after the trigger has been sent leaves a window in which the
//! cluster may publish before anyone listens; such a result is lost and the
//! wait ends in `TimedOut`. See `CoordinatorConfig::subscribe_before_trigger`.

mod envelope;

pub use envelope::{
    required_fields, CeremonyResult, Completion, ResultEnvelope, PUB_KEY, SHARE_DATA, SIGNATURE,
};

use crate::cluster::{Broker, Subscription};
use crate::{ChannelKey, Error, Purpose, Result};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Events driving the wait
#[derive(Debug)]
enum StreamEvent {
    Message(String),
    StreamClosed,
    Deadline,
}

/// Wait states
#[derive(Debug)]
enum WaitState {
    AwaitingMessage,
    Complete(CeremonyResult),
    TimedOut,
    Closed,
}

impl WaitState {
    fn on_event(self, event: StreamEvent, channel: &ChannelKey) -> Self {
        let WaitState::AwaitingMessage = self else {
            return self;
        };

        match event {
            StreamEvent::Message(payload) => on_message(&payload, channel),
            StreamEvent::StreamClosed => WaitState::Closed,
            StreamEvent::Deadline => WaitState::TimedOut,
        }
    }

    fn finish(self, channel: &ChannelKey) -> Result<CeremonyResult> {
        match self {
            WaitState::Complete(result) => Ok(result),
            WaitState::Closed => Err(Error::ChannelClosed(channel.to_string())),
            // The wait loop only exits on a terminal state
            WaitState::TimedOut | WaitState::AwaitingMessage => {
                Err(Error::Timeout(channel.to_string()))
            }
        }
    }
}

fn on_message(payload: &str, channel: &ChannelKey) -> WaitState {
    let envelope = match ResultEnvelope::parse(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(channel = %channel, error = %e, "Skipping undecodable frame");
            return WaitState::AwaitingMessage;
        }
    };

    match envelope.complete(channel.purpose()) {
        Completion::Complete(result) => WaitState::Complete(result),
        Completion::Partial => {
            debug!(channel = %channel, "Partial result, waiting");
            WaitState::AwaitingMessage
        }
        Completion::Corrupt(reason) => {
            warn!(channel = %channel, reason = %reason, "Skipping result with bad payload encoding");
            WaitState::AwaitingMessage
        }
    }
}

/// Subscribe to `channel` and wait for its result until `deadline`
pub async fn await_result<B>(
    broker: &B,
    channel: &ChannelKey,
    deadline: Instant,
) -> Result<CeremonyResult>
where
    B: Broker + ?Sized,
{
    let subscription = broker.subscribe(channel).await?;
    wait_for_result(subscription, channel, deadline).await
}

/// Wait on an already open subscription until a complete result or `deadline`
#[instrument(skip_all, fields(channel = %channel))]
pub async fn wait_for_result(
    mut subscription: Subscription,
    channel: &ChannelKey,
    deadline: Instant,
) -> Result<CeremonyResult> {
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    let mut state = WaitState::AwaitingMessage;
    let terminal = loop {
        let event = tokio::select! {
            message = subscription.next_message() => match message {
                Some(payload) => StreamEvent::Message(payload),
                None => StreamEvent::StreamClosed,
            },
            _ = &mut sleep => StreamEvent::Deadline,
        };

        state = match state.on_event(event, channel) {
            WaitState::AwaitingMessage => WaitState::AwaitingMessage,
            terminal => break terminal,
        };
    };

    subscription.close();
    terminal.finish(channel)
}

/// Unwrap a keygen result
pub fn expect_keygen(result: CeremonyResult) -> Result<crate::KeyMaterial> {
    match result {
        CeremonyResult::Keygen(material) => Ok(material),
        CeremonyResult::Sign(_) => Err(Error::Serialization(format!(
            "expected {} result, got {}",
            Purpose::Keygen,
            Purpose::Sign
        ))),
    }
}

/// Unwrap a signing result
pub fn expect_signature(result: CeremonyResult) -> Result<crate::RawSignature> {
    match result {
        CeremonyResult::Sign(raw) => Ok(raw),
        CeremonyResult::Keygen(_) => Err(Error::Serialization(format!(
            "expected {} result, got {}",
            Purpose::Sign,
            Purpose::Keygen
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryBroker;
    use crate::SessionId;
    use std::time::Duration;

    fn channel(purpose: Purpose, id: &str) -> ChannelKey {
        ChannelKey::new(purpose, &SessionId::new(id).unwrap())
    }

    fn soon(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn test_partial_then_complete() {
        let broker = MemoryBroker::new();
        let key = channel(Purpose::Keygen, "s1");
        let subscription = broker.subscribe(&key).await.unwrap();

        broker.publish("keygen:s1", r#"{"share_data":"c2hhcmU="}"#).unwrap();
        broker
            .publish("keygen:s1", r#"{"share_data":"c2hhcmU=","pub_key":"0xabcabc"}"#)
            .unwrap();

        let result = wait_for_result(subscription, &key, soon(2_000)).await.unwrap();
        let material = expect_keygen(result).unwrap();
        assert_eq!(material.share(), b"share");
        assert_eq!(material.address(), "0xabcabc");
        assert_eq!(broker.subscriber_count("keygen:s1"), 0);
    }

    #[tokio::test]
    async fn test_garbage_frames_are_skipped() {
        let broker = MemoryBroker::new();
        let key = channel(Purpose::Sign, "s2");
        let subscription = broker.subscribe(&key).await.unwrap();

        broker.publish("sign:s2", "heartbeat").unwrap();
        broker.publish("sign:s2", r#"{"signature":"not base64!"}"#).unwrap();
        broker.publish("sign:s2", r#"{"signature":"MAYCAQECAQE="}"#).unwrap();

        let raw = expect_signature(wait_for_result(subscription, &key, soon(2_000)).await.unwrap())
            .unwrap();
        assert_eq!(raw.as_der().len(), 8);
    }

    #[tokio::test]
    async fn test_timeout_closes_subscription() {
        let broker = MemoryBroker::new();
        let key = channel(Purpose::Keygen, "s3");

        let subscription = broker.subscribe(&key).await.unwrap();
        broker.publish("keygen:s3", r#"{"share_data":"c2hhcmU="}"#).unwrap();

        let err = wait_for_result(subscription, &key, soon(50)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_outcome_unknown());
        assert_eq!(broker.subscriber_count("keygen:s3"), 0);
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let broker = MemoryBroker::new();
        let key = channel(Purpose::Sign, "s4");
        let subscription = broker.subscribe(&key).await.unwrap();

        broker.hub().close("sign:s4");

        let err = wait_for_result(subscription, &key, soon(2_000)).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed(_)));
        assert!(!err.is_outcome_unknown());
    }

    #[tokio::test]
    async fn test_sessions_do_not_cross_talk() {
        let broker = MemoryBroker::new();
        let key_a = channel(Purpose::Keygen, "a");
        let key_b = channel(Purpose::Keygen, "b");

        let sub_a = broker.subscribe(&key_a).await.unwrap();
        let sub_b = broker.subscribe(&key_b).await.unwrap();

        broker
            .publish("keygen:b", r#"{"share_data":"Yg==","pub_key":"0xbbbb"}"#)
            .unwrap();
        broker
            .publish("keygen:a", r#"{"share_data":"YQ==","pub_key":"0xaaaa"}"#)
            .unwrap();

        let (a, b) = tokio::join!(
            wait_for_result(sub_a, &key_a, soon(2_000)),
            wait_for_result(sub_b, &key_b, soon(2_000)),
        );

        let a = expect_keygen(a.unwrap()).unwrap();
        let b = expect_keygen(b.unwrap()).unwrap();
        assert_eq!((a.share(), a.address()), (&b"a"[..], "0xaaaa"));
        assert_eq!((b.share(), b.address()), (&b"b"[..], "0xbbbb"));
    }

    #[tokio::test]
    async fn test_cancellation_releases_subscription() {
        let broker = MemoryBroker::new();
        let key = channel(Purpose::Keygen, "s5");

        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            await_result(&broker, &key, soon(60_000)),
        )
        .await;

        assert!(waited.is_err());
        assert_eq!(broker.subscriptions_opened(), 1);
        assert_eq!(broker.subscriber_count("keygen:s5"), 0);
    }
}
