//! TSS Client
//!
//! Network implementations of the coordinator's cluster seams:
//! - [`HttpControlPlane`]: posts ceremony triggers to the cluster
//! - [`WsBroker`]: one WebSocket per result channel on the result broker

use futures_util::{future, SinkExt, StreamExt};
use reqwest::Client;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, instrument};
use tss_core::cluster::{async_trait, Broker, ControlPlane, Subscription};
use tss_core::{ActionRequest, ChannelKey, Error, Result};

/// HTTP-based control-plane client
///
/// The inner `reqwest::Client` pools connections and is shared by every
/// ceremony issued through this value.
#[derive(Clone)]
pub struct HttpControlPlane {
    /// HTTP client
    client: Client,
    /// Control-plane URL
    url: String,
    /// Request timeout
    timeout: Duration,
}

impl HttpControlPlane {
    /// Create a new control-plane client
    pub fn new(url: &str) -> Self {
        Self::with_client(Client::new(), url)
    }

    /// Reuse an existing HTTP client
    pub fn with_client(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    #[instrument(skip(self, request), fields(session = %request.session_id, action = ?request.action))]
    async fn notify_action(&self, request: &ActionRequest) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/action", self.url))
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "POST failed with status: {} {}",
                status, body
            )));
        }

        debug!("Action acknowledged");
        Ok(())
    }
}

/// WebSocket subscriber for the result broker service
#[derive(Clone)]
pub struct WsBroker {
    /// Broker base URL (`ws://` or `wss://`)
    url: String,
}

impl WsBroker {
    /// Create a broker client; `http(s)://` URLs are mapped to `ws(s)://`
    pub fn new(url: &str) -> Self {
        let url = url.trim_end_matches('/');
        let url = if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else {
            url.to_string()
        };
        Self { url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Broker for WsBroker {
    #[instrument(skip(self), fields(channel = %channel))]
    async fn subscribe(&self, channel: &ChannelKey) -> Result<Subscription> {
        let endpoint = format!("{}/v1/subscribe/{}", self.url, channel);

        let (socket, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;
        let (mut sink, stream) = socket.split();

        let messages = stream
            .take_while(|frame| future::ready(matches!(frame, Ok(m) if !m.is_close())))
            .filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(text),
                    Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok(),
                    _ => None,
                }
            });

        debug!("Subscribed");

        Ok(Subscription::new(channel.as_str(), messages, move || {
            // Send the close frame off the caller's path
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = sink.close().await;
                });
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use result_broker::Hub;
    use result_broker_svc::AppState;
    use std::sync::{Arc, Mutex};
    use tss_core::{listener, Coordinator, CoordinatorConfig, Purpose, SessionId};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Control plane that answers keygen triggers through the broker hub
    #[derive(Clone)]
    struct StubCluster {
        hub: Hub,
        seen: Arc<Mutex<Vec<serde_json::Value>>>,
        status: StatusCode,
    }

    async fn action(
        State(stub): State<StubCluster>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        stub.seen.lock().unwrap().push(body.clone());

        if stub.status.is_success() && body["action"] == "INIT_KEYGEN" {
            let channel = format!("keygen:{}", body["session_id"].as_str().unwrap());
            let hub = stub.hub.clone();
            tokio::spawn(async move {
                while hub.subscriber_count(&channel) == 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                hub.publish(&channel, r#"{"share_data":"c2hhcmU="}"#).unwrap();
                hub.publish(&channel, r#"{"share_data":"c2hhcmU=","pub_key":"0xfeed"}"#)
                    .unwrap();
            });
        }
        stub.status
    }

    async fn start_cluster(hub: Hub, status: StatusCode) -> (String, StubCluster) {
        let stub = StubCluster {
            hub,
            seen: Arc::new(Mutex::new(Vec::new())),
            status,
        };
        let app = Router::new()
            .route("/v1/action", post(action))
            .with_state(stub.clone());
        (serve(app).await, stub)
    }

    async fn wait_detached(hub: &Hub, channel: &str) {
        for _ in 0..200 {
            if hub.subscriber_count(channel) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscriber on {} never detached", channel);
    }

    #[test]
    fn test_ws_url_mapping() {
        assert_eq!(WsBroker::new("http://broker:8090/").url(), "ws://broker:8090");
        assert_eq!(WsBroker::new("https://broker").url(), "wss://broker");
        assert_eq!(WsBroker::new("ws://broker").url(), "ws://broker");
    }

    #[tokio::test]
    async fn test_create_wallet_end_to_end() {
        let hub = Hub::default();
        let broker_url = serve(result_broker_svc::router(AppState::new(hub.clone()))).await;
        let (cluster_url, stub) = start_cluster(hub.clone(), StatusCode::OK).await;

        let coordinator = Coordinator::new(
            HttpControlPlane::new(&cluster_url),
            WsBroker::new(&broker_url),
            CoordinatorConfig::default().with_timeout(Duration::from_secs(10)),
        )
        .unwrap();

        let material = coordinator
            .create_wallet(&SessionId::new("e2e-1").unwrap())
            .await
            .unwrap();
        assert_eq!(material.share(), b"share");
        assert_eq!(material.address(), "0xfeed");

        let seen = stub.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["parties"], serde_json::json!([1, 2, 3]));
        assert_eq!(seen[0]["threshold"], 2);

        wait_detached(&hub, "keygen:e2e-1").await;
    }

    #[tokio::test]
    async fn test_rejected_trigger() {
        let hub = Hub::default();
        let broker_url = serve(result_broker_svc::router(AppState::new(hub.clone()))).await;
        let (cluster_url, _stub) =
            start_cluster(hub.clone(), StatusCode::SERVICE_UNAVAILABLE).await;

        let coordinator = Coordinator::new(
            HttpControlPlane::new(&cluster_url),
            WsBroker::new(&broker_url),
            CoordinatorConfig::default(),
        )
        .unwrap();

        let err = coordinator
            .sign(&SessionId::new("e2e-2").unwrap(), b"share", &[7u8; 32], "0x00")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TriggerFailed(_)));
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_control_plane() {
        let control_plane =
            HttpControlPlane::new("http://127.0.0.1:1").with_timeout(Duration::from_secs(2));
        let session = tss_core::Session::new(
            SessionId::new("e2e-3").unwrap(),
            Purpose::Keygen,
            vec![1, 2, 3],
            2,
        )
        .unwrap();

        let err = control_plane
            .notify_action(&ActionRequest::keygen(&session))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_closed_channel_over_websocket() {
        let hub = Hub::default();
        let broker = WsBroker::new(&serve(result_broker_svc::router(AppState::new(hub.clone()))).await);
        let channel = ChannelKey::new(Purpose::Sign, &SessionId::new("e2e-4").unwrap());

        let subscription = broker.subscribe(&channel).await.unwrap();
        assert_eq!(hub.subscriber_count("sign:e2e-4"), 1);

        hub.close("sign:e2e-4");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let err = listener::wait_for_result(subscription, &channel, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelClosed(_)));
    }
}
