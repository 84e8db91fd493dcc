//! Result Broker Service
//!
//! HTTP/WebSocket front for [`result_broker::Hub`]. Cluster nodes publish
//! ceremony results over HTTP; coordinators hold one WebSocket per session
//! channel and receive each payload as a text frame.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use result_broker::{Hub, HubReceiver, PublishRequest, PublishResponse};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Application state
pub struct AppState {
    pub hub: Hub,
}

impl AppState {
    pub fn new(hub: Hub) -> Arc<Self> {
        Arc::new(Self { hub })
    }
}

/// Build the service router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/publish", post(publish))
        .route("/v1/subscribe/:channel", get(subscribe))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "result-broker-svc",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": state.hub.channel_count(),
    }))
}

/// Publish a payload to a channel
async fn publish(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublishRequest>,
) -> Response {
    match state.hub.publish(&req.channel, req.payload) {
        Ok(receivers) => {
            info!(channel = %req.channel, receivers, "Payload published");
            Json(PublishResponse { receivers }).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Subscribe to a channel over WebSocket
///
/// The hub subscription is attached before the upgrade response is sent, so
/// a client whose handshake completed never misses a later publish.
async fn subscribe(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let receiver = match state.hub.subscribe(&channel) {
        Ok(receiver) => receiver,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    info!(channel = %channel, "Subscriber connected");
    ws.on_upgrade(move |socket| forward(socket, receiver))
}

async fn forward(socket: WebSocket, mut receiver: HubReceiver) {
    let (mut sender, mut inbound) = socket.split();

    loop {
        tokio::select! {
            payload = receiver.recv() => match payload {
                Some(payload) => {
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(channel = receiver.channel(), "Subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn publish_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/publish")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(AppState::new(Hub::default()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_publish_reaches_hub_subscriber() {
        let hub = Hub::default();
        let mut rx = hub.subscribe("keygen:s1").unwrap();
        let app = router(AppState::new(hub));

        let response = app
            .oneshot(publish_request(serde_json::json!({
                "channel": "keygen:s1",
                "payload": "{\"pub_key\":\"0x01\"}",
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["receivers"], 1);
        assert_eq!(rx.recv().await.as_deref(), Some("{\"pub_key\":\"0x01\"}"));
    }

    #[tokio::test]
    async fn test_publish_rejects_bad_channel() {
        let app = router(AppState::new(Hub::default()));

        let response = app
            .oneshot(publish_request(serde_json::json!({
                "channel": "",
                "payload": "x",
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
