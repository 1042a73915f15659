//! Downstream fan-out WebSocket server.
//!
//! Every connected client receives every setup lifecycle event and
//! every connection-state change; per-symbol filtering only governs
//! upstream subscribe/unsubscribe cost.

pub mod messages;
pub mod registry;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::core::http::AppState;
use crate::metrics::Metrics;
use crate::models::connection::ConnectionState;
use crate::models::setup::SetupEvent;
use crate::services::stream::StreamConnectionManager;
use messages::ClientMessage;
use registry::{ClientFrame, ClientRegistry};

/// Check a declared origin against the allow-list. An empty list
/// allows any origin.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin {
        Some(origin) => allowed.iter().any(|a| a == origin),
        None => false,
    }
}

/// WebSocket upgrade handler with origin validation.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.fanout.allowed_origins, origin) {
        warn!(origin = origin.unwrap_or_default(), "rejecting websocket from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientFrame>();

    let registry = state.registry.clone();
    let id = registry.register(tx.clone()).await;
    state.metrics.clients_connected.inc();
    info!(client = id, "downstream client connected");

    // Writer task: the only place that touches the sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                ClientFrame::Text(text) => Message::Text(text.into()),
                ClientFrame::Ping => Message::Ping(Vec::new().into()),
                ClientFrame::Pong(payload) => Message::Pong(payload.into()),
                ClientFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Initial snapshot: service state plus any active setups.
    let _ = tx.send(ClientFrame::Text(messages::service_state(
        &state.manager.current_state(),
    )));
    for setup in state.engine.read().await.active_setups() {
        let _ = tx.send(ClientFrame::Text(messages::setup_snapshot(&setup)));
    }

    while let Some(received) = stream.next().await {
        match received {
            Ok(Message::Text(text)) => {
                registry.touch(id).await;
                handle_client_message(&state, id, &text, &tx).await;
            }
            Ok(Message::Pong(_)) => {
                registry.touch(id).await;
            }
            Ok(Message::Ping(payload)) => {
                registry.touch(id).await;
                let _ = tx.send(ClientFrame::Pong(payload.to_vec()));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    writer.abort();
    let released = registry.remove(id).await;
    if !released.is_empty() {
        state.manager.unsubscribe(&released).await;
    }
    state.metrics.clients_connected.dec();
    info!(client = id, "downstream client disconnected");
}

/// Dispatch one inbound message. Malformed payloads get a structured
/// ERROR reply; they never take the connection down.
async fn handle_client_message(
    state: &AppState,
    id: u64,
    text: &str,
    tx: &mpsc::UnboundedSender<ClientFrame>,
) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(client = id, error = %e, "malformed client message");
            let _ = tx.send(ClientFrame::Text(messages::error(&format!(
                "malformed message: {e}"
            ))));
            return;
        }
    };

    match parsed {
        ClientMessage::Subscribe { payload } => {
            state.registry.subscribe(id, &payload.symbols).await;
            state.manager.subscribe(&payload.symbols).await;
            let current = state.registry.subscriptions_of(id).await;
            let _ = tx.send(ClientFrame::Text(messages::subscriptions(&current)));
        }
        ClientMessage::Unsubscribe { payload } => {
            let released = state.registry.unsubscribe(id, &payload.symbols).await;
            if !released.is_empty() {
                state.manager.unsubscribe(&released).await;
            }
            let current = state.registry.subscriptions_of(id).await;
            let _ = tx.send(ClientFrame::Text(messages::subscriptions(&current)));
        }
        ClientMessage::Ping => {
            let _ = tx.send(ClientFrame::Text(messages::pong()));
        }
    }
}

/// Fixed-interval liveness pings plus idle eviction.
pub async fn run_heartbeat(
    registry: Arc<ClientRegistry>,
    manager: Arc<StreamConnectionManager>,
    heartbeat_interval: std::time::Duration,
    idle_timeout: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;

        for id in registry.idle_clients(idle_timeout).await {
            warn!(client = id, "evicting idle client");
            let released = registry.evict(id).await;
            if !released.is_empty() {
                manager.unsubscribe(&released).await;
            }
        }

        for (_, sender) in registry.senders().await {
            let _ = sender.send(ClientFrame::Ping);
        }
    }
}

/// Serialize each event once and send to every open client.
pub async fn run_broadcaster(
    registry: Arc<ClientRegistry>,
    metrics: Arc<Metrics>,
    mut setups_rx: broadcast::Receiver<SetupEvent>,
    mut state_rx: watch::Receiver<ConnectionState>,
) {
    loop {
        tokio::select! {
            event = setups_rx.recv() => match event {
                Ok(event) => {
                    let text = messages::setup_update(&event);
                    broadcast_text(&registry, &text).await;
                    metrics.broadcasts_sent.inc();
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "setup broadcast lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = state_rx.changed() => match changed {
                Ok(()) => {
                    let state = state_rx.borrow_and_update().clone();
                    let text = messages::service_state(&state);
                    broadcast_text(&registry, &text).await;
                    metrics.broadcasts_sent.inc();
                }
                Err(_) => break,
            },
        }
    }
}

async fn broadcast_text(registry: &ClientRegistry, text: &str) {
    // Copy-then-iterate: close handlers may mutate the registry while
    // we are sending.
    for (_, sender) in registry.senders().await {
        let _ = sender.send(ClientFrame::Text(text.to_string()));
    }
}
