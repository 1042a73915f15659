//! Integration tests for the upstream connection manager
//!
//! Runs a mock provider over a real websocket listener and drives the
//! manager's state machine against it.

#[path = "test_utils.rs"]
mod test_utils;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use scantrix::models::connection::ConnectionStatus;
use scantrix::services::stream::messages::MarketEvent;
use scantrix::services::stream::StreamConnectionManager;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use test_utils::test_stream_config;

const AUTH_SUCCESS: &str = r#"[{"ev":"status","status":"auth_success"}]"#;
const AUTH_FAILED: &str = r#"[{"ev":"status","status":"auth_failed","message":"bad key"}]"#;
const MAX_CONNECTIONS: &str = r#"[{"ev":"status","status":"max_connections"}]"#;

/// A provider that accepts one connection, replies to the auth frame
/// with `reply`, then forwards every frame it receives to the test.
async fn one_shot_provider(reply: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let is_auth = text.contains("\"auth\"");
                let _ = seen_tx.send(text);
                if is_auth {
                    let _ = ws.send(Message::Text(reply.to_string())).await;
                }
            }
        }
    });

    (format!("ws://{addr}"), seen_rx)
}

async fn wait_for_status(
    manager: &std::sync::Arc<StreamConnectionManager>,
    wanted: ConnectionStatus,
) {
    let mut state_rx = manager.state();
    timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| s.status == wanted),
    )
    .await
    .expect("status within deadline")
    .expect("state channel open");
}

#[tokio::test]
async fn authenticates_and_replays_buffered_subscriptions() {
    let (url, mut seen) = one_shot_provider(AUTH_SUCCESS).await;
    let (manager, _events) = StreamConnectionManager::new(test_stream_config(url));

    // Requested before the connection exists: must be buffered.
    manager.subscribe(&["AAA".to_string()]).await;
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Healthy).await;
    assert!(manager.is_authenticated().await);

    let auth = timeout(Duration::from_secs(2), seen.recv())
        .await
        .expect("auth frame")
        .unwrap();
    assert!(auth.contains("\"action\":\"auth\""));
    assert!(auth.contains("test-key"));

    let replay = timeout(Duration::from_secs(2), seen.recv())
        .await
        .expect("subscribe frame")
        .unwrap();
    assert!(replay.contains("\"action\":\"subscribe\""));
    assert!(replay.contains("AAA"));

    // Live subscribes go straight out.
    manager.subscribe(&["BBB".to_string()]).await;
    let live = timeout(Duration::from_secs(2), seen.recv())
        .await
        .expect("live subscribe frame")
        .unwrap();
    assert!(live.contains("BBB"));
}

#[tokio::test]
async fn market_events_flow_to_the_engine_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        // Auth, then one aggregate frame.
        let _ = ws.next().await;
        let _ = ws.send(Message::Text(AUTH_SUCCESS.to_string())).await;
        let frame = r#"[{"ev":"agg","symbol":"AAA","open":100.0,"high":101.0,"low":99.5,"close":100.5,"volume":2500.0,"timestamp":1709560800000}]"#;
        let _ = ws.send(Message::Text(frame.to_string())).await;
        // Hold the socket open.
        while ws.next().await.is_some() {}
    });

    let (manager, mut events) =
        StreamConnectionManager::new(test_stream_config(format!("ws://{addr}")));
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Healthy).await;

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within deadline")
        .expect("event");
    match event {
        MarketEvent::Bar(bar) => {
            assert_eq!(bar.symbol, "AAA");
            assert_eq!(bar.close, 100.5);
        }
        other => panic!("expected bar, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_connection_triggers_exactly_one_restart() {
    let (url, _seen) = one_shot_provider(AUTH_SUCCESS).await;
    let (manager, _events) = StreamConnectionManager::new(test_stream_config(url));

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Healthy).await;
    assert_eq!(manager.restart_attempts().await, 0);

    // Staleness threshold is 300ms and the provider now says nothing.
    // The watchdog must schedule one restart, not a pile of them.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if manager.restart_attempts().await == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watchdog never scheduled a restart"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // Give the watchdog several more ticks: the counter stays at one.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(manager.restart_attempts().await, 1);
}

#[tokio::test]
async fn auth_failure_without_fallback_degrades_and_stops() {
    let (url, _seen) = one_shot_provider(AUTH_FAILED).await;
    let (manager, _events) = StreamConnectionManager::new(test_stream_config(url));

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Degraded).await;

    let state = manager.current_state();
    assert_eq!(state.reason.as_deref(), Some("auth_failed"));

    // No reconnect scheduling after a terminal auth failure.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.reconnect_attempts().await, 0);
    assert!(!manager.reconnect_pending().await);
}

#[tokio::test]
async fn auth_failure_fails_over_to_the_delayed_feed_once() {
    let (primary_url, _primary_seen) = one_shot_provider(AUTH_FAILED).await;
    let (delayed_url, mut delayed_seen) = one_shot_provider(AUTH_SUCCESS).await;

    let mut config = test_stream_config(primary_url);
    config.delayed_ws_url = Some(delayed_url);
    let (manager, _events) = StreamConnectionManager::new(config);

    manager.subscribe(&["AAA".to_string()]).await;
    manager.connect().await;

    // The retry lands on the delayed endpoint and authenticates there.
    wait_for_status(&manager, ConnectionStatus::Healthy).await;

    let auth = timeout(Duration::from_secs(2), delayed_seen.recv())
        .await
        .expect("delayed auth frame")
        .unwrap();
    assert!(auth.contains("\"action\":\"auth\""));

    let replay = timeout(Duration::from_secs(2), delayed_seen.recv())
        .await
        .expect("delayed replay frame")
        .unwrap();
    assert!(replay.contains("AAA"));
}

#[tokio::test]
async fn capacity_rejection_can_disable_reconnection() {
    let (url, _seen) = one_shot_provider(MAX_CONNECTIONS).await;
    let mut config = test_stream_config(url);
    config.reconnect_on_capacity = false;
    let (manager, _events) = StreamConnectionManager::new(config);

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Degraded).await;
    assert_eq!(manager.current_state().reason.as_deref(), Some("max_connections"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!manager.reconnect_pending().await);
}

#[tokio::test]
async fn auth_timeout_enters_the_reconnect_path() {
    // This provider completes the handshake but never answers auth.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while ws.next().await.is_some() {}
            });
        }
    });

    let (manager, _events) =
        StreamConnectionManager::new(test_stream_config(format!("ws://{addr}")));
    manager.connect().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if manager.reconnect_attempts().await >= 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "auth timeout never scheduled a reconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn connect_is_idempotent_while_a_session_is_live() {
    let (url, mut seen) = one_shot_provider(AUTH_SUCCESS).await;
    let (manager, _events) = StreamConnectionManager::new(test_stream_config(url));

    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Healthy).await;
    manager.connect().await;
    manager.connect().await;

    // Only the one auth frame: redundant connects never opened a
    // second session.
    let auth = timeout(Duration::from_secs(2), seen.recv())
        .await
        .expect("auth frame")
        .unwrap();
    assert!(auth.contains("\"action\":\"auth\""));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_is_terminal_and_clears_subscriptions() {
    let (url, _seen) = one_shot_provider(AUTH_SUCCESS).await;
    let (manager, _events) = StreamConnectionManager::new(test_stream_config(url));

    manager.subscribe(&["AAA".to_string()]).await;
    manager.connect().await;
    wait_for_status(&manager, ConnectionStatus::Healthy).await;

    manager.disconnect().await;
    assert_eq!(manager.current_state().status, ConnectionStatus::Offline);
    assert!(manager.subscriptions().await.is_empty());
    assert!(!manager.is_authenticated().await);

    // No timers survive the teardown.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(manager.current_state().status, ConnectionStatus::Offline);
    assert!(!manager.reconnect_pending().await);
    assert!(!manager.restart_pending().await);
}
