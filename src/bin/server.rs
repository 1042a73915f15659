//! Scantrix streaming service.
//!
//! Wires the upstream connection manager, the setup engine, and the
//! downstream fan-out server into one process. Runs as a singleton:
//! the provider allows a single streaming session per key.

use dotenvy::dotenv;
use scantrix::config::AppConfig;
use scantrix::core::http::{start_server, AppState};
use scantrix::logging;
use scantrix::metrics::Metrics;
use scantrix::models::connection::ConnectionStatus;
use scantrix::services::engine::run_engine;
use scantrix::services::fanout;
use scantrix::services::fanout::registry::ClientRegistry;
use scantrix::services::stream::StreamConnectionManager;
use scantrix::signals::SetupEngine;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_logging();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Configuration errors are fatal; nothing to retry.
            error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };

    info!(environment = %config.environment, "starting scantrix stream engine");

    let metrics = Arc::new(Metrics::new()?);
    let (manager, events_rx) = StreamConnectionManager::new(config.stream.clone());
    let engine = Arc::new(RwLock::new(SetupEngine::new(config.detector.clone())));
    let registry = Arc::new(ClientRegistry::new());
    let (setups_tx, _) = broadcast::channel(256);

    tokio::spawn(run_engine(
        events_rx,
        engine.clone(),
        setups_tx.clone(),
        metrics.clone(),
    ));

    tokio::spawn(fanout::run_heartbeat(
        registry.clone(),
        manager.clone(),
        config.fanout.heartbeat_interval,
        config.fanout.idle_timeout,
    ));

    tokio::spawn(fanout::run_broadcaster(
        registry.clone(),
        metrics.clone(),
        setups_tx.subscribe(),
        manager.state(),
    ));

    // Mirror connection transitions into the metrics registry.
    {
        let metrics = metrics.clone();
        let mut state_rx = manager.state();
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = state_rx.borrow_and_update().clone();
                let connected = state.status == ConnectionStatus::Healthy;
                metrics.websocket_connected.set(if connected { 1.0 } else { 0.0 });
                if state.status == ConnectionStatus::Connecting {
                    metrics.reconnects_scheduled.inc();
                }
            }
        });
    }

    manager.connect().await;
    if !config.symbols.is_empty() {
        info!(symbols = ?config.symbols, "subscribing startup symbols");
        manager.subscribe(&config.symbols).await;
    }

    let state = AppState {
        health: manager.health(),
        metrics,
        start_time: Arc::new(Instant::now()),
        registry,
        manager: manager.clone(),
        engine,
        fanout: config.fanout.clone(),
    };

    let port = config.http_port;
    let server = tokio::spawn(async move {
        if let Err(e) = start_server(state, port).await {
            error!(error = %e, "HTTP server exited");
        }
    });

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    manager.disconnect().await;
    server.abort();
    info!("scantrix stream engine stopped");

    Ok(())
}
