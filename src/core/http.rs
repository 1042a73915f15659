//! HTTP endpoint server using Axum.

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::config::FanoutConfig;
use crate::health::HealthState;
use crate::metrics::Metrics;
use crate::services::fanout;
use crate::services::fanout::registry::ClientRegistry;
use crate::services::stream::StreamConnectionManager;
use crate::signals::SetupEngine;

#[derive(Clone)]
pub struct AppState {
    pub health: watch::Receiver<HealthState>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
    pub registry: Arc<ClientRegistry>,
    pub manager: Arc<StreamConnectionManager>,
    pub engine: Arc<RwLock<SetupEngine>>,
    pub fanout: FanoutConfig,
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let health = state.health.borrow().clone();
    let uptime_seconds = state.start_time.elapsed().as_secs();
    Ok(Json(json!({
        "status": health.status,
        "reason": health.reason,
        "ready": health.is_ready(),
        "data_age_seconds": health.data_age_seconds(),
        "uptime_seconds": uptime_seconds,
        "service": "scantrix-stream-engine"
    })))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Deserialize)]
struct SetupQuery {
    symbol: Option<String>,
}

/// Read-only view over the active setup snapshot.
async fn list_setups(
    State(state): State<AppState>,
    Query(params): Query<SetupQuery>,
) -> Result<Json<Value>, StatusCode> {
    let engine = state.engine.read().await;
    let setups = match params.symbol.as_deref() {
        Some(symbol) => engine.active_setups_for(symbol),
        None => engine.active_setups(),
    };
    Ok(Json(json!(setups)))
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();

    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();

    state.metrics.http_requests_in_flight.dec();
    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/setups", get(list_setups))
        .route("/ws", get(fanout::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    axum::serve(listener, app).await?;

    Ok(())
}
