//! Downstream client protocol.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::models::connection::ConnectionState;
use crate::models::setup::{Setup, SetupAction, SetupEvent};

/// Inbound messages form a closed set; anything else is an ERROR.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe { payload: SymbolsPayload },
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe { payload: SymbolsPayload },
    #[serde(rename = "PING")]
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolsPayload {
    pub symbols: Vec<String>,
}

pub fn setup_update(event: &SetupEvent) -> String {
    json!({
        "type": "SETUP_UPDATE",
        "payload": {
            "action": event.action,
            "setup": event.setup,
        },
        "timestamp": Utc::now().timestamp_millis(),
    })
    .to_string()
}

/// Initial-state replay of an already-active setup.
pub fn setup_snapshot(setup: &Setup) -> String {
    json!({
        "type": "SETUP_UPDATE",
        "payload": {
            "action": SetupAction::Snapshot,
            "setup": setup,
        },
        "timestamp": Utc::now().timestamp_millis(),
    })
    .to_string()
}

pub fn service_state(state: &ConnectionState) -> String {
    json!({
        "type": "SERVICE_STATE",
        "payload": state,
        "timestamp": Utc::now().timestamp_millis(),
    })
    .to_string()
}

pub fn subscriptions(symbols: &[String]) -> String {
    json!({
        "type": "SUBSCRIPTIONS",
        "symbols": symbols,
        "timestamp": Utc::now().timestamp_millis(),
    })
    .to_string()
}

pub fn pong() -> String {
    json!({"type": "PONG"}).to_string()
}

pub fn error(message: &str) -> String {
    json!({"type": "ERROR", "message": message}).to_string()
}
