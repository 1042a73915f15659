//! Upstream provider wire protocol.
//!
//! Inbound text frames are JSON arrays of event objects discriminated
//! by the `ev` field. Outbound control frames are
//! `{action, params}` objects.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::StreamError;
use crate::models::market::{Bar, Quote, Trade};

/// Status codes the provider reports on its control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    AuthSuccess,
    AuthFailed,
    MaxConnections,
    Connected,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusEvent {
    pub status: StatusCode,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteEvent {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    #[serde(default)]
    pub bid_size: f64,
    #[serde(default)]
    pub ask_size: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateEvent {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
    pub timestamp: i64,
}

/// One inbound provider event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "ev")]
pub enum ProviderEvent {
    #[serde(rename = "status")]
    Status(StatusEvent),
    #[serde(rename = "trade")]
    Trade(TradeEvent),
    #[serde(rename = "quote")]
    Quote(QuoteEvent),
    #[serde(rename = "agg")]
    Aggregate(AggregateEvent),
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

impl TradeEvent {
    pub fn into_trade(self) -> Trade {
        Trade {
            symbol: self.symbol,
            timestamp: millis_to_utc(self.timestamp),
            price: self.price,
            size: self.size,
        }
    }
}

impl QuoteEvent {
    pub fn into_quote(self) -> Quote {
        Quote {
            symbol: self.symbol,
            timestamp: millis_to_utc(self.timestamp),
            bid: self.bid,
            ask: self.ask,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
        }
    }
}

impl AggregateEvent {
    pub fn into_bar(self) -> Bar {
        let mut bar = Bar::new(
            self.symbol,
            millis_to_utc(self.timestamp),
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        );
        if let Some(vwap) = self.vwap {
            bar = bar.with_vwap(vwap);
        }
        bar
    }
}

/// Market data handed to the detection engine.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Bar(Bar),
    Trade(Trade),
    Quote(Quote),
}

/// Parse one text frame into its events.
///
/// A frame that is not a JSON array is rejected outright; an element
/// that fails to parse is logged and dropped so one malformed object
/// never takes the rest of the frame (or the connection) with it.
pub fn parse_frame(text: &str) -> Result<Vec<ProviderEvent>, StreamError> {
    let values: Vec<Value> = serde_json::from_str(text)
        .map_err(|e| StreamError::Protocol(format!("frame is not a JSON array: {e}")))?;

    let mut events = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<ProviderEvent>(value) {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "dropping malformed provider event"),
        }
    }
    Ok(events)
}

/// Outbound `{action, params}` control frames.
pub fn auth_frame(key: &str) -> String {
    json!({"action": "auth", "params": key}).to_string()
}

pub fn subscribe_frame(symbols: &[String]) -> String {
    json!({"action": "subscribe", "params": symbols.join(",")}).to_string()
}

pub fn unsubscribe_frame(symbols: &[String]) -> String {
    json!({"action": "unsubscribe", "params": symbols.join(",")}).to_string()
}
