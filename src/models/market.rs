use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bar timeframes tracked per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    OneMinute,
    FiveMinute,
    SixtyMinute,
}

impl Timeframe {
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinute => "5m",
            Timeframe::SixtyMinute => "60m",
        }
    }
}

/// OHLCV aggregate for a fixed time bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,
}

impl Bar {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            vwap: None,
        }
    }

    pub fn with_vwap(mut self, vwap: f64) -> Self {
        self.vwap = Some(vwap);
        self
    }

    /// (high + low + close) / 3, used for volume weighting.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True when this bar's full range sits inside `reference`'s range.
    pub fn contained_within(&self, reference: &Bar) -> bool {
        self.high <= reference.high && self.low >= reference.low
    }
}

/// Last trade print for a symbol. Only the latest is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
}

/// Top-of-book quote for a symbol. Only the latest is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}
