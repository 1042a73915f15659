use serde::{Deserialize, Serialize};

/// Derived indicator snapshot for one symbol/timeframe.
///
/// Fields stay `None` until enough history exists: 200 bars for the
/// long simple average, 50 for everything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema9: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema21: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema50: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma200: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi14: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atr: Option<f64>,
}

impl IndicatorSnapshot {
    /// True when the short-lookback indicators are populated.
    pub fn has_core(&self) -> bool {
        self.ema9.is_some() && self.ema21.is_some() && self.rsi14.is_some()
    }
}
