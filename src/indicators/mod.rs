//! Technical indicator computation.
//!
//! Pure functions over bar slices, grouped by category. `snapshot`
//! assembles the full derived view used by the detection rules.

pub mod momentum;
pub mod trend;
pub mod volatility;
pub mod volume;

use crate::models::indicators::IndicatorSnapshot;
use crate::models::market::Bar;

/// Lookback lengths for the snapshot indicators.
#[derive(Debug, Clone)]
pub struct IndicatorLookbacks {
    pub ema_fast: usize,
    pub ema_mid: usize,
    pub ema_slow: usize,
    pub sma_long: usize,
    pub rsi: usize,
    pub atr: usize,
    /// Bars of history required before the short-lookback indicators
    /// are reported at all.
    pub min_history: usize,
}

impl Default for IndicatorLookbacks {
    fn default() -> Self {
        Self {
            ema_fast: 9,
            ema_mid: 21,
            ema_slow: 50,
            sma_long: 200,
            rsi: 14,
            atr: 14,
            min_history: 50,
        }
    }
}

/// Compute the indicator snapshot for a bar series.
///
/// Short-lookback fields stay `None` until `min_history` bars exist;
/// the long simple average additionally needs `sma_long` bars.
pub fn snapshot(bars: &[Bar], lookbacks: &IndicatorLookbacks) -> IndicatorSnapshot {
    let mut snap = IndicatorSnapshot::default();

    if bars.len() >= lookbacks.min_history {
        snap.ema9 = trend::calculate_ema(bars, lookbacks.ema_fast);
        snap.ema21 = trend::calculate_ema(bars, lookbacks.ema_mid);
        snap.ema50 = trend::calculate_ema(bars, lookbacks.ema_slow);
        snap.rsi14 = momentum::calculate_rsi(bars, lookbacks.rsi);
        snap.atr = volatility::calculate_atr(bars, lookbacks.atr);
        snap.vwap = volume::calculate_vwap(bars);
    }

    if bars.len() >= lookbacks.sma_long {
        snap.sma200 = trend::calculate_sma(bars, lookbacks.sma_long);
    }

    snap
}
