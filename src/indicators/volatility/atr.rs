//! ATR (Average True Range) indicator.

use crate::common::math;
use crate::models::market::Bar;

/// Calculate ATR: the true range averaged over the trailing `period` bars.
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let mut tr_values = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        tr_values.push(math::true_range(
            bars[i].high,
            bars[i].low,
            bars[i - 1].close,
        ));
    }

    math::sma(&tr_values, period)
}

/// Calculate ATR with the default period (14).
pub fn calculate_atr_default(bars: &[Bar]) -> Option<f64> {
    calculate_atr(bars, 14)
}
