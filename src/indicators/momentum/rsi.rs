//! RSI (Relative Strength Index) indicator.

use crate::models::market::Bar;

/// Calculate RSI over the trailing `period` close-to-close deltas.
///
/// RSI = 100 - (100 / (1 + RS)), RS = average gain / average loss.
/// Average loss of zero yields 100; average gain of zero yields 0.
pub fn calculate_rsi(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;

    let start = bars.len() - period;
    for i in start..bars.len() {
        let change = bars[i].close - bars[i - 1].close;
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    if avg_gain == 0.0 {
        return Some(0.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Calculate RSI with the default period (14).
pub fn calculate_rsi_default(bars: &[Bar]) -> Option<f64> {
    calculate_rsi(bars, 14)
}
