//! EMA / SMA trend indicators.

use crate::common::math;
use crate::models::market::Bar;

/// Calculate EMA of closing prices for a specific period.
pub fn calculate_ema(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period {
        return None;
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    math::ema(&closes, period)
}

/// Calculate multiple EMAs at once.
pub fn calculate_emas(bars: &[Bar], periods: &[usize]) -> Vec<Option<f64>> {
    periods.iter().map(|&p| calculate_ema(bars, p)).collect()
}

/// Calculate SMA of closing prices for a specific period.
pub fn calculate_sma(bars: &[Bar], period: usize) -> Option<f64> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    math::sma(&closes, period)
}

/// Check fast/slow EMA alignment: 1 bullish, -1 bearish, 0 flat.
pub fn ema_alignment(bars: &[Bar], fast: usize, slow: usize) -> Option<i32> {
    let fast_ema = calculate_ema(bars, fast)?;
    let slow_ema = calculate_ema(bars, slow)?;

    if fast_ema > slow_ema {
        Some(1)
    } else if fast_ema < slow_ema {
        Some(-1)
    } else {
        Some(0)
    }
}
