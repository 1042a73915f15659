//! Session VWAP.

use crate::common::math;
use crate::models::market::Bar;

/// Volume-weighted typical price accumulated across the supplied bars.
///
/// Returns `None` when the group carries no volume.
pub fn calculate_vwap(bars: &[Bar]) -> Option<f64> {
    let mut weighted = 0.0;
    let mut volume = 0.0;

    for bar in bars {
        weighted += math::typical_price(bar.high, bar.low, bar.close) * bar.volume;
        volume += bar.volume;
    }

    if volume == 0.0 {
        return None;
    }
    Some(weighted / volume)
}

/// Average volume over the trailing `period` bars.
pub fn average_volume(bars: &[Bar], period: usize) -> Option<f64> {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    math::sma(&volumes, period)
}
