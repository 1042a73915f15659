//! Multi-timeframe bar aggregation.
//!
//! Folds a bounded 1-unit bar buffer into 5-unit and 60-unit OHLCV
//! buffers. Folds recompute from the trailing window each time rather
//! than incrementally; the windows are bounded by the buffer caps.

use std::collections::VecDeque;

use crate::common::math;
use crate::models::market::Bar;

pub const ONE_UNIT_CAPACITY: usize = 500;
pub const FIVE_UNIT_CAPACITY: usize = 200;
pub const SIXTY_UNIT_CAPACITY: usize = 100;

const FIVE_UNIT_SPAN: usize = 5;
const SIXTY_UNIT_SPAN: usize = 60;

/// Per-symbol ring buffers for the three tracked timeframes.
pub struct BarAggregator {
    one_unit: VecDeque<Bar>,
    five_unit: VecDeque<Bar>,
    sixty_unit: VecDeque<Bar>,
    /// Total 1-unit bars ever seen, independent of eviction.
    total_bars: u64,
}

impl BarAggregator {
    pub fn new() -> Self {
        Self {
            one_unit: VecDeque::with_capacity(ONE_UNIT_CAPACITY),
            five_unit: VecDeque::with_capacity(FIVE_UNIT_CAPACITY),
            sixty_unit: VecDeque::with_capacity(SIXTY_UNIT_CAPACITY),
            total_bars: 0,
        }
    }

    /// Append a 1-unit bar, folding into the higher timeframes on every
    /// 5th and 60th bar.
    pub fn push(&mut self, bar: Bar) {
        push_capped(&mut self.one_unit, bar, ONE_UNIT_CAPACITY);
        self.total_bars += 1;

        if self.total_bars % FIVE_UNIT_SPAN as u64 == 0 {
            if let Some(folded) = fold_trailing(&self.one_unit, FIVE_UNIT_SPAN) {
                push_capped(&mut self.five_unit, folded, FIVE_UNIT_CAPACITY);
            }
        }

        if self.total_bars % SIXTY_UNIT_SPAN as u64 == 0 {
            if let Some(folded) = fold_trailing(&self.one_unit, SIXTY_UNIT_SPAN) {
                push_capped(&mut self.sixty_unit, folded, SIXTY_UNIT_CAPACITY);
            }
        }
    }

    pub fn one_unit(&self) -> &VecDeque<Bar> {
        &self.one_unit
    }

    pub fn five_unit(&self) -> &VecDeque<Bar> {
        &self.five_unit
    }

    pub fn sixty_unit(&self) -> &VecDeque<Bar> {
        &self.sixty_unit
    }

    pub fn total_bars(&self) -> u64 {
        self.total_bars
    }

    /// Contiguous copy of the 1-unit series, oldest first.
    pub fn one_unit_slice(&self) -> Vec<Bar> {
        self.one_unit.iter().cloned().collect()
    }

    pub fn five_unit_slice(&self) -> Vec<Bar> {
        self.five_unit.iter().cloned().collect()
    }

    pub fn sixty_unit_slice(&self) -> Vec<Bar> {
        self.sixty_unit.iter().cloned().collect()
    }
}

impl Default for BarAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn push_capped(buffer: &mut VecDeque<Bar>, bar: Bar, capacity: usize) {
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(bar);
}

/// Fold the trailing `span` bars of `source` into a single bar:
/// open of the first, max high, min low, close of the last, summed
/// volume, and volume-weighted typical price across the group. The
/// folded bar carries the first constituent's timestamp.
fn fold_trailing(source: &VecDeque<Bar>, span: usize) -> Option<Bar> {
    if source.len() < span {
        return None;
    }

    let window: Vec<&Bar> = source.iter().skip(source.len() - span).collect();
    let first = window.first()?;
    let last = window.last()?;

    let mut high = f64::MIN;
    let mut low = f64::MAX;
    let mut volume = 0.0;
    let mut weighted = 0.0;

    for bar in &window {
        high = high.max(bar.high);
        low = low.min(bar.low);
        volume += bar.volume;
        weighted += math::typical_price(bar.high, bar.low, bar.close) * bar.volume;
    }

    let mut folded = Bar::new(
        first.symbol.clone(),
        first.timestamp,
        first.open,
        high,
        low,
        last.close,
        volume,
    );
    if volume > 0.0 {
        folded = folded.with_vwap(weighted / volume);
    }
    Some(folded)
}
