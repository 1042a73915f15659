//! Unit tests for multi-timeframe bar aggregation

use chrono::{Duration, TimeZone, Utc};
use scantrix::market::aggregator::{
    BarAggregator, FIVE_UNIT_CAPACITY, ONE_UNIT_CAPACITY,
};
use scantrix::models::market::Bar;

fn feed(aggregator: &mut BarAggregator, count: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
    let mut fed = Vec::with_capacity(count);
    for i in 0..count {
        let price = 100.0 + i as f64 * 0.25;
        let bar = Bar::new(
            "AAA",
            start + Duration::minutes(i as i64),
            price,
            price + 0.6,
            price - 0.4,
            price + 0.2,
            1_000.0 + i as f64,
        );
        fed.push(bar.clone());
        aggregator.push(bar);
    }
    fed
}

#[test]
fn five_unit_count_is_floor_of_total_over_five() {
    let mut aggregator = BarAggregator::new();
    feed(&mut aggregator, 23);
    assert_eq!(aggregator.five_unit().len(), 4);
    assert_eq!(aggregator.sixty_unit().len(), 0);
    assert_eq!(aggregator.one_unit().len(), 23);
}

#[test]
fn folded_bar_matches_its_five_constituents() {
    let mut aggregator = BarAggregator::new();
    let fed = feed(&mut aggregator, 10);

    let folded = aggregator.five_unit_slice();
    assert_eq!(folded.len(), 2);

    for (group_idx, bar) in folded.iter().enumerate() {
        let window = &fed[group_idx * 5..group_idx * 5 + 5];
        let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let volume: f64 = window.iter().map(|b| b.volume).sum();

        assert_eq!(bar.open, window[0].open);
        assert_eq!(bar.close, window[4].close);
        assert!((bar.high - high).abs() < 1e-12);
        assert!((bar.low - low).abs() < 1e-12);
        assert!((bar.volume - volume).abs() < 1e-9);
        assert!(bar.vwap.is_some());
    }
}

#[test]
fn sixty_unit_bar_appears_after_sixty_bars() {
    let mut aggregator = BarAggregator::new();
    let fed = feed(&mut aggregator, 60);

    assert_eq!(aggregator.sixty_unit().len(), 1);
    let hourly = &aggregator.sixty_unit_slice()[0];
    assert_eq!(hourly.open, fed[0].open);
    assert_eq!(hourly.close, fed[59].close);
    let volume: f64 = fed.iter().map(|b| b.volume).sum();
    assert!((hourly.volume - volume).abs() < 1e-9);
}

#[test]
fn buffers_drop_oldest_at_capacity() {
    let mut aggregator = BarAggregator::new();
    // 1,250 bars = 250 five-unit folds, over both the 1-unit and the
    // 5-unit caps.
    feed(&mut aggregator, 1_250);

    assert_eq!(aggregator.one_unit().len(), ONE_UNIT_CAPACITY);
    assert_eq!(aggregator.five_unit().len(), FIVE_UNIT_CAPACITY);
    assert_eq!(aggregator.total_bars(), 1_250);

    // Oldest dropped: the first retained 1-unit bar is bar 750.
    let first = &aggregator.one_unit_slice()[0];
    assert!((first.open - (100.0 + 750.0 * 0.25)).abs() < 1e-9);
}
