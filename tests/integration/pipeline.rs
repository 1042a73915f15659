//! End-to-end detection pipeline test
//!
//! Feeds synthetic 1-unit bars through the engine and checks the
//! aggregation, indicator, and detection layers together.

use chrono::{Duration, TimeZone, Utc};
use scantrix::config::DetectorConfig;
use scantrix::indicators;
use scantrix::models::market::Bar;
use scantrix::models::setup::{Direction, SetupAction, SetupStatus, SetupType};
use scantrix::signals::SetupEngine;

/// Ascending tape: each bar closes higher than the last bar's high,
/// with a volume spike on the final bar.
fn ascending_bar(i: usize) -> Bar {
    let start = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
    let price = 100.0 + i as f64;
    let volume = if i == 59 { 5_000.0 } else { 1_000.0 };
    Bar::new(
        "AAA",
        start + Duration::minutes(i as i64),
        price,
        price + 0.6,
        price - 0.2,
        price + 0.5,
        volume,
    )
}

#[tokio::test]
async fn sixty_ascending_bars_produce_an_hourly_bar_and_a_long_setup() {
    let config = DetectorConfig {
        min_volume: 100.0,
        ..DetectorConfig::default()
    };
    let lookbacks = config.lookbacks.clone();
    let mut engine = SetupEngine::new(config);

    let mut created = Vec::new();
    for i in 0..60 {
        for event in engine.process_bar(ascending_bar(i)) {
            if event.action == SetupAction::Created {
                created.push(event.setup);
            }
        }
    }

    // A 60-unit bar exists after the 60th 1-unit bar.
    let detector = engine.detector("AAA").expect("detector for AAA");
    assert_eq!(detector.aggregator().sixty_unit().len(), 1);
    assert_eq!(detector.aggregator().five_unit().len(), 12);

    let hourly = &detector.aggregator().sixty_unit_slice()[0];
    assert_eq!(hourly.open, 100.0);
    assert_eq!(hourly.close, 159.5);
    assert!((hourly.volume - 64_000.0).abs() < 1e-6);

    // The fast average leads the slow one on an ascending tape.
    let bars = detector.aggregator().one_unit_slice();
    let snapshot = indicators::snapshot(&bars, &lookbacks);
    let ema9 = snapshot.ema9.expect("ema9 after 60 bars");
    let ema21 = snapshot.ema21.expect("ema21 after 60 bars");
    assert!(ema9 > ema21);

    // At least one LONG breakout-type setup came out of the tape.
    assert!(!created.is_empty());
    let breakout = created
        .iter()
        .find(|s| s.setup_type == SetupType::RangeBreakout && s.direction == Direction::Long)
        .expect("long breakout setup");
    assert_eq!(breakout.status, SetupStatus::Forming);
    assert!(breakout.confidence <= 100);

    // The same setup shows in the active snapshot.
    let active = engine.active_setups();
    assert!(active.iter().any(|s| s.id == breakout.id));
}

#[tokio::test]
async fn low_volume_bars_never_reach_the_rules() {
    let config = DetectorConfig {
        min_volume: 100_000.0,
        ..DetectorConfig::default()
    };
    let mut engine = SetupEngine::new(config);

    for i in 0..60 {
        let events = engine.process_bar(ascending_bar(i));
        assert!(events.is_empty());
    }

    // Bars still aggregate even when detection is skipped.
    let detector = engine.detector("AAA").expect("detector for AAA");
    assert_eq!(detector.aggregator().one_unit().len(), 60);
    assert_eq!(detector.aggregator().sixty_unit().len(), 1);
    assert!(engine.active_setups().is_empty());
}
