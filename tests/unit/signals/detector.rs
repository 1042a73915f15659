//! Unit tests for setup lifecycle management

use chrono::{Duration, TimeZone, Utc};
use scantrix::config::DetectorConfig;
use scantrix::models::market::{Bar, Trade};
use scantrix::models::setup::{Direction, SetupAction, SetupStatus, SetupType};
use scantrix::signals::SetupEngine;

fn breakout_bar(i: usize, volume: f64) -> Bar {
    let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
    let price = 100.0 + i as f64;
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

fn trade(price: f64) -> Trade {
    Trade {
        symbol: "AAA".to_string(),
        timestamp: Utc::now(),
        price,
        size: 10.0,
    }
}

fn detector_config(min_volume: f64) -> DetectorConfig {
    DetectorConfig {
        min_volume,
        ..DetectorConfig::default()
    }
}

/// Feed the 60-bar ascending breakout series and return the engine.
fn engine_with_breakout(min_volume: f64) -> SetupEngine {
    let mut engine = SetupEngine::new(detector_config(min_volume));
    for i in 0..60 {
        let volume = if i == 59 { 5_000.0 } else { 1_000.0 };
        engine.process_bar(breakout_bar(i, volume));
    }
    engine
}

#[test]
fn breakout_series_creates_a_forming_long_setup() {
    let engine = engine_with_breakout(100.0);
    let setups = engine.active_setups();
    assert_eq!(setups.len(), 1);

    let setup = &setups[0];
    assert_eq!(setup.setup_type, SetupType::RangeBreakout);
    assert_eq!(setup.direction, Direction::Long);
    assert_eq!(setup.status, SetupStatus::Forming);
    assert_eq!(setup.symbol, "AAA");
    assert_eq!(setup.id, "AAA-1");
    assert!(setup.confidence <= 100);
    assert!(setup.confluence_score >= 3);
    assert!(setup.stop < setup.entry);
}

#[test]
fn lifecycle_advances_forming_active_closed() {
    let mut engine = engine_with_breakout(100.0);
    let entry = engine.active_setups()[0].entry;
    let stop = engine.active_setups()[0].stop;
    let first_target = engine.active_setups()[0].targets[0].price;

    // Cross the entry.
    let events = engine.process_trade(trade(entry + 0.1));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, SetupAction::Activated);
    assert_eq!(events[0].setup.status, SetupStatus::Active);

    // First target fires; the later ones stay unhit.
    let events = engine.process_trade(trade(first_target + 0.05));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, SetupAction::TargetHit);
    assert!(events[0].setup.targets[0].hit);
    assert!(!events[0].setup.targets[1].hit);

    // Stop hit is terminal.
    let events = engine.process_trade(trade(stop - 1.0));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, SetupAction::Stopped);
    assert_eq!(events[0].setup.status, SetupStatus::Closed);
    assert!(engine.active_setups().is_empty());

    // A later rally never reopens a closed setup.
    let events = engine.process_trade(trade(entry + 50.0));
    assert!(events.is_empty());
    assert!(engine.active_setups().is_empty());
}

#[test]
fn all_targets_hit_closes_the_setup() {
    let mut engine = engine_with_breakout(100.0);
    let last_target = engine.active_setups()[0]
        .targets
        .last()
        .unwrap()
        .price;

    // One trade through everything: activation plus all three targets.
    let events = engine.process_trade(trade(last_target + 1.0));
    let actions: Vec<SetupAction> = events.iter().map(|e| e.action).collect();
    assert!(actions.contains(&SetupAction::Activated));
    assert!(actions.contains(&SetupAction::TargetHit));
    assert!(actions.contains(&SetupAction::Closed));
    assert!(engine.active_setups().is_empty());
}

#[test]
fn dismissed_setups_leave_the_active_view() {
    let mut engine = engine_with_breakout(100.0);
    let id = engine.active_setups()[0].id.clone();

    let event = engine.dismiss("AAA", &id).expect("dismiss event");
    assert_eq!(event.action, SetupAction::Dismissed);
    assert!(engine.active_setups().is_empty());

    // Dismissal is terminal too.
    assert!(engine.dismiss("AAA", &id).is_none());
}

#[test]
fn volume_guard_skips_detection_entirely() {
    // Same tape, but the breakout bar is under the volume floor.
    let engine = engine_with_breakout(10_000.0);
    assert!(engine.active_setups().is_empty());
}

#[test]
fn repeated_signal_updates_instead_of_duplicating() {
    let mut engine = SetupEngine::new(detector_config(100.0));
    for i in 0..60 {
        let volume = if i == 59 { 5_000.0 } else { 1_000.0 };
        engine.process_bar(breakout_bar(i, volume));
    }
    // Another surging breakout bar right after.
    let events = engine.process_bar(breakout_bar(60, 6_000.0));
    assert!(events
        .iter()
        .any(|e| e.action == SetupAction::Updated || e.action == SetupAction::Activated));
    assert_eq!(engine.active_setups().len(), 1);
}
