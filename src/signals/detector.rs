//! Per-symbol setup detection and lifecycle management.
//!
//! A `SymbolDetector` owns everything for one symbol: the bar buffers,
//! the latest trade/quote, and the setup map. The `SetupEngine` routes
//! events to detectors and is the single writer for all of them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::debug;

use crate::config::DetectorConfig;
use crate::indicators;
use crate::market::BarAggregator;
use crate::models::market::{Bar, Quote, Trade};
use crate::models::setup::{
    Direction, PriceTarget, Setup, SetupAction, SetupEvent, SetupStatus, SetupType,
};
use crate::signals::confluence::{self, ConfluenceInput};
use crate::signals::rules::{self, RuleContext, SetupCandidate};

pub struct SymbolDetector {
    symbol: String,
    config: Arc<DetectorConfig>,
    aggregator: BarAggregator,
    last_trade: Option<Trade>,
    last_quote: Option<Quote>,
    setups: Vec<Setup>,
    next_seq: u64,
    session_date: Option<NaiveDate>,
    session_bar_count: usize,
    opening_range: Option<(f64, f64)>,
}

impl SymbolDetector {
    pub fn new(symbol: impl Into<String>, config: Arc<DetectorConfig>) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            aggregator: BarAggregator::new(),
            last_trade: None,
            last_quote: None,
            setups: Vec::new(),
            next_seq: 0,
            session_date: None,
            session_bar_count: 0,
            opening_range: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn aggregator(&self) -> &BarAggregator {
        &self.aggregator
    }

    pub fn last_trade(&self) -> Option<&Trade> {
        self.last_trade.as_ref()
    }

    pub fn last_quote(&self) -> Option<&Quote> {
        self.last_quote.as_ref()
    }

    /// Ingest a 1-unit bar: advance existing setups on the close,
    /// aggregate, then run detection (unless the volume guard skips it).
    pub fn process_bar(&mut self, bar: Bar) -> Vec<SetupEvent> {
        self.track_session(&bar);

        let mut events = self.update_setups(bar.close);

        let skip_detection = bar.volume < self.config.min_volume;
        self.aggregator.push(bar);

        if skip_detection {
            return events;
        }

        events.extend(self.detect());
        events
    }

    /// Ingest a trade tick: retain it and advance setup lifecycles.
    pub fn process_trade(&mut self, trade: Trade) -> Vec<SetupEvent> {
        let price = trade.price;
        self.last_trade = Some(trade);
        self.update_setups(price)
    }

    /// Ingest a quote. Quotes only refresh the retained snapshot.
    pub fn process_quote(&mut self, quote: Quote) {
        self.last_quote = Some(quote);
    }

    /// Advance every non-terminal setup against a traded price.
    ///
    /// Targets are checked in order and several may fire in one call;
    /// a stop hit closes the setup and `Closed` is never left again.
    pub fn update_setups(&mut self, price: f64) -> Vec<SetupEvent> {
        let mut events = Vec::new();

        for setup in &mut self.setups {
            if setup.status.is_terminal() {
                continue;
            }

            let long = setup.direction == Direction::Long;
            let stop_hit = if long {
                price <= setup.stop
            } else {
                price >= setup.stop
            };

            if stop_hit {
                setup.status = SetupStatus::Closed;
                setup.last_update = Utc::now();
                events.push(SetupEvent::new(SetupAction::Stopped, setup.clone()));
                continue;
            }

            if setup.status == SetupStatus::Forming {
                let entry_crossed = if long {
                    price >= setup.entry
                } else {
                    price <= setup.entry
                };
                if entry_crossed {
                    setup.status = SetupStatus::Active;
                    setup.last_update = Utc::now();
                    events.push(SetupEvent::new(SetupAction::Activated, setup.clone()));
                }
            }

            if setup.status != SetupStatus::Active {
                continue;
            }

            let mut fired = false;
            for target in setup.targets.iter_mut().filter(|t| !t.hit) {
                let reached = if long {
                    price >= target.price
                } else {
                    price <= target.price
                };
                if !reached {
                    break;
                }
                target.hit = true;
                fired = true;
            }

            if fired {
                setup.last_update = Utc::now();
                events.push(SetupEvent::new(SetupAction::TargetHit, setup.clone()));
                if setup.targets.iter().all(|t| t.hit) {
                    setup.status = SetupStatus::Closed;
                    events.push(SetupEvent::new(SetupAction::Closed, setup.clone()));
                }
            }
        }

        events
    }

    /// Externally dismiss a setup. No effect on terminal setups.
    pub fn dismiss(&mut self, id: &str) -> Option<SetupEvent> {
        let setup = self.setups.iter_mut().find(|s| s.id == id)?;
        if setup.status.is_terminal() {
            return None;
        }
        setup.status = SetupStatus::Dismissed;
        setup.last_update = Utc::now();
        Some(SetupEvent::new(SetupAction::Dismissed, setup.clone()))
    }

    /// Snapshot of every non-terminal setup.
    pub fn active_setups(&self) -> Vec<Setup> {
        self.setups
            .iter()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect()
    }

    fn track_session(&mut self, bar: &Bar) {
        let date = bar.timestamp.date_naive();
        if self.session_date != Some(date) {
            self.session_date = Some(date);
            self.session_bar_count = 0;
            self.opening_range = None;
        }

        if self.session_bar_count < self.config.opening_range_bars {
            self.opening_range = Some(match self.opening_range {
                Some((high, low)) => (high.max(bar.high), low.min(bar.low)),
                None => (bar.high, bar.low),
            });
        }
        self.session_bar_count += 1;
    }

    fn detect(&mut self) -> Vec<SetupEvent> {
        let bars = self.aggregator.one_unit_slice();
        let current = match bars.last() {
            Some(bar) => bar.clone(),
            None => return Vec::new(),
        };
        let higher_bars = self.aggregator.five_unit_slice();

        let snapshot = indicators::snapshot(&bars, &self.config.lookbacks);
        let higher_tf = indicators::snapshot(&higher_bars, &self.config.lookbacks);

        // Average volume excludes the current bar so a surge on it is
        // measured against what came before.
        let prior = &bars[..bars.len() - 1];
        let avg_volume = indicators::volume::average_volume(prior, self.config.volume_lookback);

        // The opening range only counts once it is complete.
        let opening_range = if self.session_bar_count >= self.config.opening_range_bars {
            self.opening_range
        } else {
            None
        };

        let ctx = RuleContext {
            bars: &bars,
            current: &current,
            snapshot: &snapshot,
            higher_tf: &higher_tf,
            avg_volume,
            opening_range,
            config: &self.config,
        };

        let candidates = rules::evaluate_rules(&ctx);
        let mut events = Vec::new();

        for cand in candidates {
            let breakdown = confluence::calculate_confluence(
                cand.direction,
                &ConfluenceInput {
                    current: &current,
                    snapshot: &snapshot,
                    higher_tf: &higher_tf,
                    avg_volume,
                    volume_surge_multiple: self.config.volume_surge_multiple,
                },
                &self.config.weights,
            );

            let gate = self.config.rule_gates.for_rule(cand.setup_type);
            if breakdown.present_count() < gate {
                debug!(
                    symbol = %self.symbol,
                    rule = cand.setup_type.label(),
                    present = breakdown.present_count(),
                    gate,
                    "candidate below confluence gate"
                );
                continue;
            }

            events.push(self.upsert_setup(cand, breakdown.present_count() as u32, breakdown.total));
        }

        events
    }

    /// Create a setup for the candidate, or refresh the open one of the
    /// same type and direction instead of stacking duplicates.
    fn upsert_setup(
        &mut self,
        cand: SetupCandidate,
        confluence_score: u32,
        confidence: u32,
    ) -> SetupEvent {
        let now = Utc::now();

        if let Some(existing) = self.setups.iter_mut().find(|s| {
            s.setup_type == cand.setup_type
                && s.direction == cand.direction
                && !s.status.is_terminal()
        }) {
            existing.confluence_score = confluence_score;
            existing.confidence = confidence;
            existing.last_update = now;
            return SetupEvent::new(SetupAction::Updated, existing.clone());
        }

        self.next_seq += 1;
        let setup = Setup {
            id: format!("{}-{}", self.symbol, self.next_seq),
            symbol: self.symbol.clone(),
            setup_type: cand.setup_type,
            status: SetupStatus::Forming,
            direction: cand.direction,
            entry: cand.entry,
            stop: cand.stop,
            targets: cand.targets.into_iter().map(PriceTarget::new).collect(),
            confluence_score,
            confidence,
            created_at: now,
            last_update: now,
        };
        self.setups.push(setup.clone());
        SetupEvent::new(SetupAction::Created, setup)
    }
}

/// Routes market events to per-symbol detectors.
///
/// The engine is owned behind one lock with a single writing task; all
/// accessors return snapshots, never live references.
pub struct SetupEngine {
    config: Arc<DetectorConfig>,
    detectors: HashMap<String, SymbolDetector>,
}

impl SetupEngine {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config: Arc::new(config),
            detectors: HashMap::new(),
        }
    }

    fn detector_mut(&mut self, symbol: &str) -> &mut SymbolDetector {
        let config = self.config.clone();
        self.detectors
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolDetector::new(symbol, config))
    }

    pub fn process_bar(&mut self, bar: Bar) -> Vec<SetupEvent> {
        let symbol = bar.symbol.clone();
        self.detector_mut(&symbol).process_bar(bar)
    }

    pub fn process_trade(&mut self, trade: Trade) -> Vec<SetupEvent> {
        let symbol = trade.symbol.clone();
        self.detector_mut(&symbol).process_trade(trade)
    }

    pub fn process_quote(&mut self, quote: Quote) {
        let symbol = quote.symbol.clone();
        self.detector_mut(&symbol).process_quote(quote);
    }

    pub fn dismiss(&mut self, symbol: &str, id: &str) -> Option<SetupEvent> {
        self.detectors.get_mut(symbol)?.dismiss(id)
    }

    /// Snapshot of non-terminal setups across every symbol.
    pub fn active_setups(&self) -> Vec<Setup> {
        let mut setups: Vec<Setup> = self
            .detectors
            .values()
            .flat_map(|d| d.active_setups())
            .collect();
        setups.sort_by(|a, b| a.id.cmp(&b.id));
        setups
    }

    pub fn active_setups_for(&self, symbol: &str) -> Vec<Setup> {
        self.detectors
            .get(symbol)
            .map(|d| d.active_setups())
            .unwrap_or_default()
    }

    pub fn detector(&self, symbol: &str) -> Option<&SymbolDetector> {
        self.detectors.get(symbol)
    }
}
