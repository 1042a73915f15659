//! Trade setup entities and lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction hypothesis for a setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

/// Which detection rule produced the setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupType {
    OpeningRangeBreakout,
    EmaBounce,
    VwapCross,
    EmaCloud,
    FibRetracement,
    RangeBreakout,
}

impl SetupType {
    pub fn label(&self) -> &'static str {
        match self {
            SetupType::OpeningRangeBreakout => "opening_range_breakout",
            SetupType::EmaBounce => "ema_bounce",
            SetupType::VwapCross => "vwap_cross",
            SetupType::EmaCloud => "ema_cloud",
            SetupType::FibRetracement => "fib_retracement",
            SetupType::RangeBreakout => "range_breakout",
        }
    }
}

/// Setup lifecycle. `Closed` is terminal; `Dismissed` is an external exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupStatus {
    #[serde(rename = "SETUP_FORMING")]
    Forming,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "DISMISSED")]
    Dismissed,
}

impl SetupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SetupStatus::Closed | SetupStatus::Dismissed)
    }
}

/// A price objective. `hit` flips once and stays set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTarget {
    pub price: f64,
    pub hit: bool,
}

impl PriceTarget {
    pub fn new(price: f64) -> Self {
        Self { price, hit: false }
    }
}

/// A detected candidate trade opportunity.
///
/// Identity is `(symbol, per-symbol monotonic counter)`; the entity is
/// mutated in place on price updates and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    pub id: String,
    pub symbol: String,
    pub setup_type: SetupType,
    pub status: SetupStatus,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<PriceTarget>,
    /// Number of confluence factors present at detection time.
    pub confluence_score: u32,
    /// Sum of the present factors' weights, capped at 100.
    pub confidence: u32,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Setup {
    /// Risk per unit implied by entry/stop.
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop).abs()
    }
}

/// What happened to a setup, for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupAction {
    /// Initial-state replay for a newly connected client.
    Snapshot,
    Created,
    Updated,
    Activated,
    TargetHit,
    Stopped,
    Closed,
    Dismissed,
}

/// Lifecycle event broadcast to the fan-out layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupEvent {
    pub action: SetupAction,
    pub setup: Setup,
}

impl SetupEvent {
    pub fn new(action: SetupAction, setup: Setup) -> Self {
        Self { action, setup }
    }
}
