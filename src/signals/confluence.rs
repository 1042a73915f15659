//! Weighted confluence scoring.
//!
//! A fixed, ordered list of boolean factors is evaluated against a
//! direction hypothesis; confidence is the sum of the present factors'
//! weights, capped at 100.

use serde::{Deserialize, Serialize};

use crate::models::indicators::IndicatorSnapshot;
use crate::models::market::Bar;
use crate::models::setup::Direction;

/// Static factor weight table. The weights sum to 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorWeights {
    pub trend_alignment: u32,
    pub higher_tf_trend: u32,
    pub momentum_regime: u32,
    pub vwap_side: u32,
    pub volume_surge: u32,
    pub long_ma_side: u32,
    pub candle_strength: u32,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            trend_alignment: 20,
            higher_tf_trend: 15,
            momentum_regime: 15,
            vwap_side: 15,
            volume_surge: 15,
            long_ma_side: 10,
            candle_strength: 10,
        }
    }
}

impl FactorWeights {
    pub fn total(&self) -> u32 {
        self.trend_alignment
            + self.higher_tf_trend
            + self.momentum_regime
            + self.vwap_side
            + self.volume_surge
            + self.long_ma_side
            + self.candle_strength
    }

    /// The table must not be able to score above the confidence cap.
    pub fn verify(&self) -> bool {
        self.total() <= 100
    }
}

/// A named boolean signal contributing to setup confidence.
#[derive(Debug, Clone, Serialize)]
pub struct ConfluenceFactor {
    pub name: &'static str,
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub weight: u32,
}

/// Scoring result: per-factor detail plus the capped total.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceBreakdown {
    pub factors: Vec<ConfluenceFactor>,
    pub total: u32,
}

impl ConfidenceBreakdown {
    pub fn present_count(&self) -> usize {
        self.factors.iter().filter(|f| f.present).count()
    }
}

/// Everything the factor list needs from the detector.
pub struct ConfluenceInput<'a> {
    pub current: &'a Bar,
    pub snapshot: &'a IndicatorSnapshot,
    pub higher_tf: &'a IndicatorSnapshot,
    /// Average volume over the configured lookback, excluding the
    /// current bar.
    pub avg_volume: Option<f64>,
    pub volume_surge_multiple: f64,
}

/// Evaluate the fixed factor list for a direction hypothesis.
///
/// Each factor marks present/absent independently; a factor whose
/// inputs are unavailable is absent.
pub fn calculate_confluence(
    direction: Direction,
    input: &ConfluenceInput<'_>,
    weights: &FactorWeights,
) -> ConfidenceBreakdown {
    let bar = input.current;
    let snap = input.snapshot;
    let long = direction == Direction::Long;

    let mut factors = Vec::with_capacity(7);

    factors.push(pair_factor(
        "trend_alignment",
        weights.trend_alignment,
        long,
        snap.ema9,
        snap.ema21,
    ));

    factors.push(pair_factor(
        "higher_tf_trend",
        weights.higher_tf_trend,
        long,
        input.higher_tf.ema9,
        input.higher_tf.ema21,
    ));

    // Momentum regime: directional strength without exhaustion.
    let momentum = match snap.rsi14 {
        Some(rsi) => {
            let present = if long {
                rsi > 50.0 && rsi < 80.0
            } else {
                rsi > 20.0 && rsi < 50.0
            };
            ConfluenceFactor {
                name: "momentum_regime",
                present,
                value: Some(rsi),
                weight: weights.momentum_regime,
            }
        }
        None => absent("momentum_regime", weights.momentum_regime),
    };
    factors.push(momentum);

    let vwap_side = match snap.vwap {
        Some(vwap) => ConfluenceFactor {
            name: "vwap_side",
            present: if long { bar.close > vwap } else { bar.close < vwap },
            value: Some(bar.close - vwap),
            weight: weights.vwap_side,
        },
        None => absent("vwap_side", weights.vwap_side),
    };
    factors.push(vwap_side);

    let volume_surge = match input.avg_volume {
        Some(avg) if avg > 0.0 => {
            let ratio = bar.volume / avg;
            ConfluenceFactor {
                name: "volume_surge",
                present: ratio >= input.volume_surge_multiple,
                value: Some(ratio),
                weight: weights.volume_surge,
            }
        }
        _ => absent("volume_surge", weights.volume_surge),
    };
    factors.push(volume_surge);

    let long_ma_side = match snap.sma200 {
        Some(sma) => ConfluenceFactor {
            name: "long_ma_side",
            present: if long { bar.close > sma } else { bar.close < sma },
            value: Some(bar.close - sma),
            weight: weights.long_ma_side,
        },
        None => absent("long_ma_side", weights.long_ma_side),
    };
    factors.push(long_ma_side);

    // Close location within the bar's range.
    let range = bar.range();
    let candle_strength = if range > 0.0 {
        let position = (bar.close - bar.low) / range;
        ConfluenceFactor {
            name: "candle_strength",
            present: if long { position >= 0.66 } else { position <= 0.34 },
            value: Some(position),
            weight: weights.candle_strength,
        }
    } else {
        absent("candle_strength", weights.candle_strength)
    };
    factors.push(candle_strength);

    let sum: u32 = factors.iter().filter(|f| f.present).map(|f| f.weight).sum();
    ConfidenceBreakdown {
        factors,
        total: sum.min(100),
    }
}

fn pair_factor(
    name: &'static str,
    weight: u32,
    long: bool,
    fast: Option<f64>,
    slow: Option<f64>,
) -> ConfluenceFactor {
    match (fast, slow) {
        (Some(fast), Some(slow)) => ConfluenceFactor {
            name,
            present: if long { fast > slow } else { fast < slow },
            value: Some(fast - slow),
            weight,
        },
        _ => absent(name, weight),
    }
}

fn absent(name: &'static str, weight: u32) -> ConfluenceFactor {
    ConfluenceFactor {
        name,
        present: false,
        value: None,
        weight,
    }
}
