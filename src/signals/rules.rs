//! Independent setup detection rules.
//!
//! Each rule inspects the current bar series and proposes at most one
//! setup candidate per direction check. Candidates still have to clear
//! the confluence gate before a Setup is created.

use crate::config::DetectorConfig;
use crate::models::indicators::IndicatorSnapshot;
use crate::models::market::Bar;
use crate::models::setup::{Direction, SetupType};

/// Everything a rule may look at for one bar.
pub struct RuleContext<'a> {
    /// 1-unit series including the current bar, oldest first.
    pub bars: &'a [Bar],
    pub current: &'a Bar,
    pub snapshot: &'a IndicatorSnapshot,
    pub higher_tf: &'a IndicatorSnapshot,
    /// Average volume over the configured lookback, excluding the
    /// current bar.
    pub avg_volume: Option<f64>,
    /// Completed session opening range as (high, low).
    pub opening_range: Option<(f64, f64)>,
    pub config: &'a DetectorConfig,
}

/// A proposed setup, pre-confluence.
#[derive(Debug, Clone)]
pub struct SetupCandidate {
    pub setup_type: SetupType,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
}

/// Run every rule against the context.
pub fn evaluate_rules(ctx: &RuleContext<'_>) -> Vec<SetupCandidate> {
    [
        opening_range_breakout(ctx),
        ema_bounce(ctx),
        vwap_cross(ctx),
        ema_cloud(ctx),
        fib_retracement(ctx),
        range_breakout(ctx),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Opening-range breakout confirmed by a "patient candle": the bar
/// before the break must be contained within its predecessor's range.
fn opening_range_breakout(ctx: &RuleContext<'_>) -> Option<SetupCandidate> {
    let (or_high, or_low) = ctx.opening_range?;
    if ctx.bars.len() < 3 {
        return None;
    }

    let prev = &ctx.bars[ctx.bars.len() - 2];
    let before_prev = &ctx.bars[ctx.bars.len() - 3];
    if !prev.contained_within(before_prev) {
        return None;
    }

    let close = ctx.current.close;
    if close > or_high && prev.close <= or_high {
        return Some(candidate(
            ctx,
            SetupType::OpeningRangeBreakout,
            Direction::Long,
            close,
        ));
    }
    if close < or_low && prev.close >= or_low {
        return Some(candidate(
            ctx,
            SetupType::OpeningRangeBreakout,
            Direction::Short,
            close,
        ));
    }
    None
}

/// Pullback into the 9/21 EMA zone that closes back out in trend
/// direction, with the higher timeframe aligned.
fn ema_bounce(ctx: &RuleContext<'_>) -> Option<SetupCandidate> {
    let ema9 = ctx.snapshot.ema9?;
    let ema21 = ctx.snapshot.ema21?;
    let htf9 = ctx.higher_tf.ema9?;
    let htf21 = ctx.higher_tf.ema21?;
    if ctx.bars.len() < 2 {
        return None;
    }

    let prev = &ctx.bars[ctx.bars.len() - 2];
    let close = ctx.current.close;

    if ema9 > ema21 && htf9 > htf21 && prev.low <= ema21 && close > ema9 {
        return Some(candidate(ctx, SetupType::EmaBounce, Direction::Long, close));
    }
    if ema9 < ema21 && htf9 < htf21 && prev.high >= ema21 && close < ema9 {
        return Some(candidate(ctx, SetupType::EmaBounce, Direction::Short, close));
    }
    None
}

/// Cross of the session VWAP that closes within the proximity band.
fn vwap_cross(ctx: &RuleContext<'_>) -> Option<SetupCandidate> {
    let vwap = ctx.snapshot.vwap?;
    if ctx.bars.len() < 2 {
        return None;
    }

    let prev = &ctx.bars[ctx.bars.len() - 2];
    let close = ctx.current.close;
    let band = vwap * ctx.config.vwap_proximity_pct;

    if prev.close <= vwap && close > vwap && close - vwap <= band {
        return Some(candidate(ctx, SetupType::VwapCross, Direction::Long, close));
    }
    if prev.close >= vwap && close < vwap && vwap - close <= band {
        return Some(candidate(ctx, SetupType::VwapCross, Direction::Short, close));
    }
    None
}

/// Price riding just outside a directional 9/21 cloud.
fn ema_cloud(ctx: &RuleContext<'_>) -> Option<SetupCandidate> {
    let ema9 = ctx.snapshot.ema9?;
    let ema21 = ctx.snapshot.ema21?;
    let close = ctx.current.close;

    if ema9 > ema21 && close > ema9 && close - ema9 <= close * ctx.config.cloud_proximity_pct {
        return Some(candidate(ctx, SetupType::EmaCloud, Direction::Long, close));
    }
    if ema9 < ema21 && close < ema9 && ema9 - close <= close * ctx.config.cloud_proximity_pct {
        return Some(candidate(ctx, SetupType::EmaCloud, Direction::Short, close));
    }
    None
}

/// Price sitting at the 0.5 / 0.618 retracement of the latest swing.
fn fib_retracement(ctx: &RuleContext<'_>) -> Option<SetupCandidate> {
    let ema9 = ctx.snapshot.ema9?;
    let ema21 = ctx.snapshot.ema21?;
    let lookback = ctx.config.swing_lookback;
    if ctx.bars.len() < lookback + 1 {
        return None;
    }

    // Swing window excludes the current bar.
    let window = &ctx.bars[ctx.bars.len() - 1 - lookback..ctx.bars.len() - 1];
    let swing_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let swing_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let range = swing_high - swing_low;
    if range <= 0.0 {
        return None;
    }

    let close = ctx.current.close;
    let band = close * ctx.config.fib_proximity_pct;
    let near = |level: f64| (close - level).abs() <= band;

    if ema9 > ema21 {
        let fib50 = swing_high - 0.5 * range;
        let fib618 = swing_high - 0.618 * range;
        if near(fib50) || near(fib618) {
            return Some(candidate(
                ctx,
                SetupType::FibRetracement,
                Direction::Long,
                close,
            ));
        }
    } else if ema9 < ema21 {
        let fib50 = swing_low + 0.5 * range;
        let fib618 = swing_low + 0.618 * range;
        if near(fib50) || near(fib618) {
            return Some(candidate(
                ctx,
                SetupType::FibRetracement,
                Direction::Short,
                close,
            ));
        }
    }
    None
}

/// N-bar breakout/breakdown on above-average volume.
fn range_breakout(ctx: &RuleContext<'_>) -> Option<SetupCandidate> {
    let lookback = ctx.config.breakout_lookback;
    if ctx.bars.len() < lookback + 1 {
        return None;
    }

    let avg = ctx.avg_volume?;
    if avg <= 0.0 || ctx.current.volume < avg * ctx.config.volume_surge_multiple {
        return None;
    }

    let window = &ctx.bars[ctx.bars.len() - 1 - lookback..ctx.bars.len() - 1];
    let prior_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let prior_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let close = ctx.current.close;

    if close > prior_high {
        return Some(candidate(
            ctx,
            SetupType::RangeBreakout,
            Direction::Long,
            close,
        ));
    }
    if close < prior_low {
        return Some(candidate(
            ctx,
            SetupType::RangeBreakout,
            Direction::Short,
            close,
        ));
    }
    None
}

/// Build a candidate with ATR-scaled risk when ATR is available, a
/// percentage heuristic otherwise. The risk denominator is floored so
/// a flat series can never produce a zero-risk setup.
fn candidate(
    ctx: &RuleContext<'_>,
    setup_type: SetupType,
    direction: Direction,
    entry: f64,
) -> SetupCandidate {
    let cfg = ctx.config;
    let raw_risk = match ctx.snapshot.atr {
        Some(atr) => atr * cfg.stop_atr_multiple,
        None => entry.abs() * cfg.fallback_stop_pct,
    };
    let risk = raw_risk.max(entry.abs() * cfg.min_risk_pct);

    let (stop, targets) = match direction {
        Direction::Long => (
            entry - risk,
            cfg.target_multiples
                .iter()
                .map(|m| entry + risk * m)
                .collect(),
        ),
        Direction::Short => (
            entry + risk,
            cfg.target_multiples
                .iter()
                .map(|m| entry - risk * m)
                .collect(),
        ),
    };

    SetupCandidate {
        setup_type,
        direction,
        entry,
        stop,
        targets,
    }
}
