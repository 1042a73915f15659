//! Environment-driven configuration.
//!
//! Values load from the process environment (`.env` honored by the
//! binaries via `dotenvy`). A missing provider credential fails
//! construction; everything else has a sensible default.

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::indicators::IndicatorLookbacks;
use crate::models::setup::SetupType;
use crate::signals::confluence::FactorWeights;

/// Deployment environment name, used to pick log formatting.
pub fn get_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string())
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

fn env_csv(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    /// Fallback delayed feed tried once after an auth failure.
    pub delayed_ws_url: Option<String>,
    pub api_key: String,
    pub auth_timeout: Duration,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: f64,
    pub max_reconnect_attempts: u32,
    pub max_restart_attempts: u32,
    pub watchdog_interval: Duration,
    pub staleness_threshold: Duration,
    /// Long backoff applied after a provider capacity rejection.
    pub capacity_backoff: Duration,
    /// Whether to keep retrying after a capacity rejection at all.
    pub reconnect_on_capacity: bool,
    /// Keep liveness checks passing while capacity-degraded.
    pub synthetic_heartbeat: bool,
}

impl StreamConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("PROVIDER_API_KEY")
            .map_err(|_| ConfigError::MissingVar("PROVIDER_API_KEY"))?;

        let ws_url = env_string("PROVIDER_WS_URL", "wss://socket.polygon.io/stocks");
        Url::parse(&ws_url).map_err(|source| ConfigError::InvalidUrl {
            url: ws_url.clone(),
            source,
        })?;

        let delayed_ws_url = env::var("PROVIDER_DELAYED_WS_URL").ok();
        if let Some(ref url) = delayed_ws_url {
            Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
                url: url.clone(),
                source,
            })?;
        }

        let backoff_factor = env_f64("STREAM_BACKOFF_FACTOR", 2.0);
        if backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_BACKOFF_FACTOR",
                value: backoff_factor.to_string(),
            });
        }

        Ok(Self {
            ws_url,
            delayed_ws_url,
            api_key,
            auth_timeout: Duration::from_secs(env_u64("STREAM_AUTH_TIMEOUT_SECS", 10)),
            backoff_min_ms: env_u64("STREAM_BACKOFF_MIN_MS", 1_000),
            backoff_max_ms: env_u64("STREAM_BACKOFF_MAX_MS", 30_000),
            backoff_factor,
            max_reconnect_attempts: env_u32("STREAM_MAX_RECONNECT_ATTEMPTS", 10),
            max_restart_attempts: env_u32("STREAM_MAX_RESTART_ATTEMPTS", 10),
            watchdog_interval: Duration::from_secs(env_u64("STREAM_WATCHDOG_SECS", 20)),
            staleness_threshold: Duration::from_secs(env_u64("STREAM_STALENESS_SECS", 90)),
            capacity_backoff: Duration::from_secs(env_u64("STREAM_CAPACITY_BACKOFF_SECS", 300)),
            reconnect_on_capacity: env_bool("STREAM_RECONNECT_ON_CAPACITY", true),
            synthetic_heartbeat: env_bool("STREAM_SYNTHETIC_HEARTBEAT", true),
        })
    }
}

/// Minimum present-factor counts per detection rule.
///
/// These are per-rule settings on purpose; the rules were tuned
/// independently and do not share one global threshold.
#[derive(Debug, Clone)]
pub struct RuleGates {
    pub opening_range_breakout: usize,
    pub ema_bounce: usize,
    pub vwap_cross: usize,
    pub ema_cloud: usize,
    pub fib_retracement: usize,
    pub range_breakout: usize,
}

impl Default for RuleGates {
    fn default() -> Self {
        Self {
            opening_range_breakout: 3,
            ema_bounce: 3,
            vwap_cross: 2,
            ema_cloud: 2,
            fib_retracement: 2,
            range_breakout: 3,
        }
    }
}

impl RuleGates {
    pub fn for_rule(&self, setup_type: SetupType) -> usize {
        match setup_type {
            SetupType::OpeningRangeBreakout => self.opening_range_breakout,
            SetupType::EmaBounce => self.ema_bounce,
            SetupType::VwapCross => self.vwap_cross,
            SetupType::EmaCloud => self.ema_cloud,
            SetupType::FibRetracement => self.fib_retracement,
            SetupType::RangeBreakout => self.range_breakout,
        }
    }
}

/// Detection engine settings.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Bars under this volume skip rule evaluation entirely.
    pub min_volume: f64,
    pub lookbacks: IndicatorLookbacks,
    pub volume_lookback: usize,
    pub volume_surge_multiple: f64,
    pub swing_lookback: usize,
    pub breakout_lookback: usize,
    pub opening_range_bars: usize,
    pub vwap_proximity_pct: f64,
    pub fib_proximity_pct: f64,
    pub cloud_proximity_pct: f64,
    pub stop_atr_multiple: f64,
    pub fallback_stop_pct: f64,
    /// Floor applied to the risk denominator.
    pub min_risk_pct: f64,
    pub target_multiples: Vec<f64>,
    pub weights: FactorWeights,
    pub rule_gates: RuleGates,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_volume: 1_000.0,
            lookbacks: IndicatorLookbacks::default(),
            volume_lookback: 20,
            volume_surge_multiple: 1.5,
            swing_lookback: 10,
            breakout_lookback: 20,
            opening_range_bars: 6,
            vwap_proximity_pct: 0.003,
            fib_proximity_pct: 0.003,
            cloud_proximity_pct: 0.005,
            stop_atr_multiple: 1.5,
            fallback_stop_pct: 0.005,
            min_risk_pct: 0.001,
            target_multiples: vec![1.0, 2.0, 3.0],
            weights: FactorWeights::default(),
            rule_gates: RuleGates::default(),
        }
    }
}

impl DetectorConfig {
    pub fn from_env() -> Self {
        Self {
            min_volume: env_f64("DETECTOR_MIN_VOLUME", 1_000.0),
            volume_lookback: env_usize("DETECTOR_VOLUME_LOOKBACK", 20),
            volume_surge_multiple: env_f64("DETECTOR_VOLUME_SURGE_MULTIPLE", 1.5),
            swing_lookback: env_usize("DETECTOR_SWING_LOOKBACK", 10),
            breakout_lookback: env_usize("DETECTOR_BREAKOUT_LOOKBACK", 20),
            opening_range_bars: env_usize("DETECTOR_OPENING_RANGE_BARS", 6),
            vwap_proximity_pct: env_f64("DETECTOR_VWAP_PROXIMITY_PCT", 0.003),
            fib_proximity_pct: env_f64("DETECTOR_FIB_PROXIMITY_PCT", 0.003),
            cloud_proximity_pct: env_f64("DETECTOR_CLOUD_PROXIMITY_PCT", 0.005),
            stop_atr_multiple: env_f64("DETECTOR_STOP_ATR_MULTIPLE", 1.5),
            ..Self::default()
        }
    }
}

/// Downstream fan-out settings.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    /// Allowed `Origin` values; empty list allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            allowed_origins: Vec::new(),
        }
    }
}

impl FanoutConfig {
    pub fn from_env() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(env_u64("FANOUT_HEARTBEAT_SECS", 15)),
            idle_timeout: Duration::from_secs(env_u64("FANOUT_IDLE_TIMEOUT_SECS", 60)),
            allowed_origins: env_csv("FANOUT_ALLOWED_ORIGINS"),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub http_port: u16,
    /// Symbols subscribed at startup, before any client asks.
    pub symbols: Vec<String>,
    pub stream: StreamConfig,
    pub detector: DetectorConfig,
    pub fanout: FanoutConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: get_environment(),
            http_port: env_u16("HTTP_PORT", 8080),
            symbols: env_csv("SYMBOLS"),
            stream: StreamConfig::from_env()?,
            detector: DetectorConfig::from_env(),
            fanout: FanoutConfig::from_env(),
        })
    }
}
