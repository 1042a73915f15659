//! Prometheus metrics, exported at `/metrics`.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub websocket_connected: Gauge,
    pub clients_connected: IntGauge,
    pub bars_processed: IntCounter,
    pub setups_created: IntCounter,
    pub broadcasts_sent: IntCounter,
    pub reconnects_scheduled: IntCounter,
    pub http_requests_total: IntCounter,
    pub http_requests_in_flight: IntGauge,
    pub http_request_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let websocket_connected = Gauge::with_opts(Opts::new(
            "websocket_connected",
            "Whether the upstream provider connection is live (1/0)",
        ))?;
        let clients_connected = IntGauge::with_opts(Opts::new(
            "clients_connected",
            "Number of downstream websocket clients",
        ))?;
        let bars_processed = IntCounter::with_opts(Opts::new(
            "bars_processed_total",
            "1-unit bars ingested by the detection engine",
        ))?;
        let setups_created = IntCounter::with_opts(Opts::new(
            "setups_created_total",
            "Setups created by the detection rules",
        ))?;
        let broadcasts_sent = IntCounter::with_opts(Opts::new(
            "broadcasts_sent_total",
            "Events fanned out to downstream clients",
        ))?;
        let reconnects_scheduled = IntCounter::with_opts(Opts::new(
            "reconnects_scheduled_total",
            "Upstream reconnect attempts scheduled",
        ))?;
        let http_requests_total = IntCounter::with_opts(Opts::new(
            "http_requests_total",
            "HTTP requests received",
        ))?;
        let http_requests_in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "HTTP requests currently being served",
        ))?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency",
        ))?;

        registry.register(Box::new(websocket_connected.clone()))?;
        registry.register(Box::new(clients_connected.clone()))?;
        registry.register(Box::new(bars_processed.clone()))?;
        registry.register(Box::new(setups_created.clone()))?;
        registry.register(Box::new(broadcasts_sent.clone()))?;
        registry.register(Box::new(reconnects_scheduled.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            websocket_connected,
            clients_connected,
            bars_processed,
            setups_created,
            broadcasts_sent,
            reconnects_scheduled,
            http_requests_total,
            http_requests_in_flight,
            http_request_duration_seconds,
        })
    }

    /// Render the registry in the Prometheus text format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
