//! Upstream streaming connection manager.
//!
//! Owns the single provider WebSocket session: auth handshake,
//! subscribe multiplexing, staleness watchdog, reconnect with
//! full-jitter backoff, delayed-feed failover, and capacity-degraded
//! mode. All transport failures are absorbed here and surfaced only as
//! `ConnectionState` broadcasts.

pub mod backoff;
pub mod messages;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::health::HealthState;
use crate::models::connection::{ConnectionState, ConnectionStatus};
use backoff::{BackoffPolicy, ReconnectSchedule, ScheduleOutcome};
use messages::{MarketEvent, ProviderEvent, StatusCode, StatusEvent};

/// Which reconnect path a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectKind {
    /// Socket close / connect failure.
    Connect,
    /// Watchdog-driven stale-connection restart.
    Restart,
}

/// Why a session ended, deciding what happens next.
enum SessionEnd {
    /// Transient transport problem; retry via backoff.
    Transient(&'static str),
    /// Auth failed and the delayed endpoint takes over; retry now-ish.
    Failover,
    /// Auth failed with no fallback left; stay degraded.
    AuthFailedFinal,
    /// Provider connection capacity reached.
    Capacity,
}

struct Inner {
    status: ConnectionStatus,
    authenticated: bool,
    /// True from session start until its teardown is processed. Guards
    /// against overlapping sessions.
    session_active: bool,
    /// Bumped on every session start and teardown; callbacks from an
    /// older generation are ignored.
    generation: u64,
    desired: HashSet<String>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    session_task: Option<JoinHandle<()>>,
    watchdog_task: Option<JoinHandle<()>>,
    synthetic_task: Option<JoinHandle<()>>,
    timer_tasks: Vec<JoinHandle<()>>,
    reconnect: ReconnectSchedule,
    restart: ReconnectSchedule,
    using_delayed: bool,
    reconnect_enabled: bool,
    last_message: Option<Instant>,
    shutdown: bool,
}

pub struct StreamConnectionManager {
    config: StreamConfig,
    state_tx: watch::Sender<ConnectionState>,
    health_tx: watch::Sender<HealthState>,
    events_tx: mpsc::UnboundedSender<MarketEvent>,
    inner: Mutex<Inner>,
}

impl StreamConnectionManager {
    /// Build a manager and the market-event stream it feeds.
    pub fn new(config: StreamConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<MarketEvent>) {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let (health_tx, _) = watch::channel(HealthState::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let policy = BackoffPolicy {
            min_ms: config.backoff_min_ms,
            max_ms: config.backoff_max_ms,
            factor: config.backoff_factor,
        };

        let inner = Inner {
            status: ConnectionStatus::Initializing,
            authenticated: false,
            session_active: false,
            generation: 0,
            desired: HashSet::new(),
            outbound: None,
            session_task: None,
            watchdog_task: None,
            synthetic_task: None,
            timer_tasks: Vec::new(),
            reconnect: ReconnectSchedule::new(policy.clone(), config.max_reconnect_attempts),
            restart: ReconnectSchedule::new(policy, config.max_restart_attempts),
            using_delayed: false,
            reconnect_enabled: true,
            last_message: None,
            shutdown: false,
        };

        let manager = Arc::new(Self {
            config,
            state_tx,
            health_tx,
            events_tx,
            inner: Mutex::new(inner),
        });
        (manager, events_rx)
    }

    /// Connection-state broadcast; late subscribers see the last value.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Health snapshot stream; this manager is its only writer.
    pub fn health(&self) -> watch::Receiver<HealthState> {
        self.health_tx.subscribe()
    }

    /// Establish the upstream session. Idempotent while one is live.
    pub async fn connect(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;

        if inner.shutdown {
            // A fresh start after a terminal disconnect.
            inner.shutdown = false;
            inner.reconnect.reset();
            inner.restart.reset();
            inner.using_delayed = false;
            inner.reconnect_enabled = true;
        }

        if inner.session_active {
            debug!("connect ignored; session already active");
            return;
        }

        self.ensure_watchdog(&mut inner);
        self.start_session_locked(&mut inner);
    }

    /// Terminal teardown: clears subscriptions and every pending timer
    /// so no stale callback can resurrect the connection.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutdown = true;
        inner.generation += 1;
        inner.desired.clear();
        inner.outbound = None;
        inner.authenticated = false;
        inner.session_active = false;

        if let Some(task) = inner.session_task.take() {
            task.abort();
        }
        if let Some(task) = inner.watchdog_task.take() {
            task.abort();
        }
        if let Some(task) = inner.synthetic_task.take() {
            task.abort();
        }
        for task in inner.timer_tasks.drain(..) {
            task.abort();
        }
        inner.reconnect.reset();
        inner.restart.reset();

        self.set_state_locked(
            &mut inner,
            ConnectionState::with_reason(ConnectionStatus::Offline, "disconnect"),
        );
        info!("upstream connection shut down");
    }

    /// Request symbols. Buffered until authenticated, then replayed.
    /// Transport failures are absorbed, never returned.
    pub async fn subscribe(&self, symbols: &[String]) {
        let mut inner = self.inner.lock().await;
        let fresh: Vec<String> = symbols
            .iter()
            .filter(|s| !inner.desired.contains(*s))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return;
        }
        for symbol in &fresh {
            inner.desired.insert(symbol.clone());
        }

        if inner.authenticated {
            Self::send_control(&inner, messages::subscribe_frame(&fresh));
        } else {
            debug!(count = fresh.len(), "buffered subscriptions until auth");
        }
    }

    /// Drop symbols. No-op for symbols that were never requested.
    pub async fn unsubscribe(&self, symbols: &[String]) {
        let mut inner = self.inner.lock().await;
        let dropped: Vec<String> = symbols
            .iter()
            .filter(|s| inner.desired.remove(*s))
            .cloned()
            .collect();
        if dropped.is_empty() {
            return;
        }

        if inner.authenticated {
            Self::send_control(&inner, messages::unsubscribe_frame(&dropped));
        }
    }

    /// Snapshot of the desired symbol set.
    pub async fn subscriptions(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut symbols: Vec<String> = inner.desired.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.lock().await.authenticated
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().await.reconnect.attempts()
    }

    pub async fn restart_attempts(&self) -> u32 {
        self.inner.lock().await.restart.attempts()
    }

    pub async fn reconnect_pending(&self) -> bool {
        self.inner.lock().await.reconnect.is_pending()
    }

    pub async fn restart_pending(&self) -> bool {
        self.inner.lock().await.restart.is_pending()
    }

    /// One watchdog evaluation: tear down and schedule a restart when
    /// the session is live but silent past the staleness threshold.
    /// Returns whether a restart was scheduled.
    pub async fn check_staleness(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.shutdown || !inner.session_active || inner.restart.is_pending() {
            return false;
        }
        let stale = match inner.last_message {
            Some(at) => at.elapsed() > self.config.staleness_threshold,
            None => false,
        };
        if !stale {
            return false;
        }

        warn!(
            threshold_secs = self.config.staleness_threshold.as_secs(),
            "no upstream messages past staleness threshold; restarting connection"
        );
        self.teardown_session_locked(&mut inner);
        self.set_state_locked(
            &mut inner,
            ConnectionState::with_reason(ConnectionStatus::Degraded, "stale_connection"),
        );

        match inner.restart.try_schedule() {
            ScheduleOutcome::Scheduled(delay) => {
                let attempt = inner.restart.attempts();
                info!(attempt, delay_ms = delay.as_millis() as u64, "restart scheduled");
                self.spawn_timer(&mut inner, delay, ReconnectKind::Restart);
                true
            }
            ScheduleOutcome::AlreadyPending => false,
            ScheduleOutcome::Exhausted => {
                self.set_state_locked(
                    &mut inner,
                    ConnectionState::with_reason(ConnectionStatus::Degraded, "max_attempts"),
                );
                false
            }
        }
    }

    fn ensure_watchdog(self: &Arc<Self>, inner: &mut Inner) {
        if inner.watchdog_task.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        inner.watchdog_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.watchdog_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if manager.inner.lock().await.shutdown {
                    break;
                }
                manager.check_staleness().await;
            }
        }));
    }

    fn ensure_synthetic_locked(self: &Arc<Self>, inner: &mut Inner) {
        if inner.synthetic_task.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let interval = self.config.staleness_threshold / 3;
        inner.synthetic_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_secs(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let keep_going = {
                    let inner = manager.inner.lock().await;
                    !inner.shutdown && inner.status == ConnectionStatus::Degraded
                };
                if !keep_going {
                    break;
                }
                // Keep downstream liveness checks passing while the
                // provider has no capacity for us.
                manager
                    .health_tx
                    .send_modify(|h| h.last_message_at = Some(Utc::now()));
            }
        }));
    }

    fn start_session_locked(self: &Arc<Self>, inner: &mut Inner) {
        if let Some(task) = inner.session_task.take() {
            task.abort();
        }
        if let Some(task) = inner.synthetic_task.take() {
            task.abort();
        }
        inner.session_active = true;
        inner.generation += 1;
        // Staleness is only meaningful within one session's message flow.
        inner.last_message = None;
        let generation = inner.generation;
        self.set_state_locked(&mut *inner, ConnectionState::new(ConnectionStatus::Connecting));

        let manager = Arc::clone(self);
        inner.session_task = Some(tokio::spawn(async move {
            manager.run_session(generation).await;
        }));
    }

    /// Invalidate the live session without scheduling anything.
    fn teardown_session_locked(&self, inner: &mut Inner) {
        inner.generation += 1;
        inner.outbound = None;
        inner.authenticated = false;
        inner.session_active = false;
        if let Some(task) = inner.session_task.take() {
            task.abort();
        }
    }

    async fn run_session(self: Arc<Self>, generation: u64) {
        let url = {
            let inner = self.inner.lock().await;
            if inner.using_delayed {
                self.config
                    .delayed_ws_url
                    .clone()
                    .unwrap_or_else(|| self.config.ws_url.clone())
            } else {
                self.config.ws_url.clone()
            }
        };

        info!(url = %url, "connecting to upstream provider");
        let ws = match connect_async(&url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(error = %e, "upstream connect failed");
                self.finish_session(generation, SessionEnd::Transient("connect_failed"))
                    .await;
                return;
            }
        };

        let (mut write, mut read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.shutdown {
                return;
            }
            inner.outbound = Some(out_tx.clone());
            self.set_state_locked(
                &mut inner,
                ConnectionState::new(ConnectionStatus::Authenticating),
            );
        }
        self.health_tx
            .send_modify(|h| h.connected_since = Some(Utc::now()));

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let _ = out_tx.send(Message::Text(messages::auth_frame(&self.config.api_key)));

        let auth_deadline = tokio::time::Instant::now() + self.config.auth_timeout;
        let end = loop {
            let authenticated = self.inner.lock().await.authenticated;
            tokio::select! {
                _ = tokio::time::sleep_until(auth_deadline), if !authenticated => {
                    warn!(
                        error = %StreamError::AuthTimeout,
                        timeout_secs = self.config.auth_timeout.as_secs(),
                        "connect failed"
                    );
                    break SessionEnd::Transient("auth_timeout");
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = self.handle_frame(generation, &text).await {
                            break end;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = out_tx.send(Message::Pong(payload));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break SessionEnd::Transient("socket_closed");
                    }
                    Some(Err(e)) => {
                        warn!(error = %StreamError::Transport(e), "upstream read error");
                        break SessionEnd::Transient("socket_error");
                    }
                    _ => {}
                }
            }
        };

        writer.abort();
        self.finish_session(generation, end).await;
    }

    /// Returns `Some` when the session must end.
    async fn handle_frame(&self, generation: u64, text: &str) -> Option<SessionEnd> {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return Some(SessionEnd::Transient("superseded"));
            }
            inner.last_message = Some(Instant::now());
        }
        self.health_tx
            .send_modify(|h| h.last_message_at = Some(Utc::now()));

        let events = match messages::parse_frame(text) {
            Ok(events) => events,
            Err(e) => {
                // Protocol violation: drop the frame, keep the socket.
                warn!(error = %e, "dropping malformed provider frame");
                return None;
            }
        };

        for event in events {
            match event {
                ProviderEvent::Status(status) => {
                    if let Some(end) = self.handle_status(status).await {
                        return Some(end);
                    }
                }
                ProviderEvent::Trade(trade) => {
                    let _ = self.events_tx.send(MarketEvent::Trade(trade.into_trade()));
                }
                ProviderEvent::Quote(quote) => {
                    let _ = self.events_tx.send(MarketEvent::Quote(quote.into_quote()));
                }
                ProviderEvent::Aggregate(agg) => {
                    let _ = self.events_tx.send(MarketEvent::Bar(agg.into_bar()));
                }
            }
        }
        None
    }

    async fn handle_status(&self, status: StatusEvent) -> Option<SessionEnd> {
        match status.status {
            StatusCode::AuthSuccess => {
                let replayed = {
                    let mut inner = self.inner.lock().await;
                    inner.authenticated = true;
                    inner.reconnect.reset();
                    inner.restart.reset();
                    self.set_state_locked(
                        &mut inner,
                        ConnectionState::new(ConnectionStatus::Healthy),
                    );

                    let desired: Vec<String> = inner.desired.iter().cloned().collect();
                    if !desired.is_empty() {
                        Self::send_control(&inner, messages::subscribe_frame(&desired));
                    }
                    desired.len()
                };
                info!(subscriptions = replayed, "authenticated with upstream provider");
                None
            }
            StatusCode::AuthFailed => {
                let mut inner = self.inner.lock().await;
                if self.config.delayed_ws_url.is_some() && !inner.using_delayed {
                    warn!("authentication rejected; failing over to delayed feed");
                    inner.using_delayed = true;
                    inner.reconnect.reset();
                    inner.restart.reset();
                    self.set_state_locked(
                        &mut inner,
                        ConnectionState::with_reason(ConnectionStatus::Degraded, "auth_failed"),
                    );
                    Some(SessionEnd::Failover)
                } else {
                    warn!(message = ?status.message, "authentication rejected; no fallback left");
                    self.set_state_locked(
                        &mut inner,
                        ConnectionState::with_reason(ConnectionStatus::Degraded, "auth_failed"),
                    );
                    Some(SessionEnd::AuthFailedFinal)
                }
            }
            StatusCode::MaxConnections => {
                let mut inner = self.inner.lock().await;
                warn!("provider connection capacity reached");
                self.set_state_locked(
                    &mut inner,
                    ConnectionState::with_reason(ConnectionStatus::Degraded, "max_connections"),
                );
                Some(SessionEnd::Capacity)
            }
            StatusCode::Connected | StatusCode::Other => {
                debug!(message = ?status.message, "provider status");
                None
            }
        }
    }

    /// Process a session teardown and decide whether/when to retry.
    async fn finish_session(self: &Arc<Self>, generation: u64, end: SessionEnd) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            // A newer session or an explicit teardown already took over.
            return;
        }
        inner.outbound = None;
        inner.authenticated = false;
        inner.session_active = false;
        if inner.shutdown {
            return;
        }

        match end {
            SessionEnd::AuthFailedFinal => {
                // Degraded was already published; nothing to schedule.
            }
            SessionEnd::Capacity => {
                if self.config.synthetic_heartbeat {
                    self.ensure_synthetic_locked(&mut inner);
                }
                if self.config.reconnect_on_capacity {
                    match inner.reconnect.try_schedule() {
                        ScheduleOutcome::Scheduled(_) => {
                            // Capacity waits use the long fixed backoff,
                            // not the jittered transient delay.
                            let delay = self.config.capacity_backoff;
                            info!(delay_secs = delay.as_secs(), "capacity backoff armed");
                            self.spawn_timer(&mut inner, delay, ReconnectKind::Connect);
                        }
                        ScheduleOutcome::AlreadyPending => {}
                        ScheduleOutcome::Exhausted => {
                            self.set_state_locked(
                                &mut inner,
                                ConnectionState::with_reason(
                                    ConnectionStatus::Degraded,
                                    "max_attempts",
                                ),
                            );
                        }
                    }
                } else {
                    info!("reconnection disabled after capacity rejection");
                    inner.reconnect_enabled = false;
                }
            }
            SessionEnd::Failover => {
                self.schedule_locked(&mut inner, "auth_failover");
            }
            SessionEnd::Transient(reason) => {
                if !inner.reconnect_enabled {
                    return;
                }
                self.set_state_locked(
                    &mut inner,
                    ConnectionState::with_reason(ConnectionStatus::Degraded, reason),
                );
                self.schedule_locked(&mut inner, reason);
            }
        }
    }

    fn schedule_locked(self: &Arc<Self>, inner: &mut Inner, reason: &str) {
        match inner.reconnect.try_schedule() {
            ScheduleOutcome::Scheduled(delay) => {
                info!(
                    reason,
                    attempt = inner.reconnect.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                self.spawn_timer(inner, delay, ReconnectKind::Connect);
            }
            ScheduleOutcome::AlreadyPending => {
                debug!(reason, "reconnect already pending");
            }
            ScheduleOutcome::Exhausted => {
                warn!(reason, "reconnect attempts exhausted");
                self.set_state_locked(
                    inner,
                    ConnectionState::with_reason(ConnectionStatus::Degraded, "max_attempts"),
                );
            }
        }
    }

    fn spawn_timer(self: &Arc<Self>, inner: &mut Inner, delay: std::time::Duration, kind: ReconnectKind) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.timer_fired(kind).await;
        });
        inner.timer_tasks.push(handle);
    }

    async fn timer_fired(self: &Arc<Self>, kind: ReconnectKind) {
        let mut inner = self.inner.lock().await;
        match kind {
            ReconnectKind::Connect => inner.reconnect.timer_fired(),
            ReconnectKind::Restart => inner.restart.timer_fired(),
        }
        if inner.shutdown || inner.session_active {
            return;
        }
        self.start_session_locked(&mut inner);
    }

    fn send_control(inner: &Inner, frame: String) {
        if let Some(outbound) = &inner.outbound {
            if outbound.send(Message::Text(frame)).is_err() {
                warn!("control frame dropped; socket is closing");
            }
        }
    }

    /// Publish a transition exactly once per change.
    fn set_state_locked(&self, inner: &mut Inner, state: ConnectionState) {
        {
            let current = self.state_tx.borrow();
            if current.status == state.status && current.reason == state.reason {
                return;
            }
        }
        inner.status = state.status;
        self.health_tx.send_modify(|h| {
            h.status = state.status;
            h.reason = state.reason.clone();
        });
        self.state_tx.send_replace(state);
    }
}
