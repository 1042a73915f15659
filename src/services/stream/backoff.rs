//! Reconnect backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub min_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
}

impl BackoffPolicy {
    /// Upper bound for attempt `k`: `min(max_ms, min_ms * factor^(k-1))`.
    pub fn cap_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.min_ms as f64 * self.factor.powi(exponent);
        raw.min(self.max_ms as f64) as u64
    }

    /// Full-jitter delay: uniform in `[0, cap_ms(attempt)]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.cap_ms(attempt);
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
    }
}

/// What `try_schedule` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A timer should be armed for this delay.
    Scheduled(Duration),
    /// A timer is already pending; scheduling again is a no-op.
    AlreadyPending,
    /// The bounded attempt count is spent.
    Exhausted,
}

/// Bookkeeping for one reconnect path.
///
/// The manager keeps two of these: one for socket-loss reconnects and
/// one for watchdog restarts, each with its own attempt counter.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    policy: BackoffPolicy,
    max_attempts: u32,
    attempts: u32,
    pending: bool,
}

impl ReconnectSchedule {
    pub fn new(policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts,
            attempts: 0,
            pending: false,
        }
    }

    /// Request a reconnect. Idempotent while a timer is pending.
    pub fn try_schedule(&mut self) -> ScheduleOutcome {
        if self.pending {
            return ScheduleOutcome::AlreadyPending;
        }
        if self.attempts >= self.max_attempts {
            return ScheduleOutcome::Exhausted;
        }
        self.attempts += 1;
        self.pending = true;
        ScheduleOutcome::Scheduled(self.policy.delay(self.attempts))
    }

    /// The armed timer fired (or was torn down).
    pub fn timer_fired(&mut self) {
        self.pending = false;
    }

    /// Successful auth clears the counter and any pending marker.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.pending = false;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}
