//! Service health as an explicitly owned, single-writer value.
//!
//! The connection manager is the only writer; everything else reads a
//! `watch::Receiver<HealthState>` snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::connection::ConnectionStatus;

#[derive(Debug, Clone, Serialize)]
pub struct HealthState {
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Initializing,
            reason: None,
            last_message_at: None,
            connected_since: None,
        }
    }
}

impl HealthState {
    /// Seconds since the last upstream message, if any arrived yet.
    pub fn data_age_seconds(&self) -> Option<i64> {
        self.last_message_at
            .map(|at| (Utc::now() - at).num_seconds().max(0))
    }

    pub fn is_ready(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Healthy | ConnectionStatus::Degraded
        )
    }
}
