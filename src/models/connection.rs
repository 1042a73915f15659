use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the upstream provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Initializing,
    Connecting,
    Authenticating,
    Healthy,
    Degraded,
    Offline,
}

impl ConnectionStatus {
    /// Whether a live socket may exist in this status.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Healthy | ConnectionStatus::Degraded)
    }
}

/// Single mutable value per upstream connection, overwritten and
/// broadcast on every transition (last-value-wins for late subscribers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionState {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_reason(status: ConnectionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(ConnectionStatus::Initializing)
    }
}
