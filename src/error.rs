//! Error taxonomy for the streaming core.

use thiserror::Error;

/// Construction-time configuration failures. Fatal, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid endpoint url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Upstream transport and protocol failures. Absorbed inside the
/// connection manager and converted to state-change events; never
/// surfaced from `subscribe`/`unsubscribe`.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("authentication timed out")]
    AuthTimeout,
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed provider frame: {0}")]
    Protocol(String),
}
