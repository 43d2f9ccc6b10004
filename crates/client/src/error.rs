//! Error handling for the real-time client.

use clinicsync_shared::{GroupId, ProtocolError};
use thiserror::Error;

/// Result type used throughout the client.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors surfaced by explicit client operations.
///
/// Connection-level failures (drops, reconnect attempts) are logged and drive
/// state transitions; they only reach callers through these variants when an
/// operation such as `invoke` or `subscribe_to_group` needed the connection.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// No connection could be constructed, e.g. no access token is available.
    #[error("real-time connection unavailable: {reason}")]
    ConnectionUnavailable { reason: String },

    /// Joining a group failed on every attempt.
    #[error("subscribing to {group} failed after {attempts} attempt(s): {source}")]
    SubscriptionFailed {
        group: GroupId,
        attempts: u32,
        #[source]
        source: Box<RealtimeError>,
    },

    /// Leaving a group failed while connected.
    #[error("unsubscribing from {group} failed: {source}")]
    UnsubscriptionFailed {
        group: GroupId,
        #[source]
        source: Box<RealtimeError>,
    },

    /// The transport could not be opened or failed while in use.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The connection closed before the operation completed.
    #[error("connection closed{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionClosed { reason: Option<String> },

    /// The hub answered an invocation with an error.
    #[error("remote call `{method}` failed: {message}")]
    Remote { method: String, message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {message}")]
    Config { message: String },

    /// The manager was disposed.
    #[error("connection manager disposed")]
    Disposed,
}

impl RealtimeError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ConnectionUnavailable {
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    pub fn remote(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport(e.to_string())
    }
}
