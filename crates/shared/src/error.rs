//! Shared error types for the hub protocol.

use thiserror::Error;

/// Errors raised while encoding or decoding hub protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match the message layout.
    #[error("malformed hub frame: {0}")]
    Malformed(String),

    /// The server answered the handshake with an error.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A frame arrived without the trailing record separator.
    #[error("incomplete hub frame")]
    Incomplete,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed(detail.into())
    }
}

/// Problem raised while parsing a group identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupIdError {
    #[error("unknown group scope in `{0}`")]
    UnknownScope(String),

    #[error("group `{0}` has an empty entity id")]
    EmptyEntity(String),
}
