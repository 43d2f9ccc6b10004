//! Hub connection types and the transport seam.
//!
//! This module provides the shared types and the tokio-tungstenite
//! WebSocket implementation. The manager only talks to [`HubTransport`] and
//! [`HubSession`], so tests can substitute an in-memory transport.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::RealtimeResult;

/// Connection state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// A message pushed by the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Server-to-client invocation of `target`.
    Invocation { target: String, arguments: Vec<Value> },
    /// The server announced it is closing the connection.
    Closing { error: Option<String> },
}

/// An open hub session.
#[async_trait]
pub trait HubSession: Send + Sync + 'static {
    /// Call a hub method and await its completion.
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RealtimeResult<Value>;

    /// Close the session gracefully.
    async fn close(&self) -> RealtimeResult<()>;
}

/// A freshly opened connection.
///
/// `inbound` yields server pushes until the connection is lost; the stream
/// ending is how connection loss is reported.
pub struct HubConnection {
    pub session: Arc<dyn HubSession>,
    pub inbound: UnboundedReceiver<InboundMessage>,
}

/// Opens hub connections.
#[async_trait]
pub trait HubTransport: Send + Sync + 'static {
    /// Open a connection to `endpoint`, authenticating with `access_token`.
    async fn connect(&self, endpoint: &str, access_token: &str) -> RealtimeResult<HubConnection>;
}

mod connection_native;
pub use connection_native::WebSocketTransport;
