//! Native WebSocket hub transport using tokio-tungstenite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clinicsync_shared::hub_protocol::{self, HubMessage};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

use super::{HubConnection, HubSession, HubTransport, InboundMessage};
use crate::error::{RealtimeError, RealtimeResult};

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

type PendingMap = Arc<Mutex<HashMap<String, PendingInvocation>>>;

struct PendingInvocation {
    method: String,
    reply_tx: oneshot::Sender<RealtimeResult<Value>>,
}

/// Opens hub sessions over WebSocket using the JSON hub protocol.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    keep_alive_interval: Duration,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Set the interval between keep-alive pings.
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the socket URL: `http(s)` becomes `ws(s)` and the token is appended
/// as the `access_token` query parameter.
pub fn build_socket_url(endpoint: &str, access_token: &str) -> RealtimeResult<String> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| RealtimeError::config(format!("invalid hub endpoint `{endpoint}`: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::config(format!(
                "unsupported hub endpoint scheme `{other}`"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::config(format!("cannot use scheme `{scheme}`")))?;

    let separator = if url.query().is_some() { '&' } else { '?' };
    Ok(format!(
        "{}{}access_token={}",
        url,
        separator,
        urlencoding::encode(access_token)
    ))
}

#[async_trait]
impl HubTransport for WebSocketTransport {
    async fn connect(&self, endpoint: &str, access_token: &str) -> RealtimeResult<HubConnection> {
        let url = build_socket_url(endpoint, access_token)?;
        let connection_id = Uuid::new_v4();
        crate::log_debug!("Opening hub connection {} to {}", connection_id, endpoint);

        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::text(hub_protocol::handshake_request()))
            .await?;

        // The first text message carries the handshake reply, possibly
        // followed by regular frames.
        let leftover = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    break hub_protocol::parse_handshake_response(text.as_str())?.to_string();
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(RealtimeError::closed(
                        frame.map(|f| f.reason.to_string()),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(RealtimeError::closed(None)),
            }
        };

        crate::log_info!("Hub connection {} established", connection_id);

        let (out_tx, out_rx) = unbounded::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // Spawn write task
        let keep_alive = self.keep_alive_interval;
        tokio::spawn(async move {
            let mut out_rx: UnboundedReceiver<Message> = out_rx;
            let mut ping_interval = tokio::time::interval(keep_alive);
            ping_interval.tick().await;

            loop {
                let msg = tokio::select! {
                    msg = out_rx.next() => msg,
                    _ = ping_interval.tick() => {
                        match hub_protocol::encode(&HubMessage::Ping) {
                            Ok(frame) => Some(Message::text(frame)),
                            Err(_) => continue,
                        }
                    }
                };

                match msg {
                    Some(msg) => {
                        let is_close = matches!(msg, Message::Close(_));
                        if let Err(e) = write.send(msg).await {
                            crate::log_debug!("Hub connection {} send failed: {}", connection_id, e);
                            break;
                        }
                        if is_close {
                            break;
                        }
                    }
                    None => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        });

        // Spawn read task
        let session_pending = pending.clone();
        let session_closed = closed.clone();
        let read_out_tx = out_tx.clone();
        tokio::spawn(async move {
            let mut reader = FrameRouter {
                connection_id,
                pending: session_pending,
                inbound_tx,
            };

            let mut open = reader.route_text(&leftover);
            while open {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => open = reader.route_text(text.as_str()),
                    Some(Ok(Message::Close(_))) => {
                        crate::log_info!("Hub connection {} received close frame", connection_id);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, ping and pong frames carry nothing for us
                    }
                    Some(Err(e)) => {
                        crate::log_warn!("Hub connection {} read error: {}", connection_id, e);
                        break;
                    }
                    None => break,
                }
            }

            session_closed.store(true, Ordering::SeqCst);
            reader.fail_pending();
            read_out_tx.close_channel();
            crate::log_info!("Hub connection {} closed", connection_id);
        });

        let session = NativeSession {
            connection_id,
            outgoing: out_tx,
            pending,
            next_id: AtomicU64::new(1),
            closed,
        };

        Ok(HubConnection {
            session: Arc::new(session),
            inbound: inbound_rx,
        })
    }
}

/// Routes decoded frames to pending invocations or the inbound stream.
struct FrameRouter {
    connection_id: Uuid,
    pending: PendingMap,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
}

impl FrameRouter {
    /// Returns `false` once the server closed the session.
    fn route_text(&mut self, text: &str) -> bool {
        for frame in hub_protocol::decode_frames(text) {
            let message = match frame {
                Ok(message) => message,
                Err(e) => {
                    crate::log_warn!("Hub connection {} dropped frame: {}", self.connection_id, e);
                    continue;
                }
            };

            match message {
                HubMessage::Invocation {
                    target, arguments, ..
                } => {
                    let _ = self
                        .inbound_tx
                        .send(InboundMessage::Invocation { target, arguments });
                }
                HubMessage::Completion {
                    invocation_id,
                    result,
                    error,
                } => self.complete(&invocation_id, result, error),
                HubMessage::Ping => {}
                HubMessage::Close { error, .. } => {
                    let _ = self.inbound_tx.send(InboundMessage::Closing { error });
                    return false;
                }
                HubMessage::StreamItem { .. } | HubMessage::Other(_) => {
                    crate::log_debug!("Hub connection {} ignored frame", self.connection_id);
                }
            }
        }
        true
    }

    fn complete(&self, invocation_id: &str, result: Option<Value>, error: Option<String>) {
        let entry = match self.pending.lock() {
            Ok(mut pending) => pending.remove(invocation_id),
            Err(_) => None,
        };
        let Some(entry) = entry else {
            crate::log_debug!("Completion for unknown invocation {}", invocation_id);
            return;
        };
        let reply = match error {
            Some(message) => Err(RealtimeError::remote(entry.method, message)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = entry.reply_tx.send(reply);
    }

    fn fail_pending(&self) {
        let drained: Vec<PendingInvocation> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().map(|(_, entry)| entry).collect(),
            Err(_) => Vec::new(),
        };
        for entry in drained {
            let _ = entry.reply_tx.send(Err(RealtimeError::closed(None)));
        }
    }
}

struct NativeSession {
    connection_id: Uuid,
    outgoing: UnboundedSender<Message>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl HubSession for NativeSession {
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RealtimeResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::closed(None));
        }

        let invocation_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = hub_protocol::encode(&HubMessage::Invocation {
            invocation_id: Some(invocation_id.clone()),
            target: method.to_string(),
            arguments,
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(
                invocation_id.clone(),
                PendingInvocation {
                    method: method.to_string(),
                    reply_tx,
                },
            );
        }

        crate::log_debug!(
            "Hub connection {} invoking {} (#{})",
            self.connection_id,
            method,
            invocation_id
        );
        if self.outgoing.unbounded_send(Message::text(frame)).is_err() {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&invocation_id);
            }
            return Err(RealtimeError::closed(None));
        }

        reply_rx
            .await
            .unwrap_or_else(|_| Err(RealtimeError::closed(None)))
    }

    async fn close(&self) -> RealtimeResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.outgoing.unbounded_send(Message::Close(None));
        Ok(())
    }
}
