//! In-memory hub transport for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clinicsync_client::error::{RealtimeError, RealtimeResult};
use clinicsync_client::shared::GroupId;
use clinicsync_client::ws::{HubConnection, HubSession, HubTransport, InboundMessage};
use clinicsync_client::{ConnectionManager, RealtimeConfig, StaticTokenSource, TokenSource};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Default)]
struct MockState {
    /// Sender of each opened connection; `None` once closed.
    connections: Vec<Option<mpsc::UnboundedSender<InboundMessage>>>,
    tokens: Vec<String>,
    calls: Vec<(String, Vec<Value>)>,
    failing_connects: usize,
    failing_calls: HashMap<String, usize>,
}

/// Scriptable transport. Every clone shares the same state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().unwrap().failing_connects = n;
    }

    /// Make the next `n` invocations of `method` fail.
    pub fn fail_calls(&self, method: &str, n: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_calls
            .insert(method.to_string(), n);
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    /// Every invocation as `(method, first argument)`.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(method, args)| (method.clone(), args.first().cloned().unwrap_or(Value::Null)))
            .collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, arg)| arg)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn latest(&self) -> Option<mpsc::UnboundedSender<InboundMessage>> {
        self.state
            .lock()
            .unwrap()
            .connections
            .last()
            .cloned()
            .flatten()
    }

    /// Push a server invocation on the latest connection.
    pub fn push(&self, target: &str, arguments: Vec<Value>) {
        if let Some(tx) = self.latest() {
            let _ = tx.send(InboundMessage::Invocation {
                target: target.to_string(),
                arguments,
            });
        }
    }

    /// Announce a server close on the latest connection.
    pub fn announce_close(&self, error: Option<&str>) {
        if let Some(tx) = self.latest() {
            let _ = tx.send(InboundMessage::Closing {
                error: error.map(str::to_string),
            });
        }
    }

    /// Drop the latest connection, as a network failure would.
    pub fn drop_connection(&self) {
        if let Some(slot) = self.state.lock().unwrap().connections.last_mut() {
            slot.take();
        }
    }
}

#[async_trait]
impl HubTransport for MockTransport {
    async fn connect(&self, _endpoint: &str, access_token: &str) -> RealtimeResult<HubConnection> {
        let mut state = self.state.lock().unwrap();
        state.tokens.push(access_token.to_string());
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RealtimeError::transport("connection refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.connections.push(Some(tx));
        let index = state.connections.len() - 1;
        Ok(HubConnection {
            session: Arc::new(MockSession {
                state: self.state.clone(),
                index,
            }),
            inbound: rx,
        })
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    index: usize,
}

#[async_trait]
impl HubSession for MockSession {
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RealtimeResult<Value> {
        let mut state = self.state.lock().unwrap();
        if state.connections[self.index].is_none() {
            return Err(RealtimeError::closed(None));
        }
        state.calls.push((method.to_string(), arguments));
        if let Some(remaining) = state.failing_calls.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RealtimeError::remote(method, "rejected"));
            }
        }
        Ok(Value::Null)
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.state.lock().unwrap().connections[self.index] = None;
        Ok(())
    }
}

/// Fast configuration: short reconnect schedule and two join attempts.
pub fn fast_config() -> RealtimeConfig {
    RealtimeConfig::new("ws://hub.test/hubs/clinic")
        .reconnect_delays_ms(&[0, 10, 10])
        .max_retries(2)
        .manual_reconnect_delay(Duration::from_millis(50))
        .buffer_flush_interval(Duration::from_millis(50))
}

pub fn manager_with(config: RealtimeConfig, transport: &MockTransport) -> ConnectionManager {
    manager_with_tokens(config, transport, Arc::new(StaticTokenSource::new("token")))
}

pub fn manager_with_tokens(
    config: RealtimeConfig,
    transport: &MockTransport,
    tokens: Arc<dyn TokenSource>,
) -> ConnectionManager {
    ConnectionManager::new(config, Arc::new(transport.clone()), tokens).unwrap()
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `group` holds `expected` references.
pub async fn wait_for_ref_count(manager: &ConnectionManager, group: &GroupId, expected: usize) {
    wait_until(&format!("{expected} reference(s) to {group}"), || {
        manager.group_ref_count(group) == expected
    })
    .await;
}

/// Collects payloads pushed to a listener.
#[derive(Clone, Default)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> impl Fn(T) + Send + Sync + 'static {
        let items = self.items.clone();
        move |item| items.lock().unwrap().push(item)
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}
