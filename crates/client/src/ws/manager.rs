//! Connection manager: one hub connection shared by every feature.
//!
//! The manager owns the transport session, the listener registry, the
//! reference-counted group registry and the event buffer. Feature code only
//! talks to it through the operations below and never sees transport state.
//!
//! Every `stop()` bumps a stop epoch. Work started before a stop (group joins,
//! connection attempts, reconnect loops) carries the epoch it began under and
//! gives up once it no longer matches, so a stopped manager stays stopped.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use clinicsync_shared::{EventKind, GroupId, InboundEvent};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::connection::{
    ConnectionState, HubConnection, HubSession, HubTransport, InboundMessage,
};
use crate::config::RealtimeConfig;
use crate::credentials::TokenSource;
use crate::error::{RealtimeError, RealtimeResult};

/// Callback invoked with the raw payload of an event.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback invoked with the connection state.
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinStatus {
    Pending,
    Joined,
    Failed,
}

struct GroupEntry {
    id: GroupId,
    /// Distinguishes this entry from a later one for the same group.
    ticket: u64,
    refs: usize,
    /// Connection generation the group was last joined on.
    joined_generation: Option<u64>,
    /// Present while the first join is in flight.
    joining: Option<watch::Receiver<JoinStatus>>,
}

enum JoinRole {
    Joined,
    Waiting(watch::Receiver<JoinStatus>),
    Leading { ticket: u64, done: watch::Sender<JoinStatus> },
}

struct LiveSession {
    session: Arc<dyn HubSession>,
    generation: u64,
}

struct Inner {
    config: RealtimeConfig,
    transport: Arc<dyn HubTransport>,
    credentials: Arc<dyn TokenSource>,
    state_tx: watch::Sender<ConnectionState>,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, EventCallback)>>>,
    state_listeners: Mutex<Vec<(ListenerId, StateCallback)>>,
    groups: Mutex<Vec<GroupEntry>>,
    buffer: Mutex<VecDeque<InboundEvent>>,
    session: Mutex<Option<LiveSession>>,
    generation: AtomicU64,
    connect_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    next_listener_id: AtomicU64,
    next_ticket: AtomicU64,
    stop_epoch: AtomicU64,
    stopped: AtomicBool,
    disposed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stopped_error() -> RealtimeError {
    RealtimeError::closed(Some("connection stopped".to_string()))
}

/// Handle to a connection manager. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until one is needed.
    ///
    /// Fails with [`RealtimeError::Config`] when `config` does not validate.
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn HubTransport>,
        credentials: Arc<dyn TokenSource>,
    ) -> RealtimeResult<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                credentials,
                state_tx,
                listeners: Mutex::new(HashMap::new()),
                state_listeners: Mutex::new(Vec::new()),
                groups: Mutex::new(Vec::new()),
                buffer: Mutex::new(VecDeque::new()),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                connect_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
                flush_task: Mutex::new(None),
                next_listener_id: AtomicU64::new(1),
                next_ticket: AtomicU64::new(1),
                stop_epoch: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Configuration the manager was built with.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    // --- State ---

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// True only while `Connected`.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// True once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a state callback.
    ///
    /// The callback runs once right away with the current state, then on
    /// every transition until the returned handle is removed.
    pub fn on_state_change<F>(&self, callback: F) -> StateListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        let callback: StateCallback = Arc::new(callback);
        callback(self.state());
        lock(&self.inner.state_listeners).push((id, callback));
        StateListenerHandle {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.inner.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if !changed {
            return;
        }

        crate::log_info!("Connection state: {}", state);
        let callbacks: Vec<StateCallback> = lock(&self.inner.state_listeners)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                crate::log_error!("State listener panicked on {}", state);
            }
        }
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed))
    }

    fn is_halted(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst) || self.is_disposed()
    }

    fn stop_epoch(&self) -> u64 {
        self.inner.stop_epoch.load(Ordering::SeqCst)
    }

    fn check_disposed(&self) -> RealtimeResult<()> {
        if self.is_disposed() {
            Err(RealtimeError::Disposed)
        } else {
            Ok(())
        }
    }

    // --- Listener registry ---

    /// Register `callback` for `kind`.
    ///
    /// Callbacks of one kind run in registration order.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        let mut listeners = lock(&self.inner.listeners);
        let entry = listeners.entry(kind).or_default();
        if entry.is_empty() {
            crate::log_debug!("Binding event {}", kind);
        }
        entry.push((id, Arc::new(callback)));
        ListenerHandle {
            inner: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Remove one callback. Unknown ids are ignored.
    pub fn off(&self, kind: EventKind, id: ListenerId) {
        let mut listeners = lock(&self.inner.listeners);
        let Some(entry) = listeners.get_mut(&kind) else {
            return;
        };
        entry.retain(|(listener_id, _)| *listener_id != id);
        if entry.is_empty() {
            listeners.remove(&kind);
            crate::log_debug!("Unbinding event {}", kind);
        }
    }

    /// Callbacks currently registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.listeners).get(&kind).map_or(0, Vec::len)
    }

    fn is_bound(&self, kind: EventKind) -> bool {
        lock(&self.inner.listeners).contains_key(&kind)
    }

    fn dispatch(&self, event: &InboundEvent) {
        let callbacks: Vec<EventCallback> = lock(&self.inner.listeners)
            .get(&event.kind)
            .map(|entry| entry.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event.payload))).is_err() {
                crate::log_error!("Listener for {} panicked", event.kind);
            }
        }
    }

    fn handle_invocation(&self, target: &str, arguments: Vec<Value>) {
        match EventKind::from_target(target) {
            Some(kind) => self.handle_inbound(InboundEvent::from_arguments(kind, arguments)),
            None => crate::log_debug!("Ignoring unknown event {}", target),
        }
    }

    /// Fan an event out, or buffer it while not connected.
    pub(crate) fn handle_inbound(&self, event: InboundEvent) {
        if !self.is_bound(event.kind) {
            return;
        }
        if self.is_connected() {
            self.dispatch(&event);
        } else {
            self.buffer_event(event);
        }
    }

    // --- Event buffer ---

    /// Events waiting for the connection to come back.
    pub fn buffered_len(&self) -> usize {
        lock(&self.inner.buffer).len()
    }

    fn buffer_event(&self, event: InboundEvent) {
        let mut buffer = lock(&self.inner.buffer);
        if buffer.len() >= self.inner.config.max_buffered_events {
            if let Some(dropped) = buffer.pop_front() {
                crate::log_warn!("Event buffer full, dropping oldest {}", dropped.kind);
            }
        }
        crate::log_debug!("Buffering {} while {}", event.kind, self.state());
        buffer.push_back(event);
    }

    /// Dispatch buffered events in arrival order to the current listeners.
    fn flush_buffer(&self) {
        let drained: Vec<InboundEvent> = lock(&self.inner.buffer).drain(..).collect();
        if drained.is_empty() {
            return;
        }
        crate::log_debug!("Flushing {} buffered event(s)", drained.len());
        for event in &drained {
            self.dispatch(event);
        }
    }

    fn ensure_flush_task(&self) {
        let mut slot = lock(&self.inner.flush_task);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.buffer_flush_interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(manager) = ConnectionManager::from_weak(&weak) else {
                    break;
                };
                if manager.is_connected() {
                    manager.flush_buffer();
                }
            }
        }));
    }

    // --- Connection lifecycle ---

    fn current_session(&self) -> Option<(Arc<dyn HubSession>, u64)> {
        lock(&self.inner.session)
            .as_ref()
            .map(|live| (live.session.clone(), live.generation))
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn open_connection(&self) -> RealtimeResult<HubConnection> {
        let token = self
            .inner
            .credentials
            .access_token()
            .ok_or_else(|| RealtimeError::unavailable("no access token available"))?;
        self.inner
            .transport
            .connect(&self.inner.config.endpoint, &token)
            .await
    }

    /// Open the connection if it is not already open.
    pub async fn start(&self) -> RealtimeResult<()> {
        self.start_at(self.stop_epoch()).await
    }

    /// Connect on behalf of work begun under `epoch`.
    async fn start_at(&self, epoch: u64) -> RealtimeResult<()> {
        self.check_disposed()?;
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.check_disposed()?;
        if self.stop_epoch() != epoch {
            return Err(stopped_error());
        }

        self.inner.stopped.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        match self.open_connection().await {
            Ok(connection) => self.install(connection, epoch).await,
            Err(e) => {
                crate::log_error!("Failed to connect to {}: {}", self.inner.config.endpoint, e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Adopt a freshly opened connection. Must run under `connect_lock`.
    ///
    /// A connection that finished opening after a stop is closed instead.
    async fn install(&self, connection: HubConnection, epoch: u64) -> RealtimeResult<()> {
        let HubConnection { session, inbound } = connection;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // `stop()` bumps the epoch before it takes the session, so checking
        // under the session lock cannot miss a concurrent stop.
        let adopted = {
            let mut slot = lock(&self.inner.session);
            let current = self.stop_epoch() == epoch && !self.is_disposed();
            if current {
                *slot = Some(LiveSession {
                    session: session.clone(),
                    generation,
                });
            }
            current
        };
        if !adopted {
            crate::log_info!("Stopped while connecting, closing new connection");
            if let Err(e) = session.close().await {
                crate::log_warn!("Error while closing connection: {}", e);
            }
            return Err(stopped_error());
        }

        self.flush_buffer();
        self.set_state(ConnectionState::Connected);
        if self.stop_epoch() != epoch {
            self.set_state(ConnectionState::Disconnected);
            return Err(stopped_error());
        }

        let reader = tokio::spawn(run_reader(Arc::downgrade(&self.inner), inbound, generation));
        self.track(reader);
        self.ensure_flush_task();

        let weak = Arc::downgrade(&self.inner);
        self.track(tokio::spawn(run_rejoin(weak, generation, epoch)));
        Ok(())
    }

    async fn handle_connection_lost(&self, generation: u64, reason: Option<String>) {
        {
            let mut session = lock(&self.inner.session);
            match session.as_ref() {
                Some(live) if live.generation == generation => *session = None,
                _ => return,
            }
        }
        if self.is_halted() {
            return;
        }

        match reason {
            Some(reason) => crate::log_warn!("Connection lost: {}", reason),
            None => crate::log_warn!("Connection lost"),
        }
        self.reconnect().await;
    }

    /// Automatic reconnection over the configured delay schedule.
    async fn reconnect(&self) {
        let epoch = self.stop_epoch();
        self.set_state(ConnectionState::Reconnecting);
        let delays = self.inner.config.reconnect_delays.clone();
        let attempts = delays.len();

        for (index, delay) in delays.into_iter().enumerate() {
            tokio::time::sleep(delay).await;
            if self.is_halted() || self.stop_epoch() != epoch {
                return;
            }

            let _guard = self.inner.connect_lock.lock().await;
            if self.is_connected() {
                return;
            }
            self.set_state(ConnectionState::Reconnecting);
            match self.open_connection().await {
                Ok(connection) => {
                    if self.install(connection, epoch).await.is_ok() {
                        crate::log_info!("Reconnected on attempt {}/{}", index + 1, attempts);
                    }
                    return;
                }
                Err(e) => {
                    crate::log_warn!("Reconnect attempt {}/{} failed: {}", index + 1, attempts, e);
                }
            }
        }

        crate::log_error!("Automatic reconnection gave up after {} attempt(s)", attempts);
        self.set_state(ConnectionState::Disconnected);
        self.schedule_manual_reconnect();
    }

    fn schedule_manual_reconnect(&self) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.manual_reconnect_delay;
        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = ConnectionManager::from_weak(&weak) else {
                return;
            };
            if manager.is_halted() || manager.state() != ConnectionState::Disconnected {
                return;
            }
            crate::log_info!("Attempting manual reconnect");
            if let Err(e) = manager.start().await {
                crate::log_warn!("Manual reconnect failed: {}", e);
            }
        }));
    }

    /// Wait for a usable session, connecting when disconnected.
    ///
    /// Fails once the manager is stopped after `epoch` was taken.
    async fn ensure_connected(&self, epoch: u64) -> RealtimeResult<(Arc<dyn HubSession>, u64)> {
        let mut state_rx = self.inner.state_tx.subscribe();
        loop {
            self.check_disposed()?;
            if self.stop_epoch() != epoch {
                return Err(stopped_error());
            }
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Connected => {
                    if let Some(live) = self.current_session() {
                        return Ok(live);
                    }
                }
                ConnectionState::Disconnected => {
                    self.start_at(epoch).await?;
                    continue;
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(RealtimeError::Disposed);
            }
        }
    }

    async fn call(
        &self,
        method: &str,
        arguments: Vec<Value>,
        epoch: u64,
    ) -> RealtimeResult<(Value, u64)> {
        let (session, generation) = self.ensure_connected(epoch).await?;
        let value = session.invoke(method, arguments).await?;
        Ok((value, generation))
    }

    /// Call a hub method once connected.
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RealtimeResult<Value> {
        self.call(method, arguments, self.stop_epoch())
            .await
            .map(|(value, _)| value)
    }

    /// Close the connection, cancel background work and forget all groups.
    ///
    /// Joins and connection attempts still in flight fail with
    /// [`RealtimeError::ConnectionClosed`] instead of reconnecting.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.stop_epoch.fetch_add(1, Ordering::SeqCst);

        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        if let Some(task) = lock(&self.inner.flush_task).take() {
            task.abort();
        }
        lock(&self.inner.groups).clear();

        let live = lock(&self.inner.session).take();
        if let Some(live) = live {
            if let Err(e) = live.session.close().await {
                crate::log_warn!("Error while closing connection: {}", e);
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Stop and clear every registry. The handle is unusable afterwards.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop().await;
        lock(&self.inner.listeners).clear();
        lock(&self.inner.state_listeners).clear();
        lock(&self.inner.buffer).clear();
        crate::log_info!("Connection manager disposed");
    }

    // --- Groups ---

    /// Join `group`, or take another reference if already joined.
    ///
    /// Only the first reference performs the remote join; concurrent callers
    /// wait for it and share its result. Joins of other groups proceed in
    /// the meantime.
    pub async fn subscribe_to_group(&self, group: GroupId) -> RealtimeResult<GroupSubscription> {
        let epoch = self.stop_epoch();
        loop {
            self.check_disposed()?;
            if self.stop_epoch() != epoch {
                return Err(stopped_error());
            }

            match self.claim_group(&group) {
                JoinRole::Joined => return Ok(self.subscription(group)),
                JoinRole::Leading { ticket, done } => {
                    return self.lead_join(group, ticket, done, epoch).await;
                }
                JoinRole::Waiting(mut done) => {
                    let status = done
                        .wait_for(|status| *status != JoinStatus::Pending)
                        .await
                        .map(|status| *status)
                        .unwrap_or(JoinStatus::Failed);
                    if status == JoinStatus::Joined {
                        return Ok(self.subscription(group));
                    }
                    // The reference went away with the failed entry
                    crate::log_debug!("Shared join of {} failed, joining again", group);
                }
            }
        }
    }

    fn subscription(&self, group: GroupId) -> GroupSubscription {
        GroupSubscription {
            manager: self.clone(),
            group,
        }
    }

    /// Take a reference to `group`, creating a pending entry if needed.
    fn claim_group(&self, group: &GroupId) -> JoinRole {
        let mut groups = lock(&self.inner.groups);
        if let Some(entry) = groups.iter_mut().find(|entry| &entry.id == group) {
            entry.refs += 1;
            crate::log_debug!("{} now has {} reference(s)", group, entry.refs);
            return match &entry.joining {
                Some(joining) => JoinRole::Waiting(joining.clone()),
                None => JoinRole::Joined,
            };
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done, joining) = watch::channel(JoinStatus::Pending);
        groups.push(GroupEntry {
            id: group.clone(),
            ticket,
            refs: 1,
            joined_generation: None,
            joining: Some(joining),
        });
        JoinRole::Leading { ticket, done }
    }

    async fn lead_join(
        &self,
        group: GroupId,
        ticket: u64,
        done: watch::Sender<JoinStatus>,
        epoch: u64,
    ) -> RealtimeResult<GroupSubscription> {
        let mut pending = PendingJoin {
            manager: self.clone(),
            ticket,
            done,
            settled: false,
        };
        let joined = match self.subscribe_with_retry(&group, epoch).await {
            Ok(generation) => self.finish_join(ticket, generation, epoch),
            Err(e) => Err(e),
        };
        pending.settle(joined.is_ok());
        joined.map(|()| self.subscription(group))
    }

    /// Mark the entry joined, unless a stop removed it meanwhile.
    fn finish_join(&self, ticket: u64, generation: u64, epoch: u64) -> RealtimeResult<()> {
        let mut groups = lock(&self.inner.groups);
        match groups.iter_mut().find(|entry| entry.ticket == ticket) {
            Some(entry) if self.stop_epoch() == epoch => {
                entry.joined_generation = Some(generation);
                entry.joining = None;
                Ok(())
            }
            _ => Err(stopped_error()),
        }
    }

    fn forget_entry(&self, ticket: u64) {
        lock(&self.inner.groups).retain(|entry| entry.ticket != ticket);
    }

    /// Join attempts with back-off. Returns the generation joined on.
    async fn subscribe_with_retry(&self, group: &GroupId, epoch: u64) -> RealtimeResult<u64> {
        let method = self
            .inner
            .config
            .hub_methods
            .subscribe_method(group.scope())
            .to_string();
        let max_retries = self.inner.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let arguments = vec![Value::String(group.entity_id().to_string())];
            let error = match self.call(&method, arguments, epoch).await {
                Ok((_, generation)) => {
                    crate::log_info!("Subscribed to {}", group);
                    return Ok(generation);
                }
                Err(RealtimeError::Disposed) => return Err(RealtimeError::Disposed),
                Err(_) if self.stop_epoch() != epoch => return Err(stopped_error()),
                Err(e) => e,
            };

            if attempt >= max_retries || self.is_halted() {
                crate::log_error!("Subscribing to {} failed: {}", group, error);
                return Err(RealtimeError::SubscriptionFailed {
                    group: group.clone(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.inner.config.retry_delay(attempt);
            crate::log_warn!(
                "Subscribing to {} failed (attempt {}/{}), retrying in {:?}: {}",
                group,
                attempt,
                max_retries,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
            if self.is_halted() || self.stop_epoch() != epoch {
                crate::log_debug!("Join of {} abandoned, manager stopped", group);
                return Err(stopped_error());
            }
        }
    }

    /// Re-join every group not yet joined on `generation`, in join order.
    async fn rejoin_groups(&self, generation: u64, epoch: u64) {
        let stale: Vec<(u64, GroupId)> = lock(&self.inner.groups)
            .iter()
            .filter(|entry| entry.joining.is_none() && entry.joined_generation != Some(generation))
            .map(|entry| (entry.ticket, entry.id.clone()))
            .collect();

        for (ticket, group) in stale {
            if self.current_session().map(|(_, g)| g) != Some(generation) {
                return;
            }
            let still_held = lock(&self.inner.groups)
                .iter()
                .any(|entry| entry.ticket == ticket);
            if !still_held {
                continue;
            }
            match self.subscribe_with_retry(&group, epoch).await {
                Ok(joined) => {
                    let mut groups = lock(&self.inner.groups);
                    if let Some(entry) = groups.iter_mut().find(|entry| entry.ticket == ticket) {
                        entry.joined_generation = Some(joined);
                    }
                }
                Err(e) => crate::log_error!("Re-subscribing to {} failed: {}", group, e),
            }
        }
    }

    /// Release one reference to `group`.
    ///
    /// The last reference removes the group and, when connected and the scope
    /// has a leave method, leaves it on the server. The group is forgotten
    /// locally even if that call fails. Groups whose first join is still in
    /// flight are left alone.
    pub async fn unsubscribe_from_group(&self, group: &GroupId) -> RealtimeResult<()> {
        {
            let mut groups = lock(&self.inner.groups);
            let Some(position) = groups
                .iter()
                .position(|entry| &entry.id == group && entry.joining.is_none())
            else {
                return Ok(());
            };

            let entry = &mut groups[position];
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                crate::log_debug!("{} still has {} reference(s)", group, entry.refs);
                return Ok(());
            }
            groups.remove(position);
        }

        let Some(method) = self
            .inner
            .config
            .hub_methods
            .unsubscribe_method(group.scope())
        else {
            crate::log_debug!("No leave method for {}, dropped locally", group);
            return Ok(());
        };
        let Some((session, _)) = self.current_session().filter(|_| self.is_connected()) else {
            return Ok(());
        };

        let arguments = vec![Value::String(group.entity_id().to_string())];
        match session.invoke(method, arguments).await {
            Ok(_) => {
                crate::log_info!("Unsubscribed from {}", group);
                Ok(())
            }
            Err(e) => {
                crate::log_error!("Unsubscribing from {} failed: {}", group, e);
                Err(RealtimeError::UnsubscriptionFailed {
                    group: group.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Joined groups in join order.
    pub fn subscribed_groups(&self) -> Vec<GroupId> {
        lock(&self.inner.groups)
            .iter()
            .filter(|entry| entry.joining.is_none())
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// References held on a joined group, 0 when not joined.
    pub fn group_ref_count(&self, group: &GroupId) -> usize {
        lock(&self.inner.groups)
            .iter()
            .find(|entry| &entry.id == group && entry.joining.is_none())
            .map_or(0, |entry| entry.refs)
    }
}

/// Leader side of a pending join.
///
/// Waiters are released when it settles. Dropping it unsettled, e.g. when the
/// joining future is cancelled, fails the join and drops the entry.
struct PendingJoin {
    manager: ConnectionManager,
    ticket: u64,
    done: watch::Sender<JoinStatus>,
    settled: bool,
}

impl PendingJoin {
    fn settle(&mut self, joined: bool) {
        self.settled = true;
        if !joined {
            self.manager.forget_entry(self.ticket);
        }
        self.done.send_replace(if joined {
            JoinStatus::Joined
        } else {
            JoinStatus::Failed
        });
    }
}

impl Drop for PendingJoin {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(false);
        }
    }
}

/// Rejoin the tracked groups on a freshly installed connection.
///
/// Boxed as `Send` for the same reason as `run_reader`.
fn run_rejoin(
    weak: Weak<Inner>,
    generation: u64,
    epoch: u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Some(manager) = ConnectionManager::from_weak(&weak) {
            manager.rejoin_groups(generation, epoch).await;
        }
    })
}

/// Drive one connection's inbound stream, then recover from its loss.
///
/// Returns a boxed `Send` future to break the reader -> reconnect -> install
/// cycle, which the compiler cannot otherwise prove `Send`.
fn run_reader(
    weak: Weak<Inner>,
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    generation: u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
    let mut close_reason = None;
    while let Some(message) = inbound.recv().await {
        let Some(manager) = ConnectionManager::from_weak(&weak) else {
            return;
        };
        match message {
            InboundMessage::Invocation { target, arguments } => {
                manager.handle_invocation(&target, arguments);
            }
            InboundMessage::Closing { error } => {
                // Pushes still in flight are buffered until reconnected
                if !manager.is_halted() {
                    manager.set_state(ConnectionState::Reconnecting);
                }
                close_reason = error;
            }
        }
    }

    if let Some(manager) = ConnectionManager::from_weak(&weak) {
        manager.handle_connection_lost(generation, close_reason).await;
    }
    })
}

/// Removes one event callback.
#[derive(Debug)]
pub struct ListenerHandle {
    inner: Weak<Inner>,
    kind: EventKind,
    id: ListenerId,
}

impl ListenerHandle {
    /// Id to pass to [`ConnectionManager::off`].
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Event kind the callback is registered for.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the callback. Later events of this kind no longer reach it.
    pub fn remove(self) {
        if let Some(manager) = ConnectionManager::from_weak(&self.inner) {
            manager.off(self.kind, self.id);
        }
    }
}

/// Removes one state callback.
#[derive(Debug)]
pub struct StateListenerHandle {
    inner: Weak<Inner>,
    id: ListenerId,
}

impl StateListenerHandle {
    /// Remove the callback.
    pub fn remove(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.state_listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

/// One reference to a joined group.
#[derive(Debug)]
pub struct GroupSubscription {
    manager: ConnectionManager,
    group: GroupId,
}

impl GroupSubscription {
    /// The group this reference holds.
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Release this reference.
    pub async fn unsubscribe(self) -> RealtimeResult<()> {
        self.manager.unsubscribe_from_group(&self.group).await
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}
