//! Event setup functions for feature code.
//!
//! Each setup function registers typed listeners on the connection manager,
//! joins the groups scoped to one entity in the background and returns a
//! [`Teardown`] that undoes exactly what it set up.
//!
//! Payloads are validated before they reach feature callbacks: `null`, a
//! shape mismatch or an empty list is logged and dropped, and payloads for
//! another entity than the one asked about are filtered out.
//!
//! ```rust,ignore
//! let teardown = setup_notification_events(&manager, "7", |n| println!("{}", n.title), None);
//! // ...
//! teardown.teardown().await;
//! ```

pub mod appointments;
pub mod inventory;
pub mod notifications;
pub mod personal;
pub mod staff;

use std::sync::Arc;

use clinicsync_shared::{EventKind, GroupId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::manager::{ConnectionManager, GroupSubscription, ListenerHandle};
use crate::error::RealtimeError;

/// Receives failures of background group operations.
pub type ErrorCallback = Arc<dyn Fn(&RealtimeError) + Send + Sync>;

/// Typed feature callback.
pub type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Builder shared by the setup functions.
pub struct EventSetup {
    manager: ConnectionManager,
    listeners: Vec<ListenerHandle>,
    groups: Vec<GroupId>,
    on_error: Option<ErrorCallback>,
}

impl EventSetup {
    pub fn new(manager: &ConnectionManager) -> Self {
        Self {
            manager: manager.clone(),
            listeners: Vec::new(),
            groups: Vec::new(),
            on_error: None,
        }
    }

    #[must_use]
    pub fn on_error(mut self, on_error: Option<ErrorCallback>) -> Self {
        self.on_error = on_error;
        self
    }

    /// Listen for a single-object event.
    #[must_use]
    pub fn listen<T, M, F>(mut self, kind: EventKind, matches: M, callback: F) -> Self
    where
        T: DeserializeOwned + 'static,
        M: Fn(&T) -> bool + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let handle = self.manager.on(kind, move |payload| {
            let Some(value) = decode::<T>(kind, payload) else {
                return;
            };
            if matches(&value) {
                callback(value);
            } else {
                crate::log_debug!("Filtered {} for another entity", kind);
            }
        });
        self.listeners.push(handle);
        self
    }

    /// Listen for a list-valued event. Items are filtered with `matches`;
    /// nothing is forwarded when no item is left.
    #[must_use]
    pub fn listen_list<T, M, F>(mut self, kind: EventKind, matches: M, callback: F) -> Self
    where
        T: DeserializeOwned + 'static,
        M: Fn(&T) -> bool + Send + Sync + 'static,
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let handle = self.manager.on(kind, move |payload| {
            let Some(items) = decode_list::<T>(kind, payload) else {
                return;
            };
            let items: Vec<T> = items.into_iter().filter(|item| matches(item)).collect();
            if items.is_empty() {
                crate::log_debug!("Filtered {} for another entity", kind);
                return;
            }
            callback(items);
        });
        self.listeners.push(handle);
        self
    }

    /// Join `group` once the setup is built.
    #[must_use]
    pub fn join(mut self, group: GroupId) -> Self {
        self.groups.push(group);
        self
    }

    /// Start the group joins and hand back the teardown.
    ///
    /// Joins run on spawned tasks, so this must be called inside a tokio
    /// runtime. Join failures go to the error callback.
    pub fn build(self) -> Teardown {
        let joins = self
            .groups
            .into_iter()
            .map(|group| {
                let manager = self.manager.clone();
                let on_error = self.on_error.clone();
                tokio::spawn(async move {
                    match manager.subscribe_to_group(group).await {
                        Ok(subscription) => Some(subscription),
                        Err(e) => {
                            report(on_error.as_ref(), &e);
                            None
                        }
                    }
                })
            })
            .collect();

        Teardown {
            listeners: self.listeners,
            joins,
            on_error: self.on_error,
        }
    }
}

/// Undoes one event setup.
pub struct Teardown {
    listeners: Vec<ListenerHandle>,
    joins: Vec<JoinHandle<Option<GroupSubscription>>>,
    on_error: Option<ErrorCallback>,
}

impl Teardown {
    /// Remove this setup's listeners and release its group references.
    ///
    /// Joins still in flight are cancelled.
    pub async fn teardown(self) {
        for handle in self.listeners {
            handle.remove();
        }

        for join in self.joins {
            join.abort();
            let Ok(Some(subscription)) = join.await else {
                continue;
            };
            if let Err(e) = subscription.unsubscribe().await {
                report(self.on_error.as_ref(), &e);
            }
        }
    }
}

fn report(on_error: Option<&ErrorCallback>, error: &RealtimeError) {
    crate::log_warn!("Real-time setup error: {}", error);
    if let Some(on_error) = on_error {
        on_error(error);
    }
}

fn decode<T: DeserializeOwned>(kind: EventKind, payload: &Value) -> Option<T> {
    if payload.is_null() {
        crate::log_warn!("Dropping {} with null payload", kind);
        return None;
    }
    let decoded: Result<T, _> = Deserialize::deserialize(payload);
    match decoded {
        Ok(value) => Some(value),
        Err(e) => {
            crate::log_warn!("Dropping malformed {} payload: {}", kind, e);
            None
        }
    }
}

fn decode_list<T: DeserializeOwned>(kind: EventKind, payload: &Value) -> Option<Vec<T>> {
    let items = decode::<Vec<T>>(kind, payload)?;
    if items.is_empty() {
        crate::log_warn!("Dropping {} with empty list", kind);
        return None;
    }
    Some(items)
}
