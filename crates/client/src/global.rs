//! Process-wide connection manager.
//!
//! Most applications share one connection for the whole session. The instance
//! is built lazily on first access and released by [`dispose`], after which
//! the next access builds fresh state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use crate::config::RealtimeConfig;
use crate::credentials::StoredTokenSource;
use crate::error::RealtimeResult;
use crate::ws::{ConnectionManager, WebSocketTransport};

static INSTANCE: Lazy<Mutex<Option<ConnectionManager>>> = Lazy::new(|| Mutex::new(None));

fn slot() -> MutexGuard<'static, Option<ConnectionManager>> {
    INSTANCE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared manager using the WebSocket transport and the stored access token.
///
/// `config` only applies when the instance is created; later calls return
/// the existing instance unchanged. An invalid `config` creates nothing.
pub fn get_instance(config: Option<RealtimeConfig>) -> RealtimeResult<ConnectionManager> {
    get_or_init_with(|| {
        let config = config.unwrap_or_default();
        let transport = WebSocketTransport::new().keep_alive_interval(config.keep_alive_interval);
        ConnectionManager::new(
            config,
            Arc::new(transport),
            Arc::new(StoredTokenSource::new()),
        )
    })
}

/// Shared manager, created with `init` if none exists.
///
/// When `init` fails the slot stays empty and the error is returned.
pub fn get_or_init_with<F>(init: F) -> RealtimeResult<ConnectionManager>
where
    F: FnOnce() -> RealtimeResult<ConnectionManager>,
{
    let mut slot = slot();
    if let Some(manager) = slot.as_ref() {
        return Ok(manager.clone());
    }
    crate::log_info!("Creating shared connection manager");
    let manager = init()?;
    *slot = Some(manager.clone());
    Ok(manager)
}

/// Shared manager, if one exists.
pub fn current() -> Option<ConnectionManager> {
    slot().clone()
}

/// Dispose the shared manager and release it.
pub async fn dispose() {
    let manager = slot().take();
    if let Some(manager) = manager {
        manager.dispose().await;
    }
}
