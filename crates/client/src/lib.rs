//! ClinicSync real-time client
//!
//! This crate keeps the clinic application's views in sync with server-side
//! changes: one hub connection per process, group subscriptions scoped to
//! staff members and users, and typed event setup functions per feature.

pub mod config;
pub mod credentials;
pub mod error;
pub mod global;
pub mod logging;
pub mod ws;

pub use clinicsync_shared as shared;
pub use config::RealtimeConfig;
pub use credentials::{StaticTokenSource, StoredTokenSource, TokenSource};
pub use error::{RealtimeError, RealtimeResult};
pub use ws::{ConnectionManager, ConnectionState};
