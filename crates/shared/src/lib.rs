//! Shared types for the clinicsync real-time client.
//!
//! This crate holds the wire vocabulary only: event names, payload models,
//! group identifiers and the JSON hub protocol codec. It performs no I/O.

pub mod error;
pub mod events;
pub mod groups;
pub mod hub_protocol;
pub mod models;

pub use error::*;
pub use events::*;
pub use groups::*;
pub use hub_protocol::HubMessage;
pub use models::*;
