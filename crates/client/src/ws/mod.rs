//! Real-time hub connection.
//!
//! This module provides:
//! - One shared connection with automatic reconnection
//! - Reference-counted group subscriptions that survive reconnects
//! - Buffering of events received while the connection is not usable
//! - Event setup functions that wire feature callbacks onto the connection
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ setup fn   │ │ setup fn   │ │ setup fn   │
//! │ (slots)    │ │ (staff)    │ │ (inventory)│
//! └────────────┘ └────────────┘ └────────────┘
//!        │              │              │
//!        └──────────────┼──────────────┘
//!                       ▼
//!        ┌──────────────────────────────┐
//!        │      ConnectionManager       │
//!        │ listeners · groups · buffer  │
//!        └──────────────────────────────┘
//!                       │
//!                       ▼
//!        ┌──────────────────────────────┐
//!        │ HubTransport / HubSession    │
//!        │ (WebSocketTransport)         │
//!        └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = clinicsync_client::global::get_instance(None)?;
//!
//! let teardown = setup_staff_slot_events(
//!     &manager,
//!     "42",
//!     StaffSlotCallbacks::new().on_slot_locked(|slot| println!("locked {}", slot.slot_id)),
//! );
//!
//! // When the view goes away
//! teardown.teardown().await;
//! ```

mod connection;
pub mod hooks;
mod manager;

// Re-export connection types
pub use connection::{
    ConnectionState, HubConnection, HubSession, HubTransport, InboundMessage, WebSocketTransport,
};

// Re-export manager types
pub use manager::{
    ConnectionManager, EventCallback, GroupSubscription, ListenerHandle, ListenerId,
    StateCallback, StateListenerHandle,
};

pub use hooks::appointments::{setup_staff_slot_events, StaffSlotCallbacks};
pub use hooks::inventory::{setup_inventory_events, InventoryFilter};
pub use hooks::notifications::setup_notification_events;
pub use hooks::personal::setup_personal_slot_events;
pub use hooks::staff::setup_staff_updates;
pub use hooks::{ErrorCallback, EventSetup, Teardown};
