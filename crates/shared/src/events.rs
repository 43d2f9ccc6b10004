//! Server-to-client event names.
//!
//! Every event the push endpoint can deliver is listed in [`EventKind`], so
//! dispatch tables are keyed by a closed enum instead of free-form strings.

use std::fmt;

use serde_json::Value;

/// Known server-pushed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    SlotLocked,
    AppointmentConfirmed,
    SlotReleased,
    PreviousSlotReleased,
    SlotCountUpdate,
    AvailableSlotsUpdate,
    PersonalSlotsUpdate,
    HealthcareStaffUpdate,
    CancelExpiredLockedAppointment,
    InventoryUpdate,
    Notification,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::SlotLocked,
        EventKind::AppointmentConfirmed,
        EventKind::SlotReleased,
        EventKind::PreviousSlotReleased,
        EventKind::SlotCountUpdate,
        EventKind::AvailableSlotsUpdate,
        EventKind::PersonalSlotsUpdate,
        EventKind::HealthcareStaffUpdate,
        EventKind::CancelExpiredLockedAppointment,
        EventKind::InventoryUpdate,
        EventKind::Notification,
    ];

    /// Target name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SlotLocked => "ReceiveSlotLocked",
            EventKind::AppointmentConfirmed => "ReceiveAppointmentConfirmed",
            EventKind::SlotReleased => "ReceiveSlotReleased",
            EventKind::PreviousSlotReleased => "ReceivePreviousSlotReleased",
            EventKind::SlotCountUpdate => "ReceiveSlotCountUpdate",
            EventKind::AvailableSlotsUpdate => "ReceiveAvailableSlotsUpdate",
            EventKind::PersonalSlotsUpdate => "ReceivePersonalSlotsUpdate",
            EventKind::HealthcareStaffUpdate => "ReceiveHealthcareStaffUpdate",
            EventKind::CancelExpiredLockedAppointment => "CancelExpiredLockedAppointment",
            EventKind::InventoryUpdate => "ReceiveInventoryUpdate",
            EventKind::Notification => "ReceiveNotification",
        }
    }

    /// Resolve a wire target name. Matching is exact and case-sensitive.
    pub fn from_target(target: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == target)
    }

    /// Whether the payload of this event is a JSON array.
    pub fn is_list_valued(self) -> bool {
        matches!(
            self,
            EventKind::AvailableSlotsUpdate | EventKind::PersonalSlotsUpdate
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event received from the hub, ready for fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub payload: Value,
}

impl InboundEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Build an event from invocation arguments.
    ///
    /// One argument is used as-is, several are wrapped in an array and none
    /// yields `null`.
    pub fn from_arguments(kind: EventKind, mut arguments: Vec<Value>) -> Self {
        let payload = match arguments.len() {
            0 => Value::Null,
            1 => arguments.remove(0),
            _ => Value::Array(arguments),
        };
        Self { kind, payload }
    }
}
