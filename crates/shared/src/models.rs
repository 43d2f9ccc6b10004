//! Payload models for server-pushed events.
//!
//! The server is not consistent about id encoding, so every id field accepts
//! either a JSON string or a JSON number and is normalized to `String`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize an id that may arrive as a string or a number.
pub fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Text(s) => Ok(s),
        RawId::Int(n) => Ok(n.to_string()),
        RawId::Uint(n) => Ok(n.to_string()),
    }
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_id")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

// --- Appointment slots ---

/// A slot was temporarily locked by a patient starting a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotLocked {
    #[serde(deserialize_with = "de_id")]
    pub staff_id: String,
    #[serde(deserialize_with = "de_id")]
    pub slot_id: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub appointment_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub locked_by_user_id: Option<String>,
    #[serde(default)]
    pub appointment_date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// A locked slot became a confirmed appointment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentConfirmed {
    #[serde(deserialize_with = "de_id")]
    pub staff_id: String,
    #[serde(deserialize_with = "de_id")]
    pub appointment_id: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub slot_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub appointment_date: Option<String>,
}

/// A slot lock was released. Also used for `ReceivePreviousSlotReleased`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotReleased {
    #[serde(deserialize_with = "de_id")]
    pub staff_id: String,
    #[serde(deserialize_with = "de_id")]
    pub slot_id: String,
    #[serde(default)]
    pub appointment_date: Option<String>,
}

/// Remaining free slots for a staff member on a given day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotCountUpdate {
    #[serde(deserialize_with = "de_id")]
    pub staff_id: String,
    pub date: String,
    pub available_count: u32,
}

/// One entry of `ReceiveAvailableSlotsUpdate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    #[serde(deserialize_with = "de_id")]
    pub staff_id: String,
    #[serde(deserialize_with = "de_id")]
    pub slot_id: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub is_available: bool,
}

/// One entry of `ReceivePersonalSlotsUpdate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersonalSlot {
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(deserialize_with = "de_id")]
    pub appointment_id: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub staff_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A locked appointment expired before confirmation and was cancelled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredLockCancelled {
    #[serde(deserialize_with = "de_id")]
    pub staff_id: String,
    #[serde(deserialize_with = "de_id")]
    pub appointment_id: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub slot_id: Option<String>,
}

// --- Staff ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthcareStaffUpdate {
    #[serde(deserialize_with = "de_id")]
    pub staff_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_available: Option<bool>,
}

// --- Inventory ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdate {
    #[serde(deserialize_with = "de_id")]
    pub drug_id: String,
    #[serde(default)]
    pub drug_name: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub low_stock: bool,
}

// --- Notifications ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_id_accepts_number_or_string() {
        let from_str: SlotReleased =
            serde_json::from_value(json!({"staffId": "42", "slotId": "9"})).unwrap();
        let from_num: SlotReleased =
            serde_json::from_value(json!({"staffId": 42, "slotId": 9})).unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(from_num.staff_id, "42");
    }

    #[test]
    fn test_optional_ids() {
        let locked: SlotLocked = serde_json::from_value(json!({
            "staffId": 3,
            "slotId": "s-1",
            "lockedByUserId": 17
        }))
        .unwrap();
        assert_eq!(locked.locked_by_user_id.as_deref(), Some("17"));
        assert_eq!(locked.appointment_id, None);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let result = serde_json::from_value::<SlotCountUpdate>(json!({"staffId": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_notification_timestamp() {
        let n: Notification = serde_json::from_value(json!({
            "id": 1,
            "userId": 2,
            "title": "Prescription ready",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(n.user_id, "2");
        assert!(n.created_at.is_some());
        assert!(!n.is_read);
    }
}
