//! A patient's own appointment slots.

use clinicsync_shared::{EventKind, GroupId, PersonalSlot};

use super::{ErrorCallback, EventSetup, Teardown};
use crate::ws::ConnectionManager;

/// Listen to slot changes of `user_id` and join the user group.
///
/// Slots belonging to other users are removed from each update; an update
/// left empty is not forwarded.
pub fn setup_personal_slot_events<F>(
    manager: &ConnectionManager,
    user_id: impl Into<String>,
    callback: F,
    on_error: Option<ErrorCallback>,
) -> Teardown
where
    F: Fn(Vec<PersonalSlot>) + Send + Sync + 'static,
{
    let user_id = user_id.into();
    let id = user_id.clone();
    EventSetup::new(manager)
        .on_error(on_error)
        .listen_list(
            EventKind::PersonalSlotsUpdate,
            move |slot: &PersonalSlot| slot.user_id == id,
            callback,
        )
        .join(GroupId::user(user_id))
        .build()
}
