//! Profile and availability changes of one healthcare staff member.

use clinicsync_shared::{EventKind, GroupId, HealthcareStaffUpdate};

use super::{ErrorCallback, EventSetup, Teardown};
use crate::ws::ConnectionManager;

pub fn setup_staff_updates<F>(
    manager: &ConnectionManager,
    staff_id: impl Into<String>,
    callback: F,
    on_error: Option<ErrorCallback>,
) -> Teardown
where
    F: Fn(HealthcareStaffUpdate) + Send + Sync + 'static,
{
    let staff_id = staff_id.into();
    let id = staff_id.clone();
    EventSetup::new(manager)
        .on_error(on_error)
        .listen(
            EventKind::HealthcareStaffUpdate,
            move |update: &HealthcareStaffUpdate| update.staff_id == id,
            callback,
        )
        .join(GroupId::staff(staff_id))
        .build()
}
