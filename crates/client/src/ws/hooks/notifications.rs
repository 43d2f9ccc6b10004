//! In-app notifications addressed to one user.

use clinicsync_shared::{EventKind, GroupId, Notification};

use super::{ErrorCallback, EventSetup, Teardown};
use crate::ws::ConnectionManager;

pub fn setup_notification_events<F>(
    manager: &ConnectionManager,
    user_id: impl Into<String>,
    callback: F,
    on_error: Option<ErrorCallback>,
) -> Teardown
where
    F: Fn(Notification) + Send + Sync + 'static,
{
    let user_id = user_id.into();
    let id = user_id.clone();
    EventSetup::new(manager)
        .on_error(on_error)
        .listen(
            EventKind::Notification,
            move |notification: &Notification| notification.user_id == id,
            callback,
        )
        .join(GroupId::user(user_id))
        .build()
}
