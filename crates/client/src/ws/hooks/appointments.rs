//! Slot and appointment events for one staff member's schedule.

use clinicsync_shared::{
    AppointmentConfirmed, AvailableSlot, EventKind, ExpiredLockCancelled, GroupId, SlotCountUpdate,
    SlotLocked, SlotReleased,
};

use super::{Callback, ErrorCallback, EventSetup, Teardown};
use crate::ws::ConnectionManager;

/// Callbacks for [`setup_staff_slot_events`]. Events without a callback are
/// not listened to.
#[derive(Default)]
pub struct StaffSlotCallbacks {
    slot_locked: Option<Callback<SlotLocked>>,
    appointment_confirmed: Option<Callback<AppointmentConfirmed>>,
    slot_released: Option<Callback<SlotReleased>>,
    previous_slot_released: Option<Callback<SlotReleased>>,
    slot_count_update: Option<Callback<SlotCountUpdate>>,
    available_slots_update: Option<Callback<Vec<AvailableSlot>>>,
    expired_lock_cancelled: Option<Callback<ExpiredLockCancelled>>,
    on_error: Option<ErrorCallback>,
}

impl StaffSlotCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_slot_locked(mut self, f: impl Fn(SlotLocked) + Send + Sync + 'static) -> Self {
        self.slot_locked = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_appointment_confirmed(
        mut self,
        f: impl Fn(AppointmentConfirmed) + Send + Sync + 'static,
    ) -> Self {
        self.appointment_confirmed = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_slot_released(mut self, f: impl Fn(SlotReleased) + Send + Sync + 'static) -> Self {
        self.slot_released = Some(Box::new(f));
        self
    }

    /// The slot a patient held before switching to another one.
    #[must_use]
    pub fn on_previous_slot_released(
        mut self,
        f: impl Fn(SlotReleased) + Send + Sync + 'static,
    ) -> Self {
        self.previous_slot_released = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_slot_count_update(
        mut self,
        f: impl Fn(SlotCountUpdate) + Send + Sync + 'static,
    ) -> Self {
        self.slot_count_update = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_available_slots_update(
        mut self,
        f: impl Fn(Vec<AvailableSlot>) + Send + Sync + 'static,
    ) -> Self {
        self.available_slots_update = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_expired_lock_cancelled(
        mut self,
        f: impl Fn(ExpiredLockCancelled) + Send + Sync + 'static,
    ) -> Self {
        self.expired_lock_cancelled = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: ErrorCallback) -> Self {
        self.on_error = Some(f);
        self
    }
}

/// Listen to the booking events of `staff_id` and join its staff group.
pub fn setup_staff_slot_events(
    manager: &ConnectionManager,
    staff_id: impl Into<String>,
    callbacks: StaffSlotCallbacks,
) -> Teardown {
    let staff_id = staff_id.into();
    let mut setup = EventSetup::new(manager).on_error(callbacks.on_error);

    if let Some(cb) = callbacks.slot_locked {
        let id = staff_id.clone();
        setup = setup.listen(EventKind::SlotLocked, move |e: &SlotLocked| e.staff_id == id, cb);
    }
    if let Some(cb) = callbacks.appointment_confirmed {
        let id = staff_id.clone();
        setup = setup.listen(
            EventKind::AppointmentConfirmed,
            move |e: &AppointmentConfirmed| e.staff_id == id,
            cb,
        );
    }
    if let Some(cb) = callbacks.slot_released {
        let id = staff_id.clone();
        setup = setup.listen(EventKind::SlotReleased, move |e: &SlotReleased| e.staff_id == id, cb);
    }
    if let Some(cb) = callbacks.previous_slot_released {
        let id = staff_id.clone();
        setup = setup.listen(
            EventKind::PreviousSlotReleased,
            move |e: &SlotReleased| e.staff_id == id,
            cb,
        );
    }
    if let Some(cb) = callbacks.slot_count_update {
        let id = staff_id.clone();
        setup = setup.listen(
            EventKind::SlotCountUpdate,
            move |e: &SlotCountUpdate| e.staff_id == id,
            cb,
        );
    }
    if let Some(cb) = callbacks.available_slots_update {
        let id = staff_id.clone();
        setup = setup.listen_list(
            EventKind::AvailableSlotsUpdate,
            move |slot: &AvailableSlot| slot.staff_id == id,
            cb,
        );
    }
    if let Some(cb) = callbacks.expired_lock_cancelled {
        let id = staff_id.clone();
        setup = setup.listen(
            EventKind::CancelExpiredLockedAppointment,
            move |e: &ExpiredLockCancelled| e.staff_id == id,
            cb,
        );
    }

    setup.join(GroupId::staff(staff_id)).build()
}
