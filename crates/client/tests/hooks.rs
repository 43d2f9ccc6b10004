mod common;

use std::sync::Arc;

use clinicsync_client::shared::{
    EventKind, GroupId, InventoryUpdate, Notification, PersonalSlot, SlotCountUpdate, SlotLocked,
};
use clinicsync_client::ws::{
    setup_inventory_events, setup_notification_events, setup_personal_slot_events,
    setup_staff_slot_events, setup_staff_updates, ErrorCallback, InventoryFilter,
    StaffSlotCallbacks,
};
use clinicsync_client::RealtimeError;
use common::{fast_config, manager_with, wait_for_ref_count, wait_until, MockTransport, Recorder};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_staff_slot_events_filter_by_staff_and_teardown() {
    let transport = MockTransport::new();
    let manager = manager_with(fast_config(), &transport);

    let locked: Recorder<SlotLocked> = Recorder::new();
    let counts: Recorder<SlotCountUpdate> = Recorder::new();
    let teardown = setup_staff_slot_events(
        &manager,
        "42",
        StaffSlotCallbacks::new()
            .on_slot_locked(locked.sink())
            .on_slot_count_update(counts.sink()),
    );
    wait_until("staff group joined", || {
        transport.calls_to("SubscribeToStaffUpdates") == vec![json!("42")]
    })
    .await;
    assert_eq!(manager.listener_count(EventKind::SlotLocked), 1);
    assert_eq!(manager.listener_count(EventKind::SlotReleased), 0);

    transport.push("ReceiveSlotLocked", vec![json!({"staffId": 7, "slotId": 1})]);
    transport.push("ReceiveSlotLocked", vec![json!(null)]);
    transport.push("ReceiveSlotLocked", vec![json!({"unexpected": true})]);
    transport.push("ReceiveSlotLocked", vec![json!({"staffId": 42, "slotId": 2})]);
    transport.push(
        "ReceiveSlotCountUpdate",
        vec![json!({"staffId": "42", "date": "2024-05-01", "availableCount": 3})],
    );
    wait_until("count update", || counts.len() == 1).await;

    let locked = locked.items();
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].staff_id, "42");
    assert_eq!(locked[0].slot_id, "2");

    teardown.teardown().await;
    assert_eq!(manager.listener_count(EventKind::SlotLocked), 0);
    assert_eq!(manager.listener_count(EventKind::SlotCountUpdate), 0);
    assert_eq!(
        transport.calls_to("UnsubscribeFromStaffUpdates"),
        vec![json!("42")]
    );
    assert!(manager.subscribed_groups().is_empty());
}

#[tokio::test]
async fn test_teardown_keeps_group_shared_with_other_setup() {
    let transport = MockTransport::new();
    let manager = manager_with(fast_config(), &transport);

    let slots = setup_staff_slot_events(
        &manager,
        "42",
        StaffSlotCallbacks::new().on_slot_released(|_| {}),
    );
    let profile = setup_staff_updates(&manager, "42", |_| {}, None);
    wait_for_ref_count(&manager, &GroupId::staff("42"), 2).await;
    assert_eq!(transport.calls_to("SubscribeToStaffUpdates").len(), 1);

    slots.teardown().await;
    assert!(transport.calls_to("UnsubscribeFromStaffUpdates").is_empty());
    assert_eq!(manager.subscribed_groups(), vec![GroupId::staff("42")]);

    profile.teardown().await;
    assert_eq!(transport.calls_to("UnsubscribeFromStaffUpdates").len(), 1);
}

#[tokio::test]
async fn test_personal_slots_drop_empty_and_foreign_items() {
    let transport = MockTransport::new();
    let manager = manager_with(fast_config(), &transport);

    let updates: Recorder<Vec<PersonalSlot>> = Recorder::new();
    let teardown = setup_personal_slot_events(&manager, "7", updates.sink(), None);
    wait_until("user group joined", || {
        transport.calls_to("SubscribeToUserUpdates") == vec![json!("7")]
    })
    .await;

    transport.push("ReceivePersonalSlotsUpdate", vec![json!([])]);
    transport.push(
        "ReceivePersonalSlotsUpdate",
        vec![json!([{"userId": 8, "appointmentId": 1}])],
    );
    transport.push(
        "ReceivePersonalSlotsUpdate",
        vec![json!([
            {"userId": 7, "appointmentId": 2, "status": "Locked"},
            {"userId": 8, "appointmentId": 3}
        ])],
    );
    wait_until("personal update", || updates.len() == 1).await;

    let update = &updates.items()[0];
    assert_eq!(update.len(), 1);
    assert_eq!(update[0].appointment_id, "2");
    assert_eq!(update[0].status.as_deref(), Some("Locked"));

    teardown.teardown().await;
    // User groups have no leave method by default
    assert_eq!(transport.calls().len(), 1);
    assert!(manager.subscribed_groups().is_empty());
}

#[tokio::test]
async fn test_notifications_filtered_by_user() {
    let transport = MockTransport::new();
    let manager = manager_with(fast_config(), &transport);

    let received: Recorder<Notification> = Recorder::new();
    let teardown = setup_notification_events(&manager, "7", received.sink(), None);
    wait_until("user group joined", || transport.calls().len() == 1).await;

    transport.push(
        "ReceiveNotification",
        vec![json!({"id": 1, "userId": 9, "title": "not mine"})],
    );
    transport.push(
        "ReceiveNotification",
        vec![json!({"id": 2, "userId": 7, "title": "Prescription ready", "createdAt": "2024-05-01T08:00:00Z"})],
    );
    wait_until("notification", || received.len() == 1).await;
    assert_eq!(received.items()[0].title, "Prescription ready");

    teardown.teardown().await;
}

#[tokio::test]
async fn test_join_failure_reported_to_on_error() {
    let transport = MockTransport::new();
    let manager = manager_with(fast_config(), &transport);
    transport.fail_calls("SubscribeToStaffUpdates", 10);

    let errors: Recorder<String> = Recorder::new();
    let sink = errors.sink();
    let on_error: ErrorCallback = Arc::new(move |e: &RealtimeError| {
        assert!(matches!(e, RealtimeError::SubscriptionFailed { .. }));
        sink(e.to_string());
    });
    let teardown = setup_staff_updates(&manager, "3", |_| {}, Some(on_error));

    wait_until("error reported", || errors.len() == 1).await;
    assert!(errors.items()[0].starts_with("subscribing to Staff_3 failed after 2 attempt(s)"));
    assert!(manager.subscribed_groups().is_empty());

    teardown.teardown().await;
    assert!(transport.calls_to("UnsubscribeFromStaffUpdates").is_empty());
}

#[tokio::test]
async fn test_inventory_events_join_no_group() {
    let transport = MockTransport::new();
    let manager = manager_with(fast_config(), &transport);
    manager.start().await.unwrap();

    let updates: Recorder<InventoryUpdate> = Recorder::new();
    let teardown = setup_inventory_events(
        &manager,
        InventoryFilter::all().low_stock_only(),
        updates.sink(),
    );

    transport.push(
        "ReceiveInventoryUpdate",
        vec![json!({"drugId": 1, "quantity": 100, "lowStock": false})],
    );
    transport.push(
        "ReceiveInventoryUpdate",
        vec![json!({"drugId": 2, "drugName": "Amoxicillin", "quantity": 3, "lowStock": true})],
    );
    wait_until("low stock update", || updates.len() == 1).await;

    let items = updates.items();
    assert_eq!(items[0].drug_id, "2");
    assert!(transport.calls().is_empty());

    teardown.teardown().await;
    assert_eq!(manager.listener_count(EventKind::InventoryUpdate), 0);
}
