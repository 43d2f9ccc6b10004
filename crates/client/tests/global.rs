mod common;

use clinicsync_client::global;
use clinicsync_client::shared::{EventKind, GroupId};
use clinicsync_client::{RealtimeConfig, RealtimeError};
use common::{fast_config, manager_with, MockTransport};

// One test per binary: the shared instance is process-wide.
#[tokio::test]
async fn test_dispose_resets_shared_instance() {
    let transport = MockTransport::new();
    let first = global::get_or_init_with(|| Ok(manager_with(fast_config(), &transport))).unwrap();

    let _handle = first.on(EventKind::Notification, |_| {});
    first.subscribe_to_group(GroupId::user("1")).await.unwrap();

    // Later access returns the same instance
    let again = global::get_instance(Some(RealtimeConfig::new("ws://ignored.test/hub"))).unwrap();
    assert_eq!(again.listener_count(EventKind::Notification), 1);
    assert_eq!(again.config().endpoint, "ws://hub.test/hubs/clinic");

    global::dispose().await;
    assert!(first.is_disposed());
    assert!(global::current().is_none());

    let fresh_transport = MockTransport::new();
    let fresh = global::get_or_init_with(|| Ok(manager_with(fast_config(), &fresh_transport))).unwrap();
    assert!(!fresh.is_disposed());
    assert_eq!(fresh.listener_count(EventKind::Notification), 0);
    assert!(fresh.subscribed_groups().is_empty());
    assert_eq!(fresh.buffered_len(), 0);

    global::dispose().await;
    // An invalid configuration leaves the slot empty
    let err = global::get_instance(Some(fast_config().max_retries(0))).unwrap_err();
    assert!(matches!(err, RealtimeError::Config { .. }));
    assert!(global::current().is_none());

    let default = global::get_instance(None).unwrap();
    assert_eq!(default.config().endpoint, clinicsync_client::config::DEFAULT_ENDPOINT);
    global::dispose().await;
}
