//! Discovery sweep and registry tests.

mod common;

use common::{FakeCloud, LOCK, drain};
use lockbridge_core::constants::{PATH_LOCK_BATTERY, PATH_LOCK_DETAIL, PATH_LOCK_LIST};
use lockbridge_device::{Attribute, BridgeEvent, DeviceState, LockPlatform, PlatformConfig};
use std::sync::Arc;
use std::time::Duration;

fn config() -> PlatformConfig {
    PlatformConfig {
        polling_interval: Duration::from_secs(1),
        discovery_interval: Duration::from_secs(5),
        offline_interval: Duration::from_secs(20),
    }
}

#[tokio::test(start_paused = true)]
async fn test_discovery_registers_new_lock() {
    let cloud = FakeCloud::new(&["111"]);
    let (platform, mut events) = LockPlatform::new(cloud.gateway().await, config());

    let report = platform.discover().await.unwrap();
    assert_eq!(report.added, vec![LOCK]);
    assert_eq!(platform.lock_ids(), vec![LOCK]);

    let coordinator = platform.coordinator(LOCK).unwrap();
    assert_eq!(coordinator.snapshot().passcodes.len(), 1);
    assert!(coordinator.is_polling());
    assert_eq!(
        drain(&mut events),
        vec![BridgeEvent::Added {
            lock_id: LOCK,
            name: "Front door".to_string()
        }]
    );

    // A second sweep does not register it again.
    let report = platform.discover().await.unwrap();
    assert!(report.added.is_empty());
    assert_eq!(cloud.mock.call_count(PATH_LOCK_DETAIL), 1);

    platform.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_absent_lock_is_removed_for_good() {
    let cloud = FakeCloud::new(&[]);
    let (platform, mut events) = LockPlatform::new(cloud.gateway().await, config());
    platform.discover().await.unwrap();
    let coordinator = platform.coordinator(LOCK).unwrap();

    cloud.with_state(|s| s.present = false);

    // Absent, but not yet for longer than the offline interval.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let report = platform.discover().await.unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(platform.lock_ids(), vec![LOCK]);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let report = platform.discover().await.unwrap();
    assert_eq!(report.removed, vec![LOCK]);
    assert!(platform.lock_ids().is_empty());
    assert!(platform.is_removed(LOCK));
    assert_eq!(coordinator.state(), DeviceState::Removed);
    assert!(!coordinator.is_polling());
    assert!(drain(&mut events).contains(&BridgeEvent::Removed { lock_id: LOCK }));

    // Let a poll that raced the removal finish.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // It comes back in the listing, but stays gone.
    cloud.with_state(|s| s.present = true);
    cloud.mock.clear_calls();
    let report = platform.discover().await.unwrap();
    assert!(report.added.is_empty());
    assert!(platform.lock_ids().is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(cloud.mock.call_count(PATH_LOCK_BATTERY), 0);
    assert_eq!(cloud.mock.call_count(PATH_LOCK_DETAIL), 0);

    platform.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_lock_reconnects_when_seen() {
    let cloud = FakeCloud::new(&[]);
    let (platform, mut events) = LockPlatform::new(cloud.gateway().await, config());
    platform.discover().await.unwrap();
    let coordinator = platform.coordinator(LOCK).unwrap();

    cloud.with_state(|s| s.failing = true);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(coordinator.state(), DeviceState::Offline);

    cloud.with_state(|s| s.failing = false);
    let report = platform.discover().await.unwrap();

    assert_eq!(report.reconnected, vec![LOCK]);
    assert_eq!(coordinator.state(), DeviceState::Online);
    assert!(coordinator.is_polling());
    let events = drain(&mut events);
    assert!(events.contains(&BridgeEvent::Changed {
        lock_id: LOCK,
        attribute: Attribute::Reachable(true)
    }));

    platform.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_listing_keeps_registry() {
    let cloud = FakeCloud::new(&[]);
    let (platform, _events) = LockPlatform::new(cloud.gateway().await, config());
    platform.discover().await.unwrap();

    cloud.mock.push(
        PATH_LOCK_LIST,
        lockbridge_network::mock::MockReply::error(1, "failed"),
    );
    assert!(platform.discover().await.is_err());
    assert_eq!(platform.lock_ids(), vec![LOCK]);

    platform.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_run_sweeps_until_shutdown() {
    let cloud = FakeCloud::new(&[]);
    let (platform, _events) = LockPlatform::new(cloud.gateway().await, config());
    let platform = Arc::new(platform);

    let runner = {
        let platform = Arc::clone(&platform);
        tokio::spawn(async move { platform.run().await })
    };

    tokio::time::sleep(Duration::from_secs(11)).await;
    // Immediate sweep plus one every five seconds.
    assert_eq!(cloud.mock.call_count(PATH_LOCK_LIST), 3);

    platform.shutdown().await;
    runner.await.unwrap();
    assert!(platform.shutdown_token().is_cancelled());
}
