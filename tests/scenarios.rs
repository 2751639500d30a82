//! End-to-end behaviour of the node against recording fake radios.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, oneshot};
use tokio_test::{assert_err, assert_ok};

use common::{
    candidate, init_tracing, CentralCommand, FakeCentral, FakePeripheral, PeripheralCommand,
};
use dual_role_ble::ble::uuids::{CONFIGURATION_CHARACTERISTIC_UUID, SESSION_CHARACTERISTIC_UUID};
use dual_role_ble::{
    Address, CharProperties, ConnHandle, ConnectionDescriptor, ConnectionParams, DiscoveryOutcome,
    Disposition, Error, NodeConfig, NotifyTimer, RadioEvent, RadioEventLoop, Role,
    SecurityConfig, SubscriptionMode,
};

type Node = RadioEventLoop<FakeCentral, FakePeripheral>;

fn node_with(
    config: NodeConfig,
    central: FakeCentral,
) -> (Node, Arc<FakeCentral>, Arc<FakePeripheral>) {
    init_tracing();
    let central = Arc::new(central);
    let peripheral = Arc::new(FakePeripheral::new());
    let node = RadioEventLoop::new(config, central.clone(), peripheral.clone());
    (node, central, peripheral)
}

fn inbound(handle: u16, encrypted: bool) -> ConnectionDescriptor {
    ConnectionDescriptor {
        handle: ConnHandle(handle),
        peer: Address::new([0xc0, 0, 0, 0, 0, handle as u8]),
        role: Role::Peripheral,
        encrypted,
    }
}

fn outbound(handle: ConnHandle, encrypted: bool) -> ConnectionDescriptor {
    ConnectionDescriptor {
        handle,
        peer: Address::new([0xd0, 0, 0, 0, 0, handle.0 as u8]),
        role: Role::Central,
        encrypted,
    }
}

async fn connect_candidate(node: &mut Node, byte: u8) -> dual_role_ble::Result<ConnHandle> {
    node.dispatch(RadioEvent::AdvertisementReport(candidate(byte)))
        .await
        .unwrap();
    node.update_at(Instant::now())
        .await
        .expect("candidate should be pending")
}

#[tokio::test]
async fn test_discovered_peer_is_configured_and_pushes_are_dispatched() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    node.start().await.unwrap();
    let mut notifications = node.subscribe_notifications();

    node.dispatch(RadioEvent::AdvertisementReport(candidate(0xa1)))
        .await
        .unwrap();
    assert!(node.pending().is_pending());
    assert!(!central.is_scanning());

    central.clear();
    let handle = node.update_at(Instant::now()).await.unwrap().unwrap();

    let characteristic = CONFIGURATION_CHARACTERISTIC_UUID;
    assert_eq!(
        central.commands(),
        vec![
            CentralCommand::Connect {
                address: candidate(0xa1).address,
                params: ConnectionParams::INITIAL_CLIENT,
                refresh_cache: true,
            },
            CentralCommand::UpdateParams(handle, ConnectionParams::RELAXED_CLIENT),
            CentralCommand::Read(handle, characteristic),
            CentralCommand::Write(handle, characteristic, b"No tip!".to_vec()),
            CentralCommand::Read(handle, characteristic),
            CentralCommand::Subscribe(handle, characteristic, SubscriptionMode::Notify),
            CentralCommand::StartScan,
        ]
    );

    let report = node.pool().last_report().unwrap();
    assert_eq!(report.initial_value, Some(Bytes::from_static(b"value")));
    assert_eq!(report.value_after_write, Some(Bytes::from_static(b"No tip!")));
    assert_eq!(report.outcome, DiscoveryOutcome::Subscribed(SubscriptionMode::Notify));
    assert!(central.is_scanning());

    // Keep-alive is swallowed.
    node.dispatch(RadioEvent::RemoteNotification {
        handle,
        characteristic,
        value: Bytes::from_static(&[0]),
        is_notify: true,
    })
    .await
    .unwrap();
    assert!(notifications.try_recv().is_err());

    node.dispatch(RadioEvent::RemoteNotification {
        handle,
        characteristic,
        value: Bytes::from_static(&[1, 2, 3, 4, 5]),
        is_notify: true,
    })
    .await
    .unwrap();

    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.handle, handle);
    assert_eq!(notification.peer, candidate(0xa1).address);
    assert_eq!(notification.mode, SubscriptionMode::Notify);
    assert_eq!(notification.payload.as_ref(), &[1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_fourth_peer_exceeds_capacity() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());

    for byte in 1..=3 {
        connect_candidate(&mut node, byte).await.unwrap();
    }
    assert_eq!(node.pool().len(), 3);

    let result = connect_candidate(&mut node, 4).await;
    assert!(matches!(result, Err(Error::CapacityExceeded { max: 3 })));
    assert_eq!(node.pool().len(), 3);
    assert_eq!(node.pool().connected_count(), 3);
    assert_eq!(
        central.count(|c| matches!(c, CentralCommand::Connect { .. })),
        3
    );
    // Scanning resumes even when the pool is full.
    assert!(central.is_scanning());
}

#[tokio::test]
async fn test_unencrypted_central_is_dropped_and_advertising_resumes() {
    let (mut node, _central, peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    node.start().await.unwrap();

    node.dispatch(RadioEvent::PeerConnected(inbound(7, false)))
        .await
        .unwrap();
    peripheral.stop_advertising();
    peripheral.clear();

    let result = node
        .dispatch(RadioEvent::AuthenticationComplete(inbound(7, false)))
        .await;
    assert!(matches!(result, Err(Error::EncryptionFailed { handle }) if handle == ConnHandle(7)));
    assert_eq!(peripheral.commands(), vec![PeripheralCommand::Disconnect(ConnHandle(7))]);

    // Nothing is served on the dropped link.
    let (tx, rx) = oneshot::channel();
    assert_err!(
        node.dispatch(RadioEvent::CharacteristicRead {
            handle: ConnHandle(7),
            characteristic: SESSION_CHARACTERISTIC_UUID,
            reply: Some(tx),
        })
        .await
    );
    assert_eq!(rx.await.unwrap(), None);

    node.dispatch(RadioEvent::PeerDisconnected { handle: ConnHandle(7) })
        .await
        .unwrap();
    assert!(peripheral.is_advertising());
    assert!(node.server().peer(ConnHandle(7)).is_none());
}

#[tokio::test]
async fn test_encrypted_central_reads_session_value() {
    let (mut node, _central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    node.start().await.unwrap();

    node.dispatch(RadioEvent::PeerConnected(inbound(3, true)))
        .await
        .unwrap();
    node.dispatch(RadioEvent::AuthenticationComplete(inbound(3, true)))
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    node.dispatch(RadioEvent::CharacteristicRead {
        handle: ConnHandle(3),
        characteristic: SESSION_CHARACTERISTIC_UUID,
        reply: Some(tx),
    })
    .await
    .unwrap();
    assert_eq!(rx.await.unwrap(), Some(Bytes::from_static(b"Burger")));
    assert!(node.server().peer(ConnHandle(3)).unwrap().encrypted);
}

#[test]
fn test_notify_timer_cadence() {
    let mut timer = NotifyTimer::new(Duration::from_millis(100));
    let t0 = Instant::now();

    assert!(timer.fire(t0));
    assert!(!timer.fire(t0 + Duration::from_millis(60)));
    assert!(timer.fire(t0 + Duration::from_millis(110)));
}

#[tokio::test]
async fn test_periodic_notify_follows_timer() {
    let config = NodeConfig::default().with_periodic_notify(Duration::from_millis(100));
    let (mut node, _central, peripheral) = node_with(config, FakeCentral::new());
    node.start().await.unwrap();
    node.dispatch(RadioEvent::PeerConnected(inbound(1, true)))
        .await
        .unwrap();
    peripheral.clear();

    let t0 = Instant::now();
    assert!(node.update_at(t0).await.is_none());
    node.update_at(t0 + Duration::from_millis(60)).await;
    node.update_at(t0 + Duration::from_millis(110)).await;

    let notifies = peripheral.count(|c| {
        matches!(c, PeripheralCommand::Notify(uuid, _) if *uuid == SESSION_CHARACTERISTIC_UUID)
    });
    assert_eq!(notifies, 2);
}

#[tokio::test]
async fn test_periodic_notify_off_by_default() {
    let (mut node, _central, peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    node.start().await.unwrap();
    node.dispatch(RadioEvent::PeerConnected(inbound(1, true)))
        .await
        .unwrap();

    let t0 = Instant::now();
    node.update_at(t0).await;
    node.update_at(t0 + Duration::from_millis(500)).await;

    assert_eq!(peripheral.count(|c| matches!(c, PeripheralCommand::Notify(..))), 0);
}

#[tokio::test]
async fn test_scan_restarts_after_every_client_disconnect() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let handle = connect_candidate(&mut node, 9).await.unwrap();

    for _ in 0..3 {
        central.clear();
        node.dispatch(RadioEvent::ScanEnded).await.unwrap();
        node.dispatch(RadioEvent::ClientDisconnected { handle })
            .await
            .unwrap();
        assert_eq!(central.commands(), vec![CentralCommand::StartScan]);
        assert!(node.scanner().is_scanning());
    }

    // Unknown handles still restart the scan.
    central.clear();
    node.dispatch(RadioEvent::ClientDisconnected { handle: ConnHandle(99) })
        .await
        .unwrap();
    assert_eq!(central.commands(), vec![CentralCommand::StartScan]);
}

#[tokio::test]
async fn test_advertising_restarts_after_every_peer_disconnect() {
    let config = NodeConfig::default().with_multi_connect(false);
    let (mut node, _central, peripheral) = node_with(config, FakeCentral::new());
    node.start().await.unwrap();

    for handle in 1..=3 {
        node.dispatch(RadioEvent::PeerConnected(inbound(handle, true)))
            .await
            .unwrap();
        peripheral.stop_advertising();
        node.dispatch(RadioEvent::PeerDisconnected {
            handle: ConnHandle(handle),
        })
        .await
        .unwrap();
        assert!(peripheral.is_advertising());
    }
}

#[tokio::test]
async fn test_returning_peer_reuses_its_slot() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let first = connect_candidate(&mut node, 5).await.unwrap();
    connect_candidate(&mut node, 6).await.unwrap();

    node.dispatch(RadioEvent::ClientDisconnected { handle: first })
        .await
        .unwrap();
    central.clear();

    connect_candidate(&mut node, 5).await.unwrap();

    assert_eq!(node.pool().len(), 2);
    let addresses: Vec<Address> = node.pool().slots().iter().map(|s| s.address()).collect();
    assert_eq!(addresses, vec![candidate(5).address, candidate(6).address]);
    assert!(central.commands().contains(&CentralCommand::Connect {
        address: candidate(5).address,
        params: ConnectionParams::INITIAL_CLIENT,
        refresh_cache: false,
    }));
}

#[tokio::test]
async fn test_repeated_adverts_never_duplicate_slots() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());

    for _ in 0..4 {
        for byte in [1, 2, 1, 2] {
            connect_candidate(&mut node, byte).await.unwrap();
        }
    }

    assert_eq!(node.pool().len(), 2);
    assert_eq!(
        central.count(|c| matches!(c, CentralCommand::Connect { .. })),
        2
    );
}

#[tokio::test]
async fn test_write_failure_disconnects_link() {
    let central = FakeCentral::new();
    central.fail_write.store(true, Ordering::SeqCst);
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), central);

    let result = connect_candidate(&mut node, 1).await;
    assert!(matches!(result, Err(Error::WriteFailed { .. })));
    assert_eq!(central.count(|c| matches!(c, CentralCommand::Disconnect(_))), 1);
    assert_eq!(central.count(|c| matches!(c, CentralCommand::Subscribe(..))), 0);
    assert_eq!(node.pool().connected_count(), 0);
}

#[tokio::test]
async fn test_subscribe_failure_disconnects_link() {
    let central = FakeCentral::new();
    central.fail_subscribe.store(true, Ordering::SeqCst);
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), central);

    let result = connect_candidate(&mut node, 1).await;
    assert!(matches!(result, Err(Error::SubscribeFailed { .. })));
    assert_eq!(central.count(|c| matches!(c, CentralCommand::Disconnect(_))), 1);
    assert!(node.registry().read().is_empty());
}

#[tokio::test]
async fn test_missing_service_keeps_link_up() {
    let central = FakeCentral::new();
    *central.service.lock() = None;
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), central);

    let handle = assert_ok!(connect_candidate(&mut node, 1).await);
    assert_eq!(node.pool().last_report().unwrap().outcome, DiscoveryOutcome::ServiceNotFound);
    assert_eq!(central.count(|c| matches!(c, CentralCommand::Disconnect(_))), 0);
    assert!(node.pool().slot(handle).unwrap().is_connected());
}

#[tokio::test]
async fn test_indicate_used_without_notify() {
    let central = FakeCentral::with_properties(CharProperties::READ | CharProperties::INDICATE);
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), central);

    let handle = connect_candidate(&mut node, 1).await.unwrap();
    assert!(central.commands().contains(&CentralCommand::Subscribe(
        handle,
        CONFIGURATION_CHARACTERISTIC_UUID,
        SubscriptionMode::Indicate,
    )));
    assert_eq!(central.count(|c| matches!(c, CentralCommand::Write(..))), 0);
}

#[tokio::test]
async fn test_failed_connect_drops_new_slot() {
    let central = FakeCentral::new();
    central.fail_connect.store(true, Ordering::SeqCst);
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), central);

    let result = connect_candidate(&mut node, 1).await;
    assert!(matches!(result, Err(Error::ConnectFailed { .. })));
    assert!(node.pool().is_empty());
    assert!(central.is_scanning());
}

#[tokio::test]
async fn test_param_request_outside_bounds_rejected() {
    let (mut node, _central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());

    let (tx, rx) = oneshot::channel();
    node.dispatch(RadioEvent::ParamsUpdateRequest {
        handle: ConnHandle(1),
        params: ConnectionParams::new(24, 40, 2, 100),
        reply: Some(tx),
    })
    .await
    .unwrap();
    assert!(rx.await.unwrap());

    let (tx, rx) = oneshot::channel();
    node.dispatch(RadioEvent::ParamsUpdateRequest {
        handle: ConnHandle(1),
        params: ConnectionParams::new(12, 40, 0, 60),
        reply: Some(tx),
    })
    .await
    .unwrap();
    assert!(!rx.await.unwrap());
}

#[tokio::test]
async fn test_start_configures_pairing_before_serving() {
    let mut config = NodeConfig::default();
    config.security = SecurityConfig {
        bonding: true,
        mitm: true,
        secure_connections: true,
        ..SecurityConfig::default()
    };
    let expected = config.security.clone();
    let (mut node, _central, peripheral) = node_with(config, FakeCentral::new());

    node.start().await.unwrap();

    let commands = peripheral.commands();
    assert_eq!(commands[0], PeripheralCommand::ConfigureSecurity(expected));
    assert!(matches!(commands[1], PeripheralCommand::RegisterService(_)));
    assert!(matches!(commands[2], PeripheralCommand::StartAdvertising(_)));
}

#[tokio::test]
async fn test_unencrypted_client_link_is_torn_down() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let handle = connect_candidate(&mut node, 1).await.unwrap();
    central.clear();

    let result = node
        .dispatch(RadioEvent::AuthenticationComplete(outbound(handle, false)))
        .await;
    assert!(matches!(result, Err(Error::EncryptionFailed { handle: h }) if h == handle));
    assert_eq!(central.commands(), vec![CentralCommand::Disconnect(handle)]);
    assert_eq!(node.pool().len(), 1);
    assert_eq!(node.pool().connected_count(), 0);
    assert!(node.pool().slots()[0].is_idle());
    assert!(node.registry().read().is_empty());
}

#[tokio::test]
async fn test_unencrypted_untracked_client_link_is_torn_down() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());

    let result = node
        .dispatch(RadioEvent::AuthenticationComplete(outbound(ConnHandle(42), false)))
        .await;
    assert_err!(result);
    assert_eq!(central.commands(), vec![CentralCommand::Disconnect(ConnHandle(42))]);
}

#[tokio::test]
async fn test_encrypted_client_link_is_marked() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let handle = connect_candidate(&mut node, 1).await.unwrap();
    central.clear();

    assert_ok!(
        node.dispatch(RadioEvent::AuthenticationComplete(outbound(handle, true)))
            .await
    );
    assert!(node.pool().slot(handle).unwrap().encrypted);
    assert_eq!(central.count(|c| matches!(c, CentralCommand::Disconnect(_))), 0);
}

#[tokio::test]
async fn test_slow_connect_times_out_and_drops_slot() {
    let central = FakeCentral::new();
    *central.connect_delay.lock() = Some(Duration::from_millis(500));
    let config = NodeConfig::default().with_connect_timeout(Duration::from_millis(20));
    let (mut node, central, _peripheral) = node_with(config, central);

    let started = Instant::now();
    let result = connect_candidate(&mut node, 1).await;
    assert!(started.elapsed() < Duration::from_millis(500));

    match result {
        Err(Error::ConnectFailed { reason }) => assert!(reason.contains("timed out")),
        other => panic!("expected a connect timeout, got {:?}", other),
    }
    assert!(node.pool().is_empty());
    assert_eq!(central.count(|c| matches!(c, CentralCommand::Read(..))), 0);
    assert!(central.is_scanning());
}

#[tokio::test]
async fn test_run_connects_pending_candidate_then_exits_on_channel_close() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let (tx, rx) = mpsc::channel(8);
    tx.send(RadioEvent::AdvertisementReport(candidate(0xb2)))
        .await
        .unwrap();
    drop(tx);

    let finished = tokio::time::timeout(
        Duration::from_secs(2),
        node.run(rx, std::future::pending::<()>()),
    )
    .await;
    assert_ok!(finished);

    assert_eq!(node.pool().len(), 1);
    assert_eq!(node.pool().connected_count(), 1);
    assert!(!node.pending().is_pending());
    assert_eq!(
        central.count(|c| matches!(c, CentralCommand::Connect { .. })),
        1
    );
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let (mut node, _central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let (_tx, rx) = mpsc::channel::<RadioEvent>(8);

    let finished = tokio::time::timeout(
        Duration::from_secs(2),
        node.run(rx, tokio::time::sleep(Duration::from_millis(30))),
    )
    .await;
    assert_ok!(finished);
    assert!(node.pool().is_empty());
}

#[tokio::test]
async fn test_unsubscribed_pushes_are_ignored() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let handle = connect_candidate(&mut node, 1).await.unwrap();
    let mut notifications = node.subscribe_notifications();

    node.unsubscribe(handle, CONFIGURATION_CHARACTERISTIC_UUID)
        .await
        .unwrap();
    assert!(central.commands().contains(&CentralCommand::Unsubscribe(
        handle,
        CONFIGURATION_CHARACTERISTIC_UUID,
    )));

    let disposition = node.registry().read().handle_notification(
        handle,
        CONFIGURATION_CHARACTERISTIC_UUID,
        &Bytes::from_static(&[7, 7]),
        true,
    );
    assert_eq!(disposition, Disposition::Ignored);

    node.dispatch(RadioEvent::RemoteNotification {
        handle,
        characteristic: CONFIGURATION_CHARACTERISTIC_UUID,
        value: Bytes::from_static(&[1, 2]),
        is_notify: true,
    })
    .await
    .unwrap();
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_unsubscribe_unknown_characteristic_is_refused() {
    let (mut node, central, _peripheral) = node_with(NodeConfig::default(), FakeCentral::new());
    let handle = connect_candidate(&mut node, 1).await.unwrap();
    central.clear();

    let result = node.unsubscribe(handle, SESSION_CHARACTERISTIC_UUID).await;
    assert!(matches!(result, Err(Error::CharacteristicNotFound { .. })));
    assert!(central.commands().is_empty());
}
