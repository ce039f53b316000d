//! Integration tests for synchronized start and immediate stop.
//!
//! Timing tests run on a paused clock: the runtime jumps straight to the
//! next timer when idle, so a 5 s lead time costs nothing and every instant
//! a mock device records is exact.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

mod common;

use std::time::Duration;

use common::{add_and_connect, device, key, quiet_settings, spawn_controller, Behavior, MockFleet};
use syncrec_core::{ConnectionStatus, DeviceStatus, TransportAction, TransportTarget};
use syncrec_protocol::osc;
use syncrecd::controller::ControllerSettings;
use syncrecd::events::DeviceEvent;
use syncrecd::health::HealthMonitor;
use syncrecd::orchestrator::{
    ActionOutcome, ActionTarget, CycleState, RecordingError, RecordingTiming, DEFAULT_LEAD_TIME,
};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

// ============================================================================
// Helpers
// ============================================================================

/// Every log message currently buffered on `rx`.
fn drain_logs(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<String> {
    let mut logs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let DeviceEvent::Log { message } = event {
            logs.push(message);
        }
    }
    logs
}

fn status_of<'a>(devices: &'a [DeviceStatus], n: u16) -> &'a DeviceStatus {
    devices
        .iter()
        .find(|d| d.key() == key(n))
        .unwrap_or_else(|| panic!("device {n} not listed"))
}

// ============================================================================
// Synchronized start
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_fires_every_device_at_one_instant() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 3).await;

    let requested = Instant::now();
    let cycle = controller.orchestrator().start_recording().await.unwrap();

    // Returns before anything fires.
    assert!(Instant::now() < cycle.fire_at);
    assert!(cycle.fire_at >= requested + DEFAULT_LEAD_TIME);
    assert_eq!(cycle.device_count(), 3);
    assert!(!cycle.has_transport());
    assert!(cycle.actions().all(|a| a.fire_at == cycle.fire_at));
    assert!(fleet.starts().is_empty());
    assert!(matches!(
        controller.orchestrator().state().await,
        CycleState::Scheduled { .. }
    ));

    let fire_at = cycle.fire_at;
    let outcomes = cycle.wait().await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_success()));

    let starts = fleet.starts();
    assert_eq!(starts.len(), 3);
    assert!(starts.iter().all(|(_, at)| *at >= fire_at));
    assert!(starts.iter().all(|(_, at)| *at == starts[0].1));

    let devices = controller.pool().list_devices().await;
    assert!(devices.iter().all(|d| d.recording));
    assert_eq!(controller.orchestrator().state().await, CycleState::Idle);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_start_with_nothing_connected_schedules_nothing() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    controller.pool().add_device(device(1)).await.unwrap();

    let cycle = controller.orchestrator().start_recording().await.unwrap();
    assert_eq!(cycle.device_count(), 0);
    assert!(cycle.wait().await.is_empty());
    assert!(fleet.starts().is_empty());

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_second_start_rejected_while_pending() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 1).await;

    let first = controller.orchestrator().start_recording().await.unwrap();
    sleep(Duration::from_secs(2)).await;

    let err = controller.orchestrator().start_recording().await.unwrap_err();
    assert_eq!(err, RecordingError::StartAlreadyScheduled { remaining_ms: 3000 });
    assert_eq!(err.code(), "start_already_scheduled");

    // The first cycle is untouched and still fires once.
    first.wait().await;
    assert_eq!(fleet.starts().len(), 1);

    // Once it has fired, a new start is accepted.
    let again = controller.orchestrator().start_recording().await.unwrap();
    again.wait().await;
    assert_eq!(fleet.starts().len(), 2);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_is_isolated() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 3).await;
    fleet.set(&key(2), Behavior { fail_start: true, ..Behavior::default() });
    let mut events = controller.events().receiver();

    let outcomes = controller
        .orchestrator()
        .start_recording()
        .await
        .unwrap()
        .wait()
        .await;

    let failed: Vec<_> = outcomes
        .iter()
        .filter(|(_, outcome)| !outcome.is_success())
        .map(|(action, _)| action.target.clone())
        .collect();
    assert_eq!(failed, vec![ActionTarget::Device(key(2))]);

    let devices = controller.pool().list_devices().await;
    assert!(status_of(&devices, 1).recording);
    assert!(!status_of(&devices, 2).recording);
    assert!(status_of(&devices, 3).recording);

    let logs = drain_logs(&mut events);
    assert!(logs.iter().any(|l| l.starts_with("Recording scheduled to start at ")));
    assert!(logs
        .iter()
        .any(|l| l.starts_with("Error starting recording on host2:2")));

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_hanging_start_times_out() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 2).await;
    fleet.set(&key(1), Behavior { hang_start: true, ..Behavior::default() });

    let cycle = controller.orchestrator().start_recording().await.unwrap();
    let fire_at = cycle.fire_at;
    let outcomes = cycle.wait().await;

    let hung = outcomes
        .iter()
        .find(|(action, _)| action.target == ActionTarget::Device(key(1)))
        .map(|(_, outcome)| outcome.clone())
        .unwrap();
    match hung {
        ActionOutcome::Failed(message) => assert!(message.contains("timed out after 3000ms")),
        other => panic!("Expected failure, got {other:?}"),
    }
    // The other device was not held up by the hung one.
    assert_eq!(fleet.starts(), vec![(key(2), fire_at)]);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_device_disconnected_before_fire_is_skipped() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 2).await;

    let cycle = controller.orchestrator().start_recording().await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert!(controller.pool().disconnect(&key(2)).await.unwrap());

    let outcomes = cycle.wait().await;
    let skipped = outcomes
        .iter()
        .find(|(action, _)| action.target == ActionTarget::Device(key(2)))
        .map(|(_, outcome)| outcome.clone())
        .unwrap();
    assert!(matches!(skipped, ActionOutcome::Failed(ref m) if m.contains("not connected")));
    assert!(fleet.started(&key(1)));
    assert!(!fleet.started(&key(2)));

    cancel.cancel();
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_start() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 2).await;
    let mut events = controller.events().receiver();

    let cycle = controller.orchestrator().start_recording().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let summary = controller.orchestrator().stop_recording().await;
    assert_eq!(summary.cancelled, 2);
    assert_eq!(summary.stopped, 2);
    assert_eq!(summary.failed, 0);

    let outcomes = cycle.wait().await;
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| *outcome == ActionOutcome::Cancelled));

    // Well past the original fire instant: nothing ever started.
    sleep(Duration::from_secs(10)).await;
    assert!(fleet.starts().is_empty());
    assert_eq!(controller.orchestrator().state().await, CycleState::Idle);

    let logs = drain_logs(&mut events);
    assert!(logs.contains(&"Cancelled pending start (2 actions)".to_string()));

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_immediate_and_unconditional() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 2).await;

    // Nothing is recording, stop is still sent to everyone.
    let before = Instant::now();
    let summary = controller.orchestrator().stop_recording().await;
    assert_eq!(summary.stopped, 2);
    assert_eq!(summary.cancelled, 0);

    let stops = fleet.stops();
    assert_eq!(stops.len(), 2);
    assert!(stops.iter().all(|(_, at)| *at == before));

    cancel.cancel();
}

// ============================================================================
// Transport target
// ============================================================================

#[tokio::test]
async fn test_transport_receives_begin_and_stop() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let fleet = MockFleet::new();
    let settings = ControllerSettings {
        timing: RecordingTiming {
            lead_time: Duration::from_millis(50),
            command_timeout: Duration::from_secs(1),
        },
        transport: Some(TransportTarget::new("127.0.0.1", port).unwrap()),
        ..quiet_settings()
    };
    let (controller, cancel) = spawn_controller(&fleet, settings);
    add_and_connect(&controller, 1).await;

    let cycle = controller.orchestrator().start_recording().await.unwrap();
    assert!(cycle.has_transport());
    assert_eq!(cycle.device_count(), 1);

    let mut buf = [0u8; 64];
    let len = timeout(Duration::from_secs(2), listener.recv(&mut buf))
        .await
        .expect("begin record datagram")
        .unwrap();
    assert_eq!(&buf[..len], osc::encode_action(TransportAction::BeginRecord).as_slice());
    cycle.wait().await;

    controller.orchestrator().stop_recording().await;
    let len = timeout(Duration::from_secs(2), listener.recv(&mut buf))
        .await
        .expect("stop record datagram")
        .unwrap();
    assert_eq!(&buf[..len], osc::encode_action(TransportAction::StopRecord).as_slice());

    cancel.cancel();
}

// ============================================================================
// Example scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_added_devices_start_disconnected() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    controller.pool().add_device(device(1)).await.unwrap();
    controller.pool().add_device(device(2)).await.unwrap();

    let devices = controller.pool().list_devices().await;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].key(), key(1));
    assert_eq!(devices[1].key(), key(2));
    assert!(devices
        .iter()
        .all(|d| d.status == ConnectionStatus::Disconnected && !d.recording));

    cancel.cancel();
}

#[tokio::test]
async fn test_scenario_connect_all_with_bad_credentials() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    controller.pool().add_device(device(1)).await.unwrap();
    controller.pool().add_device(device(2)).await.unwrap();
    fleet.set(&key(2), Behavior { refuse_connect: true, ..Behavior::default() });

    let mut events = controller.events().receiver();
    let summary = controller.pool().connect_all().await;
    assert_eq!(summary.connected, 1);
    assert_eq!(summary.failed, 1);

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DeviceEvent::Status(status) = event {
            statuses.push(status);
        }
    }
    assert_eq!(statuses.len(), 2);
    let a = statuses.iter().find(|s| s.key() == key(1)).unwrap();
    let b = statuses.iter().find(|s| s.key() == key(2)).unwrap();
    assert_eq!(a.status, ConnectionStatus::Connected);
    assert_eq!(b.status, ConnectionStatus::Disconnected);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_scenario_eviction_during_lead_time() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 2).await;

    let cycle = controller.orchestrator().start_recording().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    fleet.set(&key(2), Behavior { dead: true, ..Behavior::default() });
    let monitor = HealthMonitor::new(
        controller.pool().clone(),
        Duration::from_secs(5),
        Duration::from_secs(3),
    );
    let report = monitor.scan_once().await;
    assert_eq!(report.evicted, vec![key(2)]);
    assert!(Instant::now() < cycle.fire_at);

    cycle.wait().await;

    let devices = controller.pool().list_devices().await;
    assert!(status_of(&devices, 1).recording);
    assert_eq!(status_of(&devices, 2).status, ConnectionStatus::Disconnected);
    assert!(!status_of(&devices, 2).recording);
    assert!(!fleet.started(&key(2)));

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_scenario_stop_failure_leaves_flag() {
    let fleet = MockFleet::new();
    let (controller, cancel) = spawn_controller(&fleet, quiet_settings());
    add_and_connect(&controller, 2).await;
    controller
        .orchestrator()
        .start_recording()
        .await
        .unwrap()
        .wait()
        .await;

    fleet.set(&key(2), Behavior { fail_stop: true, ..Behavior::default() });
    let mut events = controller.events().receiver();

    let summary = controller.orchestrator().stop_recording().await;
    assert_eq!(summary.stopped, 1);
    assert_eq!(summary.failed, 1);

    let devices = controller.pool().list_devices().await;
    assert!(!status_of(&devices, 1).recording);
    assert_eq!(status_of(&devices, 1).status, ConnectionStatus::Connected);
    assert!(status_of(&devices, 2).recording);

    let logs = drain_logs(&mut events);
    assert!(logs.contains(&"Recording saved to /recordings/host1.mkv".to_string()));
    assert!(logs
        .iter()
        .any(|l| l.starts_with("Error stopping recording on host2:2")));

    cancel.cancel();
}
