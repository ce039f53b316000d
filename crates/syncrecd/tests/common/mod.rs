//! Shared fixtures for the daemon integration tests.
//!
//! `MockFleet` stands in for a room full of recording devices. Each device's
//! behavior can be changed at any time (refuse connections, fail or hang on
//! start/stop, stop answering liveness probes) and every start/stop that
//! reaches a device is recorded with the tokio instant it arrived at.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use syncrec_core::{DeviceDescriptor, DeviceKey};
use syncrecd::controller::{Controller, ControllerSettings};
use syncrecd::orchestrator::RecordingTiming;
use syncrecd::registry::DeviceRegistry;
use syncrecd::session::{DeviceConnector, DeviceSession, SessionError, SharedSession};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a mock device responds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// Connection attempts fail as if the password were wrong.
    pub refuse_connect: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    /// Start never answers.
    pub hang_start: bool,
    /// Liveness probes fail.
    pub dead: bool,
}

#[derive(Debug, Default)]
struct FleetState {
    behaviors: HashMap<DeviceKey, Behavior>,
    starts: Vec<(DeviceKey, Instant)>,
    stops: Vec<(DeviceKey, Instant)>,
    connects: HashMap<DeviceKey, usize>,
    closes: HashMap<DeviceKey, usize>,
}

/// Shared, inspectable state behind every mock session.
#[derive(Debug, Clone, Default)]
pub struct MockFleet {
    state: Arc<Mutex<FleetState>>,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &DeviceKey, behavior: Behavior) {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .insert(key.clone(), behavior);
    }

    pub fn update(&self, key: &DeviceKey, f: impl FnOnce(&mut Behavior)) {
        let mut state = self.state.lock().unwrap();
        f(state.behaviors.entry(key.clone()).or_default());
    }

    fn behavior(&self, key: &DeviceKey) -> Behavior {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    pub fn starts(&self) -> Vec<(DeviceKey, Instant)> {
        self.state.lock().unwrap().starts.clone()
    }

    pub fn stops(&self) -> Vec<(DeviceKey, Instant)> {
        self.state.lock().unwrap().stops.clone()
    }

    pub fn started(&self, key: &DeviceKey) -> bool {
        self.starts().iter().any(|(k, _)| k == key)
    }

    pub fn connect_count(&self, key: &DeviceKey) -> usize {
        self.state
            .lock()
            .unwrap()
            .connects
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn close_count(&self, key: &DeviceKey) -> usize {
        self.state
            .lock()
            .unwrap()
            .closes
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn connector(&self) -> Arc<dyn DeviceConnector> {
        Arc::new(MockConnector {
            fleet: self.clone(),
        })
    }
}

struct MockConnector {
    fleet: MockFleet,
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn connect(&self, descriptor: &DeviceDescriptor) -> Result<SharedSession, SessionError> {
        let key = descriptor.key();
        if self.fleet.behavior(&key).refuse_connect {
            return Err(SessionError::AuthenticationFailed(
                "Authentication failed.".to_string(),
            ));
        }

        *self
            .fleet
            .state
            .lock()
            .unwrap()
            .connects
            .entry(key.clone())
            .or_default() += 1;

        Ok(Arc::new(MockSession {
            key,
            fleet: self.fleet.clone(),
        }))
    }
}

#[derive(Debug)]
struct MockSession {
    key: DeviceKey,
    fleet: MockFleet,
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn version(&self) -> Result<String, SessionError> {
        if self.fleet.behavior(&self.key).dead {
            return Err(SessionError::Closed);
        }
        Ok("30.2.0".to_string())
    }

    async fn start_record(&self) -> Result<(), SessionError> {
        let behavior = self.fleet.behavior(&self.key);
        if behavior.hang_start {
            std::future::pending::<()>().await;
        }
        if behavior.fail_start {
            return Err(SessionError::Request("Output already active".to_string()));
        }
        self.fleet
            .state
            .lock()
            .unwrap()
            .starts
            .push((self.key.clone(), Instant::now()));
        Ok(())
    }

    async fn stop_record(&self) -> Result<Option<String>, SessionError> {
        if self.fleet.behavior(&self.key).fail_stop {
            return Err(SessionError::Request("Output not active".to_string()));
        }
        self.fleet
            .state
            .lock()
            .unwrap()
            .stops
            .push((self.key.clone(), Instant::now()));
        Ok(Some(format!("/recordings/{}.mkv", self.key.host())))
    }

    async fn close(&self) {
        *self
            .fleet
            .state
            .lock()
            .unwrap()
            .closes
            .entry(self.key.clone())
            .or_default() += 1;
    }
}

// ============================================================================
// Controller helpers
// ============================================================================

/// Settings with the default lead time and timeouts, and a health interval
/// long enough that the background monitor never interferes.
pub fn quiet_settings() -> ControllerSettings {
    ControllerSettings {
        timing: RecordingTiming::default(),
        health_interval: Duration::from_secs(3600),
        ..ControllerSettings::default()
    }
}

/// A controller over an in-memory registry and the given fleet.
pub fn spawn_controller(fleet: &MockFleet, settings: ControllerSettings) -> (Controller, CancellationToken) {
    let cancel = CancellationToken::new();
    let controller = Controller::spawn(
        DeviceRegistry::in_memory(),
        fleet.connector(),
        settings,
        cancel.clone(),
    );
    (controller, cancel)
}

/// Descriptor for device number `n` (`host{n}:{n}`, named `Cam {n}`).
pub fn device(n: u16) -> DeviceDescriptor {
    DeviceDescriptor::new(format!("host{n}"), n, "secret", format!("Cam {n}"))
}

pub fn key(n: u16) -> DeviceKey {
    DeviceKey::new(format!("host{n}"), n)
}

/// Adds devices `1..=count` and connects them all.
pub async fn add_and_connect(controller: &Controller, count: u16) -> Vec<DeviceKey> {
    let mut keys = Vec::new();
    for n in 1..=count {
        controller.pool().add_device(device(n)).await.unwrap();
        keys.push(key(n));
    }
    let summary = controller.pool().connect_all().await;
    assert_eq!(summary.connected, count as usize);
    keys
}
