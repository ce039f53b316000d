//! Pool actor - owns the registry and every live session.
//!
//! The PoolActor is the single owner of device state in the daemon.
//! It receives commands via an mpsc channel and publishes status changes
//! via the [`EventBroadcaster`].
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Response send failures are ignored (the caller went away)

use std::collections::{HashMap, HashSet};

use syncrec_core::{DeviceDescriptor, DeviceKey, DeviceStatus, TransportTarget};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::commands::{ConnectPlan, ConnectionSnapshot, PoolCommand, PoolError};
use crate::events::{EventBroadcaster, Subscription};
use crate::registry::DeviceRegistry;
use crate::session::SharedSession;

// ============================================================================
// Connection State
// ============================================================================

/// A live session and what the daemon knows about it.
#[derive(Debug)]
struct ConnectionState {
    session: SharedSession,
    recording: bool,
    generation: u64,
}

// ============================================================================
// Pool Actor
// ============================================================================

/// The pool actor - owns device state.
///
/// # Ownership
///
/// The actor owns:
/// - `registry`: the durable descriptor list
/// - `connections`: live sessions keyed by device; always a subset of the registry
/// - `connecting`: devices with a connection attempt outstanding
/// - `transport`: the external transport target, if any
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// It never awaits network I/O, so one slow device cannot stall the others.
pub struct PoolActor {
    receiver: mpsc::Receiver<PoolCommand>,
    registry: DeviceRegistry,
    connections: HashMap<DeviceKey, ConnectionState>,
    connecting: HashSet<DeviceKey>,
    transport: Option<TransportTarget>,
    next_generation: u64,
    events: EventBroadcaster,
}

impl PoolActor {
    /// Creates a new pool actor.
    pub fn new(
        receiver: mpsc::Receiver<PoolCommand>,
        registry: DeviceRegistry,
        transport: Option<TransportTarget>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            receiver,
            registry,
            connections: HashMap::new(),
            connecting: HashSet::new(),
            transport,
            next_generation: 1,
            events,
        }
    }

    /// Runs the actor event loop until every sender is dropped.
    pub async fn run(mut self) {
        info!(devices = self.registry.len(), "Pool actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.connections.len(),
            "Pool actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: PoolCommand) {
        match cmd {
            PoolCommand::AddDevice {
                descriptor,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_add(descriptor));
            }
            PoolCommand::RemoveDevice { key, respond_to } => {
                let _ = respond_to.send(self.handle_remove(&key));
            }
            PoolCommand::ListDevices { respond_to } => {
                let _ = respond_to.send(self.statuses());
            }
            PoolCommand::ListDescriptors { respond_to } => {
                let _ = respond_to.send(self.registry.list().to_vec());
            }
            PoolCommand::BeginConnect { key, respond_to } => {
                let _ = respond_to.send(self.handle_begin_connect(key));
            }
            PoolCommand::FinishConnect {
                key,
                outcome,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_finish_connect(key, outcome));
            }
            PoolCommand::Disconnect { key, respond_to } => {
                let _ = respond_to.send(self.handle_disconnect(&key));
            }
            PoolCommand::Evict {
                key,
                generation,
                reason,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_evict(&key, generation, &reason));
            }
            PoolCommand::Get { key, respond_to } => {
                let _ = respond_to.send(self.snapshot_of(&key));
            }
            PoolCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot_all());
            }
            PoolCommand::SetRecording {
                key,
                generation,
                recording,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_set_recording(&key, generation, recording));
            }
            PoolCommand::Subscribe { respond_to } => {
                // Receiver first, then replay: nothing published after the
                // snapshot can be missed, because no command runs in between.
                let receiver = self.events.receiver();
                let _ = respond_to.send(Subscription::new(self.statuses(), receiver));
            }
            PoolCommand::SetTransport { target, respond_to } => {
                match &target {
                    Some(t) => info!(target = %t, "Transport target set"),
                    None => info!("Transport target cleared"),
                }
                self.transport = target;
                let _ = respond_to.send(());
            }
            PoolCommand::GetTransport { respond_to } => {
                let _ = respond_to.send(self.transport.clone());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    fn handle_add(&mut self, descriptor: DeviceDescriptor) -> Result<(), PoolError> {
        let status = DeviceStatus::disconnected(&descriptor);
        self.registry.add(descriptor)?;

        info!(device = %status.key(), name = %status.name, "Device added");
        self.events.status(status);
        self.report_persist_error();
        Ok(())
    }

    fn handle_remove(&mut self, key: &DeviceKey) -> Option<SharedSession> {
        let session = self.detach(key);

        match self.registry.remove(key) {
            Some(descriptor) => {
                info!(device = %key, name = %descriptor.name, "Device removed");
            }
            None => debug!(device = %key, "Remove of unregistered device ignored"),
        }
        self.report_persist_error();

        session
    }

    fn report_persist_error(&mut self) {
        if let Some(error) = self.registry.take_persist_error() {
            self.events.log(format!("Failed to save device list: {error}"));
        }
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    fn handle_begin_connect(&mut self, key: DeviceKey) -> Result<ConnectPlan, PoolError> {
        if self.connections.contains_key(&key) {
            debug!(device = %key, "Already connected");
            return Ok(ConnectPlan::AlreadyConnected);
        }

        let descriptor = self
            .registry
            .get(&key)
            .cloned()
            .ok_or_else(|| PoolError::UnknownDevice(key.clone()))?;

        if !self.connecting.insert(key.clone()) {
            return Err(PoolError::ConnectInProgress(key));
        }

        debug!(device = %key, "Connection attempt started");
        Ok(ConnectPlan::Establish(descriptor))
    }

    fn handle_finish_connect(
        &mut self,
        key: DeviceKey,
        outcome: Result<SharedSession, String>,
    ) -> Result<(), PoolError> {
        self.connecting.remove(&key);

        let session = match outcome {
            Ok(session) => session,
            Err(reason) => {
                warn!(device = %key, %reason, "Connection attempt failed");
                if let Some(descriptor) = self.registry.get(&key) {
                    self.events.status(DeviceStatus::disconnected(descriptor));
                }
                return Err(PoolError::ConnectionFailed { key, reason });
            }
        };

        // The device may have been removed while the attempt was in flight.
        let Some(descriptor) = self.registry.get(&key) else {
            debug!(device = %key, "Device removed during connect, closing new session");
            tokio::spawn(async move { session.close().await });
            return Err(PoolError::UnknownDevice(key));
        };
        let status = DeviceStatus::connected(descriptor, false);

        let generation = self.next_generation;
        self.next_generation += 1;

        if let Some(previous) = self.connections.insert(
            key.clone(),
            ConnectionState {
                session,
                recording: false,
                generation,
            },
        ) {
            tokio::spawn(async move { previous.session.close().await });
        }

        info!(device = %key, generation, "Device connected");
        self.events.status(status);
        Ok(())
    }

    fn handle_disconnect(&mut self, key: &DeviceKey) -> Option<SharedSession> {
        let session = self.detach(key);
        if session.is_some() {
            info!(device = %key, "Device disconnected");
        } else {
            debug!(device = %key, "Disconnect of device without a session ignored");
        }
        session
    }

    fn handle_evict(&mut self, key: &DeviceKey, generation: u64, reason: &str) -> bool {
        let current = self.connections.get(key).map(|state| state.generation);
        if current != Some(generation) {
            debug!(device = %key, generation, "Stale eviction ignored");
            return false;
        }

        // No close handshake with a dead peer; the last clone dropped
        // releases the socket.
        drop(self.detach(key));

        warn!(device = %key, %reason, "Connection lost");
        self.events.log(format!("Connection to {key} lost: {reason}"));
        true
    }

    fn handle_set_recording(&mut self, key: &DeviceKey, generation: u64, recording: bool) -> bool {
        let Some(state) = self.connections.get_mut(key) else {
            return false;
        };
        if state.generation != generation {
            return false;
        }
        state.recording = recording;

        if let Some(descriptor) = self.registry.get(key) {
            self.events.status(DeviceStatus::connected(descriptor, recording));
        }
        true
    }

    /// Removes the live session for `key`, publishing the Disconnected status.
    fn detach(&mut self, key: &DeviceKey) -> Option<SharedSession> {
        let state = self.connections.remove(key)?;
        if let Some(descriptor) = self.registry.get(key) {
            self.events.status(DeviceStatus::disconnected(descriptor));
        }
        Some(state.session)
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    fn statuses(&self) -> Vec<DeviceStatus> {
        self.registry
            .list()
            .iter()
            .map(|descriptor| match self.connections.get(&descriptor.key()) {
                Some(state) => DeviceStatus::connected(descriptor, state.recording),
                None => DeviceStatus::disconnected(descriptor),
            })
            .collect()
    }

    fn snapshot_of(&self, key: &DeviceKey) -> Option<ConnectionSnapshot> {
        let state = self.connections.get(key)?;
        let name = self
            .registry
            .get(key)
            .map(|d| d.display_name())
            .unwrap_or_else(|| key.to_string());

        Some(ConnectionSnapshot {
            key: key.clone(),
            name,
            session: state.session.clone(),
            generation: state.generation,
            recording: state.recording,
        })
    }

    /// Live sessions in registration order.
    fn snapshot_all(&self) -> Vec<ConnectionSnapshot> {
        self.registry
            .list()
            .iter()
            .filter_map(|descriptor| self.snapshot_of(&descriptor.key()))
            .collect()
    }
}
