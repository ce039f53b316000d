//! Client interface for interacting with the PoolActor.
//!
//! The `PoolHandle` provides a cheap-to-clone interface for sending commands
//! to the pool actor. Operations that touch the network (connecting, closing
//! sessions) run on the calling task or a task spawned from it, never on the
//! actor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `PoolError::ChannelClosed`

use std::sync::Arc;
use std::time::Duration;

use syncrec_core::{DeviceDescriptor, DeviceKey, DeviceStatus, TransportTarget};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::commands::{ConnectAllSummary, ConnectPlan, ConnectionSnapshot, PoolCommand, PoolError};
use crate::events::Subscription;
use crate::session::{with_timeout, DeviceConnector};

// ============================================================================
// Pool Handle
// ============================================================================

/// Handle for interacting with the pool actor.
///
/// # Usage
///
/// ```ignore
/// let pool = spawn_pool(registry, Arc::new(ObsConnector), settings);
///
/// pool.add_device(DeviceDescriptor::new("10.0.0.2", 4455, "pw", "Stage")).await?;
/// pool.connect(&DeviceKey::new("10.0.0.2", 4455)).await?;
///
/// for status in pool.list_devices().await {
///     println!("{} {}", status.name, status.status);
/// }
/// ```
#[derive(Clone)]
pub struct PoolHandle {
    sender: mpsc::Sender<PoolCommand>,
    connector: Arc<dyn DeviceConnector>,
    connect_timeout: Duration,
}

impl PoolHandle {
    /// Create a new pool handle.
    pub fn new(
        sender: mpsc::Sender<PoolCommand>,
        connector: Arc<dyn DeviceConnector>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            connector,
            connect_timeout,
        }
    }

    /// Sends a command built around a fresh oneshot and waits for the reply.
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PoolCommand,
    ) -> Result<T, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| PoolError::ChannelClosed)?;
        rx.await.map_err(|_| PoolError::ChannelClosed)
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Register a device. It starts out Disconnected.
    ///
    /// # Errors
    ///
    /// - `PoolError::DuplicateDevice` if the key is already registered
    /// - `PoolError::InvalidDevice` if the address is unusable
    /// - `PoolError::ChannelClosed` if the actor has shut down
    pub async fn add_device(&self, descriptor: DeviceDescriptor) -> Result<(), PoolError> {
        self.call(|respond_to| PoolCommand::AddDevice {
            descriptor,
            respond_to,
        })
        .await?
    }

    /// Unregister a device, closing its session first if it has one.
    ///
    /// Removing an unregistered device is a no-op.
    pub async fn remove_device(&self, key: &DeviceKey) -> Result<(), PoolError> {
        let session = self
            .call(|respond_to| PoolCommand::RemoveDevice {
                key: key.clone(),
                respond_to,
            })
            .await?;

        if let Some(session) = session {
            session.close().await;
        }
        Ok(())
    }

    /// Status of every registered device, in registration order.
    ///
    /// Returns an empty list if the actor has shut down.
    pub async fn list_devices(&self) -> Vec<DeviceStatus> {
        self.call(|respond_to| PoolCommand::ListDevices { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Every registered descriptor, in registration order.
    pub async fn list_descriptors(&self) -> Vec<DeviceDescriptor> {
        self.call(|respond_to| PoolCommand::ListDescriptors { respond_to })
            .await
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Open a session to a registered device.
    ///
    /// Idempotent: a device that is already connected is left untouched.
    /// The attempt runs on its own task, so dropping this future does not
    /// leave the device stuck as "connecting".
    ///
    /// # Errors
    ///
    /// - `PoolError::UnknownDevice` if the key is not registered
    /// - `PoolError::ConnectInProgress` if another attempt is outstanding
    /// - `PoolError::ConnectionFailed` on network, handshake or auth failure
    pub async fn connect(&self, key: &DeviceKey) -> Result<(), PoolError> {
        let plan = self
            .call(|respond_to| PoolCommand::BeginConnect {
                key: key.clone(),
                respond_to,
            })
            .await??;

        let descriptor = match plan {
            ConnectPlan::AlreadyConnected => return Ok(()),
            ConnectPlan::Establish(descriptor) => descriptor,
        };

        let pool = self.clone();
        let attempt = tokio::spawn(async move { pool.establish(descriptor).await });
        attempt.await.map_err(|e| PoolError::ConnectionFailed {
            key: key.clone(),
            reason: format!("connect task failed: {e}"),
        })?
    }

    async fn establish(&self, descriptor: DeviceDescriptor) -> Result<(), PoolError> {
        let key = descriptor.key();
        debug!(device = %key, "Connecting");

        let outcome = with_timeout(
            "connect",
            self.connect_timeout,
            self.connector.connect(&descriptor),
        )
        .await
        .map_err(|e| e.to_string());

        self.call(|respond_to| PoolCommand::FinishConnect {
            key,
            outcome,
            respond_to,
        })
        .await?
    }

    /// Connect every registered device concurrently.
    ///
    /// Individual failures are logged and counted; they never abort the batch.
    pub async fn connect_all(&self) -> ConnectAllSummary {
        let descriptors = self.list_descriptors().await;
        let mut attempts = JoinSet::new();

        for descriptor in descriptors {
            let pool = self.clone();
            attempts.spawn(async move {
                let key = descriptor.key();
                let result = pool.connect(&key).await;
                (key, result)
            });
        }

        let mut summary = ConnectAllSummary::default();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((_, Ok(()))) => summary.connected += 1,
                Ok((key, Err(e))) => {
                    warn!(device = %key, error = %e, "Connect failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Connect task failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            connected = summary.connected,
            failed = summary.failed,
            "Connect-all finished"
        );
        summary
    }

    /// Close the session to a device.
    ///
    /// Returns `false` (and does nothing) if the device has no session.
    pub async fn disconnect(&self, key: &DeviceKey) -> Result<bool, PoolError> {
        let session = self
            .call(|respond_to| PoolCommand::Disconnect {
                key: key.clone(),
                respond_to,
            })
            .await?;

        match session {
            Some(session) => {
                session.close().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every live session.
    pub async fn disconnect_all(&self) {
        for connection in self.snapshot().await {
            if let Err(e) = self.disconnect(&connection.key).await {
                debug!(device = %connection.key, error = %e, "Disconnect during shutdown failed");
            }
        }
    }

    /// Drop a session that failed its liveness probe.
    ///
    /// Returns `true` if the session was still current and has been removed.
    pub async fn evict(&self, key: &DeviceKey, generation: u64, reason: impl Into<String>) -> bool {
        self.call(|respond_to| PoolCommand::Evict {
            key: key.clone(),
            generation,
            reason: reason.into(),
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    /// Snapshot of one live session.
    pub async fn get(&self, key: &DeviceKey) -> Option<ConnectionSnapshot> {
        self.call(|respond_to| PoolCommand::Get {
            key: key.clone(),
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Snapshot of every live session, in registration order.
    pub async fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        self.call(|respond_to| PoolCommand::Snapshot { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Set the recording flag of a session, if it is still the one identified
    /// by `generation`.
    pub async fn set_recording(&self, key: &DeviceKey, generation: u64, recording: bool) -> bool {
        self.call(|respond_to| PoolCommand::SetRecording {
            key: key.clone(),
            generation,
            recording,
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Events and transport
    // ------------------------------------------------------------------------

    /// Subscribe to status and log events.
    ///
    /// The subscription first yields the current status of every registered
    /// device, then live events.
    pub async fn subscribe(&self) -> Result<Subscription, PoolError> {
        self.call(|respond_to| PoolCommand::Subscribe { respond_to })
            .await
    }

    /// Replace or clear the transport target.
    pub async fn set_transport(&self, target: Option<TransportTarget>) -> Result<(), PoolError> {
        self.call(|respond_to| PoolCommand::SetTransport { target, respond_to })
            .await
    }

    /// Current transport target.
    pub async fn transport(&self) -> Option<TransportTarget> {
        self.call(|respond_to| PoolCommand::GetTransport { respond_to })
            .await
            .ok()
            .flatten()
    }

    /// Check if the pool actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
