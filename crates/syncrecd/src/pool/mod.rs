//! Connection pool using the actor pattern.
//!
//! The pool is the daemon's single source of truth for which devices are
//! known, which are connected, and which are recording.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  PoolCommand  ┌─────────────────┐  DeviceEvent  ┌────────────────┐
//! │   PoolHandle    │──────────────▶│    PoolActor    │──────────────▶│ EventBroadcaster│
//! │ (server, health,│ (mpsc channel)│ registry +      │  (broadcast)  └────────────────┘
//! │  orchestrator)  │◀──────────────│ sessions        │
//! └────────┬────────┘   oneshot     └─────────────────┘
//!          │
//!          ▼
//!   DeviceConnector / DeviceSession (network I/O stays off the actor)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;
use std::time::Duration;

use syncrec_core::TransportTarget;
use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::PoolActor;
pub use commands::{ConnectAllSummary, ConnectPlan, ConnectionSnapshot, PoolCommand, PoolError};
pub use handle::PoolHandle;

use crate::events::EventBroadcaster;
use crate::registry::DeviceRegistry;
use crate::session::DeviceConnector;

/// Command channel buffer size.
const COMMAND_BUFFER: usize = 100;

/// Default bound on opening one session, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for [`spawn_pool`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub connect_timeout: Duration,
    pub transport: Option<TransportTarget>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transport: None,
        }
    }
}

/// Spawn the pool actor and return a handle for interaction.
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use syncrecd::events::EventBroadcaster;
/// use syncrecd::pool::{spawn_pool, PoolSettings};
/// use syncrecd::registry::DeviceRegistry;
/// use syncrecd::session::ObsConnector;
///
/// #[tokio::main]
/// async fn main() {
///     let events = EventBroadcaster::default();
///     let pool = spawn_pool(
///         DeviceRegistry::in_memory(),
///         Arc::new(ObsConnector),
///         events,
///         PoolSettings::default(),
///     );
///     let devices = pool.list_devices().await;
///     assert!(devices.is_empty());
/// }
/// ```
pub fn spawn_pool(
    registry: DeviceRegistry,
    connector: Arc<dyn DeviceConnector>,
    events: EventBroadcaster,
    settings: PoolSettings,
) -> PoolHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = PoolActor::new(cmd_rx, registry, settings.transport, events);
    tokio::spawn(actor.run());

    PoolHandle::new(cmd_tx, connector, settings.connect_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DeviceSession, SessionError, SharedSession};
    use async_trait::async_trait;
    use syncrec_core::{ConnectionStatus, DeviceDescriptor, DeviceKey};

    #[derive(Debug)]
    struct NullSession;

    #[async_trait]
    impl DeviceSession for NullSession {
        async fn version(&self) -> Result<String, SessionError> {
            Ok("test".to_string())
        }
        async fn start_record(&self) -> Result<(), SessionError> {
            Ok(())
        }
        async fn stop_record(&self) -> Result<Option<String>, SessionError> {
            Ok(None)
        }
        async fn close(&self) {}
    }

    struct NullConnector {
        refuse: Option<DeviceKey>,
    }

    #[async_trait]
    impl DeviceConnector for NullConnector {
        async fn connect(&self, d: &DeviceDescriptor) -> Result<SharedSession, SessionError> {
            if self.refuse.as_ref() == Some(&d.key()) {
                return Err(SessionError::Connect("connection refused".to_string()));
            }
            Ok(Arc::new(NullSession))
        }
    }

    fn pool_with(refuse: Option<DeviceKey>) -> PoolHandle {
        spawn_pool(
            DeviceRegistry::in_memory(),
            Arc::new(NullConnector { refuse }),
            EventBroadcaster::default(),
            PoolSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let pool = pool_with(None);
        pool.add_device(DeviceDescriptor::new("host1", 1, "", "A")).await.unwrap();
        pool.add_device(DeviceDescriptor::new("host2", 2, "", "B")).await.unwrap();

        let names: Vec<_> = pool.list_devices().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["A", "B"]);

        pool.remove_device(&DeviceKey::new("host1", 1)).await.unwrap();
        assert_eq!(pool.list_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let pool = pool_with(None);
        let d = DeviceDescriptor::new("host1", 1, "", "A");
        pool.add_device(d.clone()).await.unwrap();
        assert_eq!(
            pool.add_device(d).await.unwrap_err(),
            PoolError::DuplicateDevice(DeviceKey::new("host1", 1))
        );
    }

    #[tokio::test]
    async fn test_connect_unknown_device() {
        let pool = pool_with(None);
        let key = DeviceKey::new("ghost", 9);
        assert_eq!(pool.connect(&key).await.unwrap_err(), PoolError::UnknownDevice(key));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let pool = pool_with(None);
        let key = DeviceKey::new("host1", 1);
        pool.add_device(DeviceDescriptor::new("host1", 1, "", "A")).await.unwrap();

        pool.connect(&key).await.unwrap();
        let first = pool.get(&key).await.unwrap().generation;
        pool.connect(&key).await.unwrap();
        let second = pool.get(&key).await.unwrap().generation;

        assert_eq!(first, second);
        assert_eq!(pool.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_device_disconnected() {
        let key = DeviceKey::new("host1", 1);
        let pool = pool_with(Some(key.clone()));
        pool.add_device(DeviceDescriptor::new("host1", 1, "", "A")).await.unwrap();

        let err = pool.connect(&key).await.unwrap_err();
        assert_eq!(err.code(), "connection_failed");
        assert_eq!(pool.list_devices().await[0].status, ConnectionStatus::Disconnected);

        // The reservation was released, so a retry is a fresh attempt.
        assert_eq!(pool.connect(&key).await.unwrap_err().code(), "connection_failed");
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let pool = pool_with(None);
        pool.add_device(DeviceDescriptor::new("host1", 1, "", "A")).await.unwrap();
        assert!(!pool.disconnect(&DeviceKey::new("host1", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let pool = pool_with(None);
        let key = DeviceKey::new("host1", 1);
        pool.add_device(DeviceDescriptor::new("host1", 1, "", "A")).await.unwrap();
        pool.connect(&key).await.unwrap();
        let generation = pool.get(&key).await.unwrap().generation;

        assert!(!pool.set_recording(&key, generation + 1, true).await);
        assert!(!pool.evict(&key, generation + 1, "stale").await);
        assert!(pool.set_recording(&key, generation, true).await);
        assert!(pool.list_devices().await[0].recording);
    }

    #[tokio::test]
    async fn test_transport_round_trip() {
        let pool = pool_with(None);
        assert!(pool.transport().await.is_none());

        let target = syncrec_core::TransportTarget::new("127.0.0.1", 8000).unwrap();
        pool.set_transport(Some(target.clone())).await.unwrap();
        assert_eq!(pool.transport().await, Some(target));
    }
}
