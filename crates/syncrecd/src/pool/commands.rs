//! Pool actor commands, errors, and result types.
//!
//! This module defines the message types for communicating with the `PoolActor`:
//! - `PoolCommand`: Commands sent to the actor
//! - `PoolError`: Errors that can occur during pool operations
//! - `ConnectionSnapshot`: Point-in-time view of one live session
//!
//! The actor never performs network I/O. Commands that need a device to be
//! contacted are split in two (`BeginConnect`/`FinishConnect`) so the slow
//! part runs on the caller's task.

use syncrec_core::{DeviceDescriptor, DeviceKey, DeviceStatus, TransportTarget};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::events::Subscription;
use crate::registry::RegistryError;
use crate::session::SharedSession;

// ============================================================================
// Pool Commands
// ============================================================================

/// Commands sent to the pool actor.
///
/// Each command carries a oneshot channel for its response.
#[derive(Debug)]
pub enum PoolCommand {
    /// Register a device.
    ///
    /// # Errors
    /// - `PoolError::DuplicateDevice` if the key is already registered
    /// - `PoolError::InvalidDevice` if the descriptor fails validation
    AddDevice {
        descriptor: DeviceDescriptor,
        respond_to: oneshot::Sender<Result<(), PoolError>>,
    },

    /// Unregister a device, detaching its session if it has one.
    ///
    /// Responds with the detached session so the caller can close it.
    RemoveDevice {
        key: DeviceKey,
        respond_to: oneshot::Sender<Option<SharedSession>>,
    },

    /// Status of every registered device, in registration order.
    ListDevices {
        respond_to: oneshot::Sender<Vec<DeviceStatus>>,
    },

    /// Every registered descriptor, in registration order.
    ListDescriptors {
        respond_to: oneshot::Sender<Vec<DeviceDescriptor>>,
    },

    /// Reserve a connection attempt for a device.
    ///
    /// # Errors
    /// - `PoolError::UnknownDevice` if the key is not registered
    /// - `PoolError::ConnectInProgress` if another attempt is outstanding
    BeginConnect {
        key: DeviceKey,
        respond_to: oneshot::Sender<Result<ConnectPlan, PoolError>>,
    },

    /// Report the result of an attempt reserved with `BeginConnect`.
    FinishConnect {
        key: DeviceKey,
        outcome: Result<SharedSession, String>,
        respond_to: oneshot::Sender<Result<(), PoolError>>,
    },

    /// Detach a device's session. Responds with it so the caller can close it.
    Disconnect {
        key: DeviceKey,
        respond_to: oneshot::Sender<Option<SharedSession>>,
    },

    /// Drop a session that failed its liveness probe.
    ///
    /// Only applies if the session still has `generation`; a newer session
    /// for the same device is left alone. Responds with whether it applied.
    Evict {
        key: DeviceKey,
        generation: u64,
        reason: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Snapshot of one live session.
    Get {
        key: DeviceKey,
        respond_to: oneshot::Sender<Option<ConnectionSnapshot>>,
    },

    /// Snapshot of every live session.
    Snapshot {
        respond_to: oneshot::Sender<Vec<ConnectionSnapshot>>,
    },

    /// Set the recording flag of a session with a matching generation.
    SetRecording {
        key: DeviceKey,
        generation: u64,
        recording: bool,
        respond_to: oneshot::Sender<bool>,
    },

    /// Open an event subscription with a replay of the current status.
    Subscribe {
        respond_to: oneshot::Sender<Subscription>,
    },

    /// Replace (or clear) the transport target.
    SetTransport {
        target: Option<TransportTarget>,
        respond_to: oneshot::Sender<()>,
    },

    /// Read the transport target.
    GetTransport {
        respond_to: oneshot::Sender<Option<TransportTarget>>,
    },
}

// ============================================================================
// Results
// ============================================================================

/// What the caller of `BeginConnect` must do next.
#[derive(Debug, Clone)]
pub enum ConnectPlan {
    /// A session already exists; nothing to do.
    AlreadyConnected,

    /// Open a session using this descriptor, then send `FinishConnect`.
    Establish(DeviceDescriptor),
}

/// A live session together with the metadata needed to act on it safely.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub key: DeviceKey,
    pub name: String,
    pub session: SharedSession,
    /// Changes every time a new session is stored for this device.
    pub generation: u64,
    pub recording: bool,
}

/// Result of connecting every registered device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectAllSummary {
    pub connected: usize,
    pub failed: usize,
}

// ============================================================================
// Pool Errors
// ============================================================================

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Device {0} is already registered")]
    DuplicateDevice(DeviceKey),

    #[error("Device {0} is not registered")]
    UnknownDevice(DeviceKey),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Failed to connect to {key}: {reason}")]
    ConnectionFailed { key: DeviceKey, reason: String },

    #[error("A connection attempt to {0} is already in progress")]
    ConnectInProgress(DeviceKey),

    #[error("Pool channel closed")]
    ChannelClosed,
}

impl PoolError {
    /// Error code used on the daemon socket.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateDevice(_) => "duplicate_device",
            Self::UnknownDevice(_) => "unknown_device",
            Self::InvalidDevice(_) => "invalid_device",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::ConnectInProgress(_) => "connect_in_progress",
            Self::ChannelClosed => "unavailable",
        }
    }
}

impl From<RegistryError> for PoolError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateDevice(key) => Self::DuplicateDevice(key),
            RegistryError::InvalidDevice(e) => Self::InvalidDevice(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncrec_core::DomainError;

    #[test]
    fn test_error_codes() {
        let key = DeviceKey::new("h", 1);
        assert_eq!(PoolError::DuplicateDevice(key.clone()).code(), "duplicate_device");
        assert_eq!(PoolError::UnknownDevice(key.clone()).code(), "unknown_device");
        assert_eq!(PoolError::ConnectInProgress(key).code(), "connect_in_progress");
        assert_eq!(PoolError::ChannelClosed.code(), "unavailable");
    }

    #[test]
    fn test_from_registry_error() {
        let err: PoolError =
            RegistryError::InvalidDevice(DomainError::invalid("port", 0, "1-65535")).into();
        assert_eq!(err.code(), "invalid_device");
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_connection_failed_message() {
        let err = PoolError::ConnectionFailed {
            key: DeviceKey::new("10.0.0.1", 4455),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to 10.0.0.1:4455: connection refused"
        );
    }
}
