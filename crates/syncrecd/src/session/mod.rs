//! Device sessions.
//!
//! A session is a live, authenticated link to one device. The daemon only
//! needs four things from it: a cheap liveness probe (`version`), start,
//! stop (which may report where the recording was saved), and close.
//!
//! Sessions are shared as [`SharedSession`] so that the pool, the health
//! monitor and in-flight recording actions can all hold one at once without
//! any of them holding a lock on the pool.

mod obs;

pub use obs::{ObsConnector, ObsSession};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use syncrec_core::DeviceDescriptor;
use thiserror::Error;

/// A session shared between the pool and the tasks that use it.
pub type SharedSession = Arc<dyn DeviceSession>;

/// Capability surface of a connected device.
#[async_trait]
pub trait DeviceSession: Send + Sync + fmt::Debug {
    /// Queries the device's version. Used as the liveness probe.
    async fn version(&self) -> Result<String, SessionError>;

    /// Starts recording.
    async fn start_record(&self) -> Result<(), SessionError>;

    /// Stops recording, returning the saved file path if the device reports one.
    async fn stop_record(&self) -> Result<Option<String>, SessionError>;

    /// Closes the session. Errors are swallowed; the session is gone either way.
    async fn close(&self);
}

/// Opens sessions to devices.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, descriptor: &DeviceDescriptor) -> Result<SharedSession, SessionError>;
}

/// Errors from device sessions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("session closed")]
    Closed,

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("{0}")]
    Request(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Runs `fut`, failing with [`SessionError::Timeout`] once `limit` elapses.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout {
            operation,
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<(), _> = with_timeout(
            "StartRecord",
            Duration::from_millis(3000),
            std::future::pending(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "StartRecord timed out after 3000ms");
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout("GetVersion", Duration::from_secs(1), async {
            Ok::<_, SessionError>("30.1.2".to_string())
        })
        .await;
        assert_eq!(result.unwrap(), "30.1.2");
    }
}
