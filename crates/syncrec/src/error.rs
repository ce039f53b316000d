//! Error types for the syncrec client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::io;
use thiserror::Error;

/// Client errors.
///
/// Connection errors suggest checking that the daemon is running; a
/// `Daemon` error is the daemon refusing a command and carries its code.
#[derive(Error, Debug)]
pub enum CliError {
    /// Could not reach the daemon socket.
    #[error("Failed to connect to daemon: {0}")]
    DaemonConnection(String),

    /// The daemon speaks an incompatible protocol version.
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// Unexpected message or closed connection mid-exchange.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The daemon answered with an error.
    #[error("{message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    /// No reply within the request timeout.
    #[error("Timed out waiting for the daemon")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl CliError {
    /// The daemon's error code, if this is a daemon error that has one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Daemon { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, CliError>;
