//! syncrec CLI - Library modules
//!
//! Everything the `syncrec` command needs to talk to a running daemon:
//!
//! - `client`: handshake and request/response over the daemon socket, plus
//!   the event stream used by `syncrec watch`
//! - `daemon`: PID file handling and starting the daemon on demand
//! - `render`: plain-text output for replies, device tables and events
//! - `error`: the client error type

pub mod client;
pub mod daemon;
pub mod error;
pub mod render;

// Re-export commonly used types
pub use client::{ClientConfig, DaemonClient};
pub use error::{CliError, Result};
