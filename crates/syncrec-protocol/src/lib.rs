//! syncrec Protocol - Wire formats
//!
//! This crate provides:
//! - `message`: JSON-lines messages between the CLI (or any client) and the daemon
//! - `version`: protocol versioning for the daemon socket
//! - `obs`: OBS WebSocket v5 frame types and the authentication digest
//! - `osc`: OSC packet encoding for the external transport target

pub mod message;
pub mod obs;
pub mod osc;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType};
pub use version::ProtocolVersion;
