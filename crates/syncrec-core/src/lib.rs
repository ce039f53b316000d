//! syncrec Core - Shared types for synchronized recording
//!
//! This crate provides the domain types shared between the daemon
//! (syncrecd) and the CLI (syncrec): device descriptors and keys, the
//! status view broadcast to observers, and the external transport target.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod device;
pub mod error;
pub mod transport;

// Re-exports for convenience
pub use device::{ConnectionStatus, DeviceDescriptor, DeviceKey, DeviceStatus};
pub use error::{DomainError, DomainResult};
pub use transport::{TransportAction, TransportTarget};
