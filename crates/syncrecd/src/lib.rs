//! syncrec Daemon - device pool and synchronized recording orchestrator
//!
//! This crate provides the core infrastructure for the syncrec daemon:
//! - `registry` - Durable list of device descriptors (JSON file backed)
//! - `pool` - Connection pool actor owning live device sessions
//! - `session` - Device session capability and the OBS WebSocket implementation
//! - `health` - Background liveness polling and eviction of dead sessions
//! - `orchestrator` - Shared fire-time scheduling of start, immediate stop
//! - `transport` - Fire-and-forget OSC signals to the external transport target
//! - `events` - Status/log fan-out with replay on subscribe
//! - `trigger` - Trigger sources that invoke start/stop
//! - `server` - Unix socket command surface
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          syncrecd daemon                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  commands  ┌─────────────────────────────┐     │
//! │  │ DaemonServer │───────────▶│          PoolActor          │     │
//! │  │ (Unix Socket)│            │ registry + sessions + flags │     │
//! │  └──────┬───────┘            └──────┬───────────────┬──────┘     │
//! │         │                   snapshot│               │ events     │
//! │         ▼                           ▼               ▼            │
//! │  ┌──────────────┐   ┌───────────────────────┐  ┌────────────┐   │
//! │  │ Orchestrator │   │     HealthMonitor     │  │ broadcast  │   │
//! │  │ (fire time)  │   │ (version probe / 5 s) │  │  channel   │   │
//! │  └──────────────┘   └───────────────────────┘  └────────────┘   │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod controller;
pub mod events;
pub mod health;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
pub mod trigger;
