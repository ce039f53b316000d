//! Liveness monitoring for connected devices.
//!
//! Every interval the monitor probes each live session with a version query.
//! A session whose probe fails or times out is evicted from the pool: the
//! device goes back to Disconnected and a log event names it. Probes run
//! concurrently, so one unresponsive device delays a scan by at most the
//! probe timeout.
//!
//! Evictions carry the session generation seen at scan time. A device that
//! was reconnected while its old session was being probed keeps the new one.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Probe task failures are logged and skipped

use std::time::Duration;

use syncrec_core::DeviceKey;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pool::PoolHandle;
use crate::session::with_timeout;

/// Time between scans.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Bound on a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Sessions probed.
    pub probed: usize,
    /// Devices evicted by this scan.
    pub evicted: Vec<DeviceKey>,
}

/// Periodic liveness prober.
#[derive(Clone)]
pub struct HealthMonitor {
    pool: PoolHandle,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// A zero interval is raised to one millisecond (`tokio::time::interval`
    /// rejects zero).
    pub fn new(pool: PoolHandle, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            pool,
            interval: interval.max(Duration::from_millis(1)),
            probe_timeout,
        }
    }

    /// Probes every live session once and evicts the ones that fail.
    pub async fn scan_once(&self) -> ScanReport {
        let connections = self.pool.snapshot().await;
        let mut report = ScanReport {
            probed: connections.len(),
            evicted: Vec::new(),
        };

        let mut probes = JoinSet::new();
        for connection in connections {
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let result = with_timeout("GetVersion", timeout, connection.session.version()).await;
                (connection, result)
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((connection, Ok(version))) => {
                    debug!(device = %connection.key, %version, "Device alive");
                }
                Ok((connection, Err(e))) => {
                    let evicted = self
                        .pool
                        .evict(&connection.key, connection.generation, e.to_string())
                        .await;
                    if evicted {
                        report.evicted.push(connection.key);
                    }
                }
                Err(e) => warn!(error = %e, "Liveness probe task failed"),
            }
        }

        report
    }

    /// Scans on every tick until cancelled or until the pool shuts down.
    pub async fn run(self, cancel_token: CancellationToken) {
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs_f64(),
            probe_timeout_ms = self.probe_timeout.as_millis() as u64,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Health monitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    if !self.pool.is_connected() {
                        debug!("Health monitor stopping: pool channel closed");
                        break;
                    }
                    let report = self.scan_once().await;
                    if !report.evicted.is_empty() {
                        info!(
                            probed = report.probed,
                            evicted = report.evicted.len(),
                            "Health scan evicted devices"
                        );
                    }
                }
            }
        }

        debug!("Health monitor task completed");
    }
}

/// Spawns the health monitor task.
pub fn spawn_health_monitor(
    monitor: HealthMonitor,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(monitor.run(cancel_token))
}
