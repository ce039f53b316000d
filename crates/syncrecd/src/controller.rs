//! The daemon's core, assembled.
//!
//! A `Controller` bundles the pool handle, the orchestrator and the event
//! broadcaster, and owns the background health monitor. It is built once per
//! daemon (and once per test) and cloned into whatever needs it.

use std::sync::Arc;
use std::time::Duration;

use syncrec_core::TransportTarget;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::events::EventBroadcaster;
use crate::health::{spawn_health_monitor, HealthMonitor, DEFAULT_HEALTH_INTERVAL};
use crate::orchestrator::{RecordingOrchestrator, RecordingTiming, SharedOrchestrator};
use crate::pool::{spawn_pool, PoolHandle, PoolSettings, DEFAULT_CONNECT_TIMEOUT};
use crate::registry::DeviceRegistry;
use crate::session::DeviceConnector;
use crate::transport::TransportClient;

/// Tunables for [`Controller::spawn`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub timing: RecordingTiming,
    pub connect_timeout: Duration,
    pub health_interval: Duration,
    pub transport: Option<TransportTarget>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            timing: RecordingTiming::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            transport: None,
        }
    }
}

/// Shared entry point to the daemon core.
#[derive(Clone)]
pub struct Controller {
    pool: PoolHandle,
    orchestrator: SharedOrchestrator,
    events: EventBroadcaster,
}

impl Controller {
    /// Spawns the pool actor and the health monitor.
    ///
    /// The health monitor stops when `cancel_token` is cancelled; the pool
    /// actor stops once the last clone of the controller is dropped.
    pub fn spawn(
        registry: DeviceRegistry,
        connector: Arc<dyn DeviceConnector>,
        settings: ControllerSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        let events = EventBroadcaster::default();

        let pool = spawn_pool(
            registry,
            connector,
            events.clone(),
            PoolSettings {
                connect_timeout: settings.connect_timeout,
                transport: settings.transport,
            },
        );

        let orchestrator = Arc::new(RecordingOrchestrator::new(
            pool.clone(),
            events.clone(),
            TransportClient::new(),
            settings.timing,
        ));

        let monitor = HealthMonitor::new(
            pool.clone(),
            settings.health_interval,
            settings.timing.command_timeout,
        );
        spawn_health_monitor(monitor, cancel_token);

        info!(
            lead_time_ms = settings.timing.lead_time.as_millis() as u64,
            health_interval_secs = settings.health_interval.as_secs_f64(),
            "Controller started"
        );

        Self {
            pool,
            orchestrator,
            events,
        }
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Closes every session. Devices that are recording keep recording.
    pub async fn shutdown(&self) {
        self.pool.disconnect_all().await;
        info!("Controller shut down");
    }
}
