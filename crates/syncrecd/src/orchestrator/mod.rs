//! Synchronized recording across every connected device.
//!
//! Start is deferred: every participant (each connected device, plus the
//! transport target if one is configured) gets its own action, and all of
//! them share one fire instant `now + lead_time`. The lead time gives every
//! action a chance to be scheduled before any of them fires.
//!
//! Stop is immediate: stop is sent to every connected device at once,
//! regardless of whether the daemon believes it is recording.
//!
//! Each action re-checks the pool when it fires and records its result only
//! against the session it actually used (by generation), so a device that
//! was dropped or reconnected in the meantime is never marked wrongly.
//! Failures are per-device and reported as log events.

pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use syncrec_core::{DeviceKey, TransportAction, TransportTarget};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EventBroadcaster;
use crate::pool::{ConnectionSnapshot, PoolHandle};
use crate::session::with_timeout;
use crate::transport::TransportClient;

pub use scheduler::{
    schedule, schedule_prepared, ActionKind, ActionOutcome, ActionTarget, ScheduledAction,
    ScheduledTask,
};

/// Delay between a start request and the shared fire instant.
pub const DEFAULT_LEAD_TIME: Duration = Duration::from_secs(5);

/// Bound on each start/stop command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Timing parameters for recording cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingTiming {
    pub lead_time: Duration,
    pub command_timeout: Duration,
}

impl Default for RecordingTiming {
    fn default() -> Self {
        Self {
            lead_time: DEFAULT_LEAD_TIME,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Errors from recording operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordingError {
    #[error("A synchronized start is already scheduled (fires in {remaining_ms}ms)")]
    StartAlreadyScheduled { remaining_ms: u64 },
}

impl RecordingError {
    /// Error code used on the daemon socket.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StartAlreadyScheduled { .. } => "start_already_scheduled",
        }
    }
}

/// Where the orchestrator is in its start cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// No start is pending.
    Idle,
    /// A start will fire at this instant.
    Scheduled { fire_at: Instant },
}

/// A scheduled start, as returned to the caller.
#[derive(Debug)]
pub struct StartCycle {
    pub fire_at: Instant,
    /// `fire_at` on the wall clock, for display.
    pub fire_at_utc: DateTime<Utc>,
    pub lead_time: Duration,
    tasks: Vec<ScheduledTask>,
}

impl StartCycle {
    pub fn actions(&self) -> impl Iterator<Item = &ScheduledAction> {
        self.tasks.iter().map(|task| task.action())
    }

    /// Number of device actions (transport excluded).
    pub fn device_count(&self) -> usize {
        self.actions()
            .filter(|a| matches!(a.target, ActionTarget::Device(_)))
            .count()
    }

    pub fn has_transport(&self) -> bool {
        self.actions()
            .any(|a| matches!(a.target, ActionTarget::Transport(_)))
    }

    /// Waits for every action and returns their outcomes.
    pub async fn wait(self) -> Vec<(ScheduledAction, ActionOutcome)> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            outcomes.push(task.outcome().await);
        }
        outcomes
    }
}

/// Result of a stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopSummary {
    /// Devices that acknowledged stop.
    pub stopped: usize,
    /// Devices whose stop failed or timed out.
    pub failed: usize,
    /// Pending start actions cancelled by this stop.
    pub cancelled: usize,
}

#[derive(Debug)]
struct PendingCycle {
    fire_at: Instant,
    token: CancellationToken,
    actions: usize,
}

/// Shares one orchestrator between the server and trigger sources.
pub type SharedOrchestrator = Arc<RecordingOrchestrator>;

/// Schedules synchronized starts and issues stops.
pub struct RecordingOrchestrator {
    pool: PoolHandle,
    events: EventBroadcaster,
    transport: TransportClient,
    timing: RecordingTiming,
    pending: Mutex<Option<PendingCycle>>,
}

impl RecordingOrchestrator {
    pub fn new(
        pool: PoolHandle,
        events: EventBroadcaster,
        transport: TransportClient,
        timing: RecordingTiming,
    ) -> Self {
        Self {
            pool,
            events,
            transport,
            timing,
            pending: Mutex::new(None),
        }
    }

    pub fn timing(&self) -> RecordingTiming {
        self.timing
    }

    /// Current start-cycle state.
    pub async fn state(&self) -> CycleState {
        let pending = self.pending.lock().await;
        match pending.as_ref() {
            Some(cycle) if Instant::now() < cycle.fire_at => CycleState::Scheduled {
                fire_at: cycle.fire_at,
            },
            _ => CycleState::Idle,
        }
    }

    /// Schedules a start on every connected device (and the transport
    /// target) at one shared instant. Returns once everything is scheduled.
    ///
    /// # Errors
    ///
    /// - `RecordingError::StartAlreadyScheduled` if a previous start has not
    ///   fired yet
    pub async fn start_recording(&self) -> Result<StartCycle, RecordingError> {
        let mut pending = self.pending.lock().await;

        let now = Instant::now();
        if let Some(cycle) = pending.as_ref().filter(|c| now < c.fire_at) {
            let remaining = cycle.fire_at.saturating_duration_since(now);
            return Err(RecordingError::StartAlreadyScheduled {
                remaining_ms: remaining.as_millis() as u64,
            });
        }

        let lead_time = self.timing.lead_time;
        let fire_at = now + lead_time;
        let fire_at_utc =
            Utc::now() + chrono::Duration::from_std(lead_time).unwrap_or_else(|_| chrono::Duration::zero());
        let token = CancellationToken::new();

        let connections = self.pool.snapshot().await;
        let transport = self.pool.transport().await;

        let mut tasks = Vec::with_capacity(connections.len() + 1);
        for connection in connections {
            tasks.push(self.schedule_device_start(connection.key, fire_at, token.clone()));
        }
        match transport {
            Some(target) => tasks.push(self.schedule_transport(
                target,
                ActionKind::Start,
                fire_at,
                token.clone(),
            )),
            None => debug!("No transport target configured"),
        }

        info!(
            actions = tasks.len(),
            lead_time_ms = lead_time.as_millis() as u64,
            fire_at = %fire_at_utc.format("%H:%M:%S%.3f"),
            "Synchronized start scheduled"
        );
        self.events.log(format!(
            "Recording scheduled to start at {}",
            fire_at_utc.format("%H:%M:%S%.3f")
        ));

        *pending = Some(PendingCycle {
            fire_at,
            token,
            actions: tasks.len(),
        });

        Ok(StartCycle {
            fire_at,
            fire_at_utc,
            lead_time,
            tasks,
        })
    }

    /// Stops recording everywhere, immediately.
    ///
    /// A start that has not fired yet is cancelled first. Returns once every
    /// device has answered or timed out.
    pub async fn stop_recording(&self) -> StopSummary {
        let cancelled = self.cancel_pending().await;
        if cancelled > 0 {
            info!(cancelled, "Pending start cancelled by stop");
            self.events
                .log(format!("Cancelled pending start ({cancelled} actions)"));
        }

        let now = Instant::now();
        let token = CancellationToken::new();
        let connections = self.pool.snapshot().await;
        let transport = self.pool.transport().await;

        let mut tasks = Vec::with_capacity(connections.len() + 1);
        if let Some(target) = transport {
            tasks.push(self.schedule_transport(target, ActionKind::Stop, now, token.clone()));
        }
        for connection in connections {
            tasks.push(self.schedule_connection_stop(connection, now, token.clone()));
        }

        let mut summary = StopSummary {
            cancelled,
            ..StopSummary::default()
        };
        for task in tasks {
            let (action, outcome) = task.outcome().await;
            if matches!(action.target, ActionTarget::Transport(_)) {
                continue;
            }
            if outcome.is_success() {
                summary.stopped += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(
            stopped = summary.stopped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Stop issued"
        );
        summary
    }

    /// Cancels the pending start, returning how many actions it held.
    async fn cancel_pending(&self) -> usize {
        let Some(cycle) = self.pending.lock().await.take() else {
            return 0;
        };

        if Instant::now() < cycle.fire_at {
            cycle.token.cancel();
            cycle.actions
        } else {
            0
        }
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    fn schedule_device_start(
        &self,
        key: DeviceKey,
        fire_at: Instant,
        token: CancellationToken,
    ) -> ScheduledTask {
        let action = ScheduledAction {
            target: ActionTarget::Device(key.clone()),
            fire_at,
            kind: ActionKind::Start,
        };
        let pool = self.pool.clone();
        let events = self.events.clone();
        let timeout = self.timing.command_timeout;

        schedule(action, token, move || async move {
            // The device may have been dropped since scheduling.
            let Some(connection) = pool.get(&key).await else {
                let message = format!("Error starting recording on {key}: device is not connected");
                warn!(device = %key, "Start skipped, device no longer connected");
                events.log(message.clone());
                return ActionOutcome::Failed(message);
            };
            fire_start(&pool, &events, connection, timeout).await
        })
    }

    fn schedule_connection_stop(
        &self,
        connection: ConnectionSnapshot,
        fire_at: Instant,
        token: CancellationToken,
    ) -> ScheduledTask {
        let action = ScheduledAction {
            target: ActionTarget::Device(connection.key.clone()),
            fire_at,
            kind: ActionKind::Stop,
        };
        let pool = self.pool.clone();
        let events = self.events.clone();
        let timeout = self.timing.command_timeout;

        schedule(action, token, move || async move {
            fire_stop(&pool, &events, connection, timeout).await
        })
    }

    fn schedule_transport(
        &self,
        target: TransportTarget,
        kind: ActionKind,
        fire_at: Instant,
        token: CancellationToken,
    ) -> ScheduledTask {
        let action = ScheduledAction {
            target: ActionTarget::Transport(target.clone()),
            fire_at,
            kind,
        };
        let client = self.transport;
        let events = self.events.clone();
        let limit = self.timing.command_timeout;
        let transport_action = match kind {
            ActionKind::Start => TransportAction::BeginRecord,
            ActionKind::Stop => TransportAction::StopRecord,
        };

        // Resolution happens during the lead time, not at the fire instant.
        let prepare_target = target.clone();
        let prepare = async move { client.prepare(&prepare_target, limit).await };

        schedule_prepared(action, token, prepare, move |prepared| async move {
            let sent = match prepared {
                Ok(signal) => signal.send(transport_action).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => {
                    info!(%target, action = %transport_action, "Transport signalled");
                    ActionOutcome::Succeeded
                }
                Err(e) => {
                    let message = format!("Error sending {transport_action} to transport {target}: {e}");
                    warn!(%target, error = %e, "Transport signal failed");
                    events.log(message.clone());
                    ActionOutcome::Failed(message)
                }
            }
        })
    }
}

async fn fire_start(
    pool: &PoolHandle,
    events: &EventBroadcaster,
    connection: ConnectionSnapshot,
    timeout: Duration,
) -> ActionOutcome {
    let key = connection.key;
    match with_timeout("StartRecord", timeout, connection.session.start_record()).await {
        Ok(()) => {
            if pool.set_recording(&key, connection.generation, true).await {
                info!(device = %key, "Recording started");
            } else {
                debug!(device = %key, "Started, but the session was replaced meanwhile");
            }
            ActionOutcome::Succeeded
        }
        Err(e) => {
            let message = format!("Error starting recording on {key}: {e}");
            warn!(device = %key, error = %e, "Start failed");
            events.log(message.clone());
            ActionOutcome::Failed(message)
        }
    }
}

async fn fire_stop(
    pool: &PoolHandle,
    events: &EventBroadcaster,
    connection: ConnectionSnapshot,
    timeout: Duration,
) -> ActionOutcome {
    let key = connection.key;
    match with_timeout("StopRecord", timeout, connection.session.stop_record()).await {
        Ok(output_path) => {
            pool.set_recording(&key, connection.generation, false).await;
            info!(device = %key, output_path = output_path.as_deref().unwrap_or(""), "Recording stopped");
            if let Some(path) = output_path {
                events.log(format!("Recording saved to {path}"));
            }
            ActionOutcome::Succeeded
        }
        Err(e) => {
            let message = format!("Error stopping recording on {key}: {e}");
            warn!(device = %key, error = %e, "Stop failed");
            events.log(message.clone());
            ActionOutcome::Failed(message)
        }
    }
}
