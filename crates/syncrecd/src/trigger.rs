//! Trigger sources for start/stop.
//!
//! A [`TriggerSource`] turns some external input into start/stop signals and
//! hands them to a [`TriggerHandler`]. The daemon runs a [`SignalTrigger`]
//! (`SIGUSR1` starts, `SIGUSR2` stops) so that foot switches, hotkey daemons
//! and shell scripts can drive recording with `kill -USR1`. Other inputs can
//! feed a [`ChannelTrigger`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::RecordingOrchestrator;

/// Receives start/stop signals from a trigger source.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn on_start_signal(&self);
    async fn on_stop_signal(&self);
}

#[async_trait]
impl TriggerHandler for RecordingOrchestrator {
    async fn on_start_signal(&self) {
        match self.start_recording().await {
            Ok(cycle) => info!(
                devices = cycle.device_count(),
                transport = cycle.has_transport(),
                "Start triggered"
            ),
            Err(e) => warn!(error = %e, "Start trigger ignored"),
        }
    }

    async fn on_stop_signal(&self) {
        let summary = self.stop_recording().await;
        info!(
            stopped = summary.stopped,
            failed = summary.failed,
            "Stop triggered"
        );
    }
}

/// Errors from running a trigger source.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),

    #[error("trigger source not supported on this platform")]
    Unsupported,
}

/// A source of start/stop signals.
#[async_trait]
pub trait TriggerSource: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Delivers signals to `handler` until `cancel_token` fires or the
    /// source is exhausted.
    async fn run(
        self: Box<Self>,
        handler: Arc<dyn TriggerHandler>,
        cancel_token: CancellationToken,
    ) -> Result<(), TriggerError>;
}

/// Spawns a trigger source, logging how it ended.
pub fn spawn_trigger(
    source: Box<dyn TriggerSource>,
    handler: Arc<dyn TriggerHandler>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = source.name();
        info!(source = name, "Trigger source started");
        match source.run(handler, cancel_token).await {
            Ok(()) => debug!(source = name, "Trigger source stopped"),
            Err(e) => warn!(source = name, error = %e, "Trigger source failed"),
        }
    })
}

// ============================================================================
// Unix signals
// ============================================================================

/// `SIGUSR1` = start, `SIGUSR2` = stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTrigger;

#[async_trait]
impl TriggerSource for SignalTrigger {
    fn name(&self) -> &'static str {
        "signals"
    }

    #[cfg(unix)]
    async fn run(
        self: Box<Self>,
        handler: Arc<dyn TriggerHandler>,
        cancel_token: CancellationToken,
    ) -> Result<(), TriggerError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut start = signal(SignalKind::user_defined1())?;
        let mut stop = signal(SignalKind::user_defined2())?;

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => return Ok(()),

                received = start.recv() => {
                    if received.is_none() {
                        return Ok(());
                    }
                    info!("SIGUSR1 received");
                    handler.on_start_signal().await;
                }

                received = stop.recv() => {
                    if received.is_none() {
                        return Ok(());
                    }
                    info!("SIGUSR2 received");
                    handler.on_stop_signal().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn run(
        self: Box<Self>,
        _handler: Arc<dyn TriggerHandler>,
        _cancel_token: CancellationToken,
    ) -> Result<(), TriggerError> {
        Err(TriggerError::Unsupported)
    }
}

// ============================================================================
// Channel
// ============================================================================

/// A signal delivered through a [`ChannelTrigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSignal {
    Start,
    Stop,
}

/// Trigger source fed from an in-process channel.
#[derive(Debug)]
pub struct ChannelTrigger {
    receiver: mpsc::Receiver<TriggerSignal>,
}

impl ChannelTrigger {
    /// Creates the source and the sender that feeds it.
    pub fn new(buffer: usize) -> (mpsc::Sender<TriggerSignal>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { receiver: rx })
    }
}

#[async_trait]
impl TriggerSource for ChannelTrigger {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn run(
        mut self: Box<Self>,
        handler: Arc<dyn TriggerHandler>,
        cancel_token: CancellationToken,
    ) -> Result<(), TriggerError> {
        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => return Ok(()),

                signal = self.receiver.recv() => match signal {
                    Some(TriggerSignal::Start) => handler.on_start_signal().await,
                    Some(TriggerSignal::Stop) => handler.on_stop_signal().await,
                    None => return Ok(()),
                },
            }
        }
    }
}
