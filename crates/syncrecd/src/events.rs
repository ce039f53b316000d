//! Status and log fan-out to observers.
//!
//! Events are published on a tokio broadcast channel. Publishing never
//! blocks: an observer that falls behind loses the oldest events and is told
//! how many it missed, it never slows down the publisher.
//!
//! A [`Subscription`] starts with a replay of the current status of every
//! registered device, followed by live events. The replay snapshot and the
//! live receiver are created together inside the pool actor, so no status
//! change can fall between them.

use std::collections::VecDeque;

use async_trait::async_trait;
use syncrec_core::DeviceStatus;
use syncrec_protocol::DaemonMessage;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default capacity of the event channel.
pub const EVENT_BUFFER: usize = 256;

// ============================================================================
// Events
// ============================================================================

/// An event published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device's connection or recording status changed.
    Status(DeviceStatus),

    /// A human-readable log line (errors, saved recordings, lost connections).
    Log { message: String },
}

impl DeviceEvent {
    /// Creates a log event.
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    /// Converts the event into its wire form.
    pub fn into_message(self) -> DaemonMessage {
        match self {
            Self::Status(status) => DaemonMessage::DeviceStatus(status),
            Self::Log { message } => DaemonMessage::Log { message },
        }
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

/// Cheap-to-clone publisher for [`DeviceEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster holding at most `capacity` undelivered events
    /// per observer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Having no observers is not an error.
    pub fn publish(&self, event: DeviceEvent) {
        let _ = self.sender.send(event);
    }

    /// Publishes a status event.
    pub fn status(&self, status: DeviceStatus) {
        self.publish(DeviceEvent::Status(status));
    }

    /// Publishes a log event.
    pub fn log(&self, message: impl Into<String>) {
        self.publish(DeviceEvent::log(message));
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Creates a raw receiver with no replay.
    ///
    /// Observers should go through `PoolHandle::subscribe` so that they see
    /// the current status first; this is for in-process consumers that only
    /// care about what happens next.
    pub fn receiver(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// An observer's view of the event stream: replayed statuses, then live events.
#[derive(Debug)]
pub struct Subscription {
    replay: VecDeque<DeviceStatus>,
    events: broadcast::Receiver<DeviceEvent>,
}

impl Subscription {
    pub(crate) fn new(replay: Vec<DeviceStatus>, events: broadcast::Receiver<DeviceEvent>) -> Self {
        Self {
            replay: replay.into(),
            events,
        }
    }

    /// Number of replayed statuses not yet consumed.
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Returns the next event, or `None` once the publisher is gone.
    ///
    /// Lagging is logged and skipped over.
    pub async fn next_event(&mut self) -> Option<DeviceEvent> {
        if let Some(status) = self.replay.pop_front() {
            return Some(DeviceEvent::Status(status));
        }

        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event observer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Returned by a [`Subscriber`] that can no longer accept events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberGone;

/// Something that consumes events, one at a time.
#[async_trait]
pub trait Subscriber: Send {
    /// Handles one event. Returning `Err` ends the subscription.
    async fn on_event(&mut self, event: DeviceEvent) -> Result<(), SubscriberGone>;
}

/// Drives `subscriber` from `subscription` until cancelled, until the
/// subscriber goes away, or until the publisher shuts down.
pub async fn forward<S: Subscriber>(
    mut subscription: Subscription,
    mut subscriber: S,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Event forwarding cancelled");
                break;
            }

            next = subscription.next_event() => {
                let Some(event) = next else {
                    debug!("Event channel closed");
                    break;
                };
                if subscriber.on_event(event).await.is_err() {
                    debug!("Subscriber gone, stopping event forwarding");
                    break;
                }
            }
        }
    }
}
