//! One client on the daemon socket.
//!
//! The first line must be `connect` with a compatible protocol version;
//! after that every line is one command and gets exactly one reply, except
//! `unsubscribe` and `disconnect`. Once subscribed, events share the writer
//! with replies, so each JSON line is written under the writer lock.
//!
//! A malformed line is answered with `invalid_request` and the connection
//! stays open. An oversized line, an I/O error, or five idle minutes without
//! a subscription end it.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-connection failures end that connection only

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use syncrec_core::{DeviceDescriptor, DeviceKey, TransportTarget};
use syncrec_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use super::{ServerError, MAX_SUBSCRIBERS};
use crate::controller::Controller;
use crate::events::{self, DeviceEvent, Subscriber, SubscriberGone};
use crate::pool::PoolError;

/// Writer half shared between the command loop and the event forwarder.
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Longest accepted line (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Idle limit for connections without a subscription
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Bound on writing one line
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error code for malformed or invalid client requests.
const INVALID_REQUEST: &str = "invalid_request";

/// Serves a single client until it leaves or the server stops.
pub struct ConnectionHandler {
    /// Line framing; a partial line stays buffered across cancelled reads
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: SharedWriter,
    controller: Controller,
    subscribers: Arc<AtomicUsize>,
    cancel_token: CancellationToken,
    /// Set while an event forwarder runs for this client
    subscription: Option<CancellationToken>,
    client_id: Option<String>,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        controller: Controller,
        subscribers: Arc<AtomicUsize>,
        cancel_token: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE)),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            controller,
            subscribers,
            cancel_token,
            subscription: None,
            client_id: None,
            connection_number,
        }
    }

    /// Serves the client. Returns its ID if the handshake succeeded.
    ///
    /// Cancelling the handler's token on the way out also stops the event
    /// forwarder, whose token is a child of it.
    pub async fn run(mut self) -> Option<String> {
        debug!(connection = self.connection_number, "Client connected");

        if let Err(e) = self.handshake().await {
            warn!(connection = self.connection_number, error = %e, "Handshake failed");
            return None;
        }
        info!(client_id = ?self.client_id, "Client handshake completed");

        match self.serve().await {
            Ok(()) | Err(ConnectionError::Eof) => {}
            Err(e) => debug!(client_id = ?self.client_id, error = %e, "Connection ended"),
        }

        self.cancel_token.cancel();
        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    async fn handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = timeout(READ_TIMEOUT, self.read_message())
            .await
            .map_err(|_| ConnectionError::Timeout)??;

        let version = msg.protocol_version;
        if !version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %version,
                daemon_version = %ProtocolVersion::CURRENT,
                "Rejecting client with incompatible protocol"
            );
            self.send(DaemonMessage::rejected(&format!(
                "Client protocol {version} is incompatible with daemon protocol {}",
                ProtocolVersion::CURRENT
            )))
            .await?;
            return Err(ConnectionError::VersionMismatch {
                client: version,
                server: ProtocolVersion::CURRENT,
            });
        }

        let client_id = match msg.message {
            MessageType::Connect { client_id } => client_id,
            other => {
                self.send(DaemonMessage::error_with_code(
                    "The first message must be connect",
                    INVALID_REQUEST,
                ))
                .await?;
                return Err(ConnectionError::UnexpectedMessage(format!("{other:?}")));
            }
        };

        let client_id = client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
        self.client_id = Some(client_id.clone());
        self.send(DaemonMessage::connected(client_id)).await
    }

    /// The command loop.
    async fn serve(&mut self) -> Result<(), ConnectionError> {
        let cancel_token = self.cancel_token.clone();

        loop {
            let read = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => return Err(ConnectionError::Shutdown),
                read = timeout(READ_TIMEOUT, self.read_message()) => read,
            };

            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::ParseError(reason))) => {
                    debug!(client_id = ?self.client_id, error = %reason, "Malformed message");
                    self.send(DaemonMessage::error_with_code(
                        &format!("Parse error: {reason}"),
                        INVALID_REQUEST,
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                // Subscribers may stay silent indefinitely.
                Err(_) if self.subscription.is_some() => continue,
                Err(_) => return Err(ConnectionError::Timeout),
            };

            debug!(
                client_id = ?self.client_id,
                device = ?msg.message.device_key(),
                "Command received"
            );
            if let Some(reply) = self.dispatch(msg.message).await? {
                self.send(reply).await?;
            }
        }
    }

    /// Executes one command, returning the reply to write (if any).
    async fn dispatch(
        &mut self,
        command: MessageType,
    ) -> Result<Option<DaemonMessage>, ConnectionError> {
        let pool = self.controller.pool().clone();
        let orchestrator = self.controller.orchestrator().clone();

        let reply = match command {
            MessageType::Connect { .. } => {
                DaemonMessage::error_with_code("Already connected", INVALID_REQUEST)
            }

            MessageType::ListDevices => DaemonMessage::device_list(pool.list_devices().await),

            MessageType::AddDevice { device } => self.add_device(device).await,

            MessageType::RemoveDevice { ip, port } => {
                match pool.remove_device(&DeviceKey::new(ip, port)).await {
                    Ok(()) => DaemonMessage::ok(),
                    Err(e) => pool_error(&e),
                }
            }

            MessageType::ConnectDevice { ip, port } => {
                let key = DeviceKey::new(ip, port);
                match pool.connect(&key).await {
                    Ok(()) => DaemonMessage::ok_with(format!("Connected to {key}")),
                    Err(e) => pool_error(&e),
                }
            }

            MessageType::ConnectAll => {
                let summary = pool.connect_all().await;
                DaemonMessage::ConnectAllComplete {
                    connected: summary.connected as u32,
                    failed: summary.failed as u32,
                }
            }

            MessageType::DisconnectDevice { ip, port } => {
                let key = DeviceKey::new(ip, port);
                match pool.disconnect(&key).await {
                    Ok(true) => DaemonMessage::ok_with(format!("Disconnected {key}")),
                    Ok(false) => DaemonMessage::ok(),
                    Err(e) => pool_error(&e),
                }
            }

            MessageType::StartRecording => match orchestrator.start_recording().await {
                Ok(cycle) => DaemonMessage::RecordingScheduled {
                    fire_at: cycle.fire_at_utc,
                    lead_time_ms: cycle.lead_time.as_millis() as u64,
                    devices: cycle.device_count() as u32,
                    transport: cycle.has_transport(),
                },
                Err(e) => DaemonMessage::error_with_code(&e.to_string(), e.code()),
            },

            MessageType::StopRecording => {
                let summary = orchestrator.stop_recording().await;
                DaemonMessage::RecordingStopped {
                    stopped: summary.stopped as u32,
                    failed: summary.failed as u32,
                    cancelled: summary.cancelled as u32,
                }
            }

            MessageType::SetTransport { ip, port } => self.set_transport(ip, port).await,

            MessageType::GetTransport => {
                DaemonMessage::transport_config(pool.transport().await.as_ref())
            }

            MessageType::Subscribe => return self.subscribe().await,

            MessageType::Unsubscribe => {
                if let Some(token) = self.subscription.take() {
                    token.cancel();
                    debug!(client_id = ?self.client_id, "Client unsubscribed");
                }
                return Ok(None);
            }

            MessageType::Ping { seq } => DaemonMessage::pong(seq),

            MessageType::Disconnect => return Err(ConnectionError::Eof),
        };

        Ok(Some(reply))
    }

    async fn add_device(&self, device: DeviceDescriptor) -> DaemonMessage {
        let key = device.key();
        match self.controller.pool().add_device(device).await {
            Ok(()) => {
                info!(client_id = ?self.client_id, device = %key, "Device added");
                DaemonMessage::ok_with(format!("Added {key}"))
            }
            Err(e) => pool_error(&e),
        }
    }

    async fn set_transport(&self, ip: String, port: u16) -> DaemonMessage {
        let target = match TransportTarget::new(ip, port) {
            Ok(target) => target,
            Err(e) => return DaemonMessage::error_with_code(&e.to_string(), INVALID_REQUEST),
        };

        let pool = self.controller.pool();
        if let Err(e) = pool.set_transport(Some(target)).await {
            return pool_error(&e);
        }
        DaemonMessage::transport_config(pool.transport().await.as_ref())
    }

    /// Starts forwarding events to this client.
    ///
    /// The `ok` reply is written here, before the forwarder starts, so the
    /// client sees it ahead of the replayed statuses. Returns the reply to
    /// send instead when subscribing is refused.
    async fn subscribe(&mut self) -> Result<Option<DaemonMessage>, ConnectionError> {
        if self.subscription.is_some() {
            return Ok(Some(DaemonMessage::ok_with("Already subscribed")));
        }

        let Some(slot) = SubscriberSlot::acquire(&self.subscribers) else {
            let err = ServerError::TooManySubscribers {
                max: MAX_SUBSCRIBERS,
            };
            return Ok(Some(DaemonMessage::error_with_code(&err.to_string(), err.code())));
        };

        let subscription = match self.controller.pool().subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => return Ok(Some(pool_error(&e))),
        };

        self.send(DaemonMessage::ok()).await?;

        let token = self.cancel_token.child_token();
        let subscriber = SocketSubscriber::new(Arc::clone(&self.writer));
        let forward_token = token.clone();
        tokio::spawn(async move {
            events::forward(subscription, subscriber, forward_token).await;
            drop(slot);
        });
        self.subscription = Some(token);

        debug!(client_id = ?self.client_id, "Client subscribed to events");
        Ok(None)
    }

    /// Reads the next non-blank line and parses it.
    ///
    /// Cancel-safe: bytes of an unfinished line live in the codec buffer,
    /// not in this future, so a timeout mid-line loses nothing.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        loop {
            let line = match self.reader.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(ConnectionError::MessageTooLarge {
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(ConnectionError::Io(e.to_string())),
                None => return Err(ConnectionError::Eof),
            };

            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map_err(|e| ConnectionError::ParseError(e.to_string()));
        }
    }

    async fn send(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }
}

fn pool_error(err: &PoolError) -> DaemonMessage {
    DaemonMessage::error_with_code(&err.to_string(), err.code())
}

/// Writes one JSON line and flushes it.
async fn write_message(writer: &SharedWriter, msg: &DaemonMessage) -> Result<(), ConnectionError> {
    let mut line =
        serde_json::to_vec(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;
    line.push(b'\n');

    let mut writer = writer.lock().await;
    let write = async {
        writer.write_all(&line).await?;
        writer.flush().await
    };

    match timeout(WRITE_TIMEOUT, write).await {
        Ok(result) => result.map_err(|e| ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

// ============================================================================
// Event forwarding
// ============================================================================

/// Writes device events to a client socket.
pub struct SocketSubscriber {
    writer: SharedWriter,
}

impl SocketSubscriber {
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Subscriber for SocketSubscriber {
    async fn on_event(&mut self, event: DeviceEvent) -> Result<(), SubscriberGone> {
        write_message(&self.writer, &event.into_message())
            .await
            .map_err(|e| {
                debug!(error = %e, "Failed to send event to subscriber");
                SubscriberGone
            })
    }
}

/// One unit of the server-wide subscriber budget, released on drop.
struct SubscriberSlot(Arc<AtomicUsize>);

impl SubscriberSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < MAX_SUBSCRIBERS).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for SubscriberSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Errors that end a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("incompatible protocol: client {client}, daemon {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("malformed message: {0}")]
    ParseError(String),

    #[error("socket error: {0}")]
    Io(String),

    #[error("client closed the connection")]
    Eof,

    #[error("idle timeout")]
    Timeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("line exceeds the {max} byte limit")]
    MessageTooLarge { max: usize },

    #[error("daemon shutting down")]
    Shutdown,
}
