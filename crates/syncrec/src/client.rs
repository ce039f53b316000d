//! Daemon connection client.
//!
//! `DaemonClient` holds one socket connection. Commands are request/reply:
//! the client sends one line and reads lines until a reply arrives, skipping
//! any events that a subscription interleaves. `syncrec watch` instead
//! subscribes and reads events until the connection ends, reconnecting with
//! exponential backoff.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::path::PathBuf;
use std::time::Duration;

use syncrec_core::{DeviceDescriptor, DeviceKey, DeviceStatus, TransportTarget};
use syncrec_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};

/// Default socket path, matching the daemon's.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/syncrec.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "SYNCREC_SOCKET";

// ============================================================================
// Configuration
// ============================================================================

/// Connection behavior for [`DaemonClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Bound on waiting for a reply. Connect-all and stop wait on every
    /// device, so this is generous.
    pub request_timeout: Duration,

    /// Initial delay before the first reconnect attempt.
    pub retry_initial_delay: Duration,

    /// Maximum delay between reconnect attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff.
    pub retry_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            request_timeout: Duration::from_secs(30),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }
}

impl ClientConfig {
    /// Default configuration with the socket path taken from
    /// `SYNCREC_SOCKET` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os(SOCKET_ENV).filter(|p| !p.is_empty()) {
            config.socket_path = PathBuf::from(path);
        }
        config
    }

    /// Delay to wait after `delay`, growing exponentially up to the cap.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.retry_max_delay)
    }
}

// ============================================================================
// Daemon Client
// ============================================================================

/// One connection to the syncrec daemon.
pub struct DaemonClient {
    config: ClientConfig,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
}

impl DaemonClient {
    /// Connects and performs the protocol handshake.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let stream = UnixStream::connect(&config.socket_path)
            .await
            .map_err(|e| {
                CliError::DaemonConnection(format!("{}: {e}", config.socket_path.display()))
            })?;

        let (reader, writer) = stream.into_split();
        let mut client = Self {
            config,
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
        };
        client.handshake().await?;
        Ok(client)
    }

    /// Connects, retrying with exponential backoff until connected or
    /// cancelled.
    pub async fn connect_with_retry(
        config: ClientConfig,
        cancel_token: &CancellationToken,
    ) -> Result<Self> {
        let mut delay = config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            debug!(
                attempt,
                socket_path = %config.socket_path.display(),
                "Attempting to connect to daemon"
            );

            match Self::connect(config.clone()).await {
                Ok(client) => return Ok(client),
                // Retrying will not fix a version mismatch.
                Err(e @ CliError::VersionMismatch { .. }) => return Err(e),
                Err(e) => {
                    if attempt == 1 {
                        warn!(error = %e, "Daemon not reachable, will retry");
                    } else {
                        debug!(attempt, error = %e, "Connection attempt failed");
                    }
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    delay = config.next_delay(delay);
                }
                _ = cancel_token.cancelled() => {
                    return Err(CliError::DaemonConnection("cancelled".to_string()));
                }
            }
        }
    }

    /// The client ID assigned by the daemon.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send(&ClientMessage::connect(None)).await?;

        match self.recv_timed().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(CliError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                debug!(client_id, protocol_version = %protocol_version, "Handshake complete");
                self.client_id = client_id;
                Ok(())
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(CliError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                daemon_version: protocol_version.to_string(),
            }),
            other => Err(CliError::ProtocolError(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Sends one message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    /// Reads the next message, or `None` once the daemon closes the socket.
    async fn recv(&mut self) -> Result<Option<DaemonMessage>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                return Ok(Some(serde_json::from_str(line.trim())?));
            }
        }
    }

    async fn recv_timed(&mut self) -> Result<DaemonMessage> {
        let limit = self.config.request_timeout;
        match timeout(limit, self.recv()).await {
            Ok(Ok(Some(message))) => Ok(message),
            Ok(Ok(None)) => Err(CliError::ProtocolError(
                "Daemon closed the connection".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CliError::Timeout),
        }
    }

    /// Sends a command and waits for its reply, skipping interleaved events.
    ///
    /// An `error` reply becomes [`CliError::Daemon`].
    pub async fn request(&mut self, message: ClientMessage) -> Result<DaemonMessage> {
        self.send(&message).await?;
        loop {
            match self.recv_timed().await? {
                message if message.is_event() => continue,
                DaemonMessage::Error { message, code } => {
                    return Err(CliError::Daemon { message, code })
                }
                reply => return Ok(reply),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    pub async fn list_devices(&mut self) -> Result<Vec<DeviceStatus>> {
        match self.request(ClientMessage::list_devices()).await? {
            DaemonMessage::DeviceList { devices } => Ok(devices),
            other => Err(unexpected("device_list", &other)),
        }
    }

    pub async fn add_device(&mut self, device: DeviceDescriptor) -> Result<DaemonMessage> {
        self.request(ClientMessage::add_device(device)).await
    }

    pub async fn remove_device(&mut self, key: &DeviceKey) -> Result<DaemonMessage> {
        self.request(ClientMessage::remove_device(key)).await
    }

    pub async fn connect_device(&mut self, key: &DeviceKey) -> Result<DaemonMessage> {
        self.request(ClientMessage::connect_device(key)).await
    }

    pub async fn connect_all(&mut self) -> Result<DaemonMessage> {
        self.request(ClientMessage::connect_all()).await
    }

    pub async fn disconnect_device(&mut self, key: &DeviceKey) -> Result<DaemonMessage> {
        self.request(ClientMessage::disconnect_device(key)).await
    }

    pub async fn start_recording(&mut self) -> Result<DaemonMessage> {
        self.request(ClientMessage::start_recording()).await
    }

    pub async fn stop_recording(&mut self) -> Result<DaemonMessage> {
        self.request(ClientMessage::stop_recording()).await
    }

    pub async fn set_transport(&mut self, target: &TransportTarget) -> Result<DaemonMessage> {
        self.request(ClientMessage::set_transport(target)).await
    }

    pub async fn get_transport(&mut self) -> Result<DaemonMessage> {
        self.request(ClientMessage::get_transport()).await
    }

    /// Round-trips a ping, returning the echoed sequence number.
    pub async fn ping(&mut self, seq: u64) -> Result<u64> {
        match self.request(ClientMessage::ping(seq)).await? {
            DaemonMessage::Pong { seq } => Ok(seq),
            other => Err(unexpected("pong", &other)),
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Subscribes to events. Replayed statuses follow immediately.
    pub async fn subscribe(&mut self) -> Result<()> {
        match self.request(ClientMessage::subscribe()).await? {
            DaemonMessage::Success { .. } => {
                info!(client_id = %self.client_id, "Subscribed to daemon events");
                Ok(())
            }
            other => Err(unexpected("ok", &other)),
        }
    }

    /// Waits for the next event. `None` means the daemon went away.
    ///
    /// No timeout: a quiet fleet produces no events.
    pub async fn next_event(&mut self) -> Result<Option<DaemonMessage>> {
        loop {
            match self.recv().await? {
                Some(message) if message.is_event() => return Ok(Some(message)),
                Some(other) => debug!(message = ?other, "Ignoring non-event message"),
                None => return Ok(None),
            }
        }
    }

    /// Says goodbye and closes the connection.
    pub async fn close(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

fn unexpected(expected: &str, got: &DaemonMessage) -> CliError {
    CliError::ProtocolError(format!("Expected {expected}, got {got:?}"))
}
