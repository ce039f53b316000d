//! OBS WebSocket v5 sessions.
//!
//! Connecting performs the Hello/Identify/Identified handshake on the
//! calling task. After that a reader task owns the receive half of the
//! socket and routes each `RequestResponse` to the caller waiting on its
//! `requestId`. Requests from different tasks can be in flight at once;
//! only the write half is behind a mutex.
//!
//! When the reader stops (socket closed, read error) every waiting request
//! fails with [`SessionError::Closed`], as does every later request.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use async_tungstenite::tungstenite::{self, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use syncrec_core::{DeviceDescriptor, DeviceKey};
use syncrec_protocol::obs::{
    self, Identify, ObsProtocolError, Request, RequestResponse, ServerFrame, StopRecordData,
    VersionInfo, CLOSE_AUTHENTICATION_FAILED,
};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{DeviceConnector, DeviceSession, SessionError, SharedSession};

type WsSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
type PendingRequests = Arc<Mutex<HashMap<String, oneshot::Sender<RequestResponse>>>>;

// ============================================================================
// Connector
// ============================================================================

/// Opens [`ObsSession`]s over plain `ws://`.
///
/// The connect timeout is applied by the pool, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObsConnector;

#[async_trait]
impl DeviceConnector for ObsConnector {
    async fn connect(&self, descriptor: &DeviceDescriptor) -> Result<SharedSession, SessionError> {
        let session = ObsSession::connect(descriptor).await?;
        Ok(Arc::new(session))
    }
}

// ============================================================================
// Session
// ============================================================================

/// An identified OBS WebSocket connection.
pub struct ObsSession {
    key: DeviceKey,
    sink: Mutex<WsSink>,
    pending: PendingRequests,
    next_request_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl ObsSession {
    /// Connects to `descriptor` and completes the identification handshake.
    pub async fn connect(descriptor: &DeviceDescriptor) -> Result<Self, SessionError> {
        let key = descriptor.key();
        let url = format!("ws://{}:{}", descriptor.ip, descriptor.port);
        debug!(device = %key, %url, "Opening OBS WebSocket");

        let (socket, _response) = async_tungstenite::tokio::connect_async(url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let hello = match next_frame(&mut stream).await? {
            ServerFrame::Hello(hello) => hello,
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected Hello, got {other:?}"
                )))
            }
        };

        let identify = Identify::answering(&hello, &descriptor.password).map_err(|e| match e {
            ObsProtocolError::PasswordRequired => SessionError::AuthenticationFailed(e.to_string()),
            other => SessionError::Protocol(other.to_string()),
        })?;
        let text = obs::encode_identify(&identify).map_err(protocol_error)?;
        sink.send(Message::text(text))
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let identified = match next_frame(&mut stream).await? {
            ServerFrame::Identified(identified) => identified,
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected Identified, got {other:?}"
                )))
            }
        };

        info!(
            device = %key,
            obs_websocket = hello.obs_web_socket_version.as_deref().unwrap_or("unknown"),
            rpc_version = identified.negotiated_rpc_version,
            "OBS session identified"
        );

        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(key.clone(), stream, Arc::clone(&pending), Arc::clone(&closed));
        let sink: WsSink = Box::pin(sink);

        Ok(Self {
            key,
            sink: Mutex::new(sink),
            pending,
            next_request_id: AtomicU64::new(1),
            closed,
            reader,
        })
    }

    /// Sends a request and waits for its response data.
    async fn request(&self, request_type: &str) -> Result<Option<serde_json::Value>, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        // The reader marks the session closed before it drops the pending map,
        // so a request registered after that point is caught here.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&request_id);
            return Err(SessionError::Closed);
        }

        let text = obs::encode_request(&Request {
            request_type: request_type.to_string(),
            request_id: request_id.clone(),
            request_data: None,
        })
        .map_err(protocol_error)?;

        let sent = {
            let mut sink = self.sink.lock().await;
            sink.send(Message::text(text)).await
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(&request_id);
            self.closed.store(true, Ordering::SeqCst);
            return Err(SessionError::Connect(e.to_string()));
        }

        let response = rx.await.map_err(|_| SessionError::Closed)?;
        response
            .into_result()
            .map_err(|e| SessionError::Request(e.to_string()))
    }
}

#[async_trait]
impl DeviceSession for ObsSession {
    async fn version(&self) -> Result<String, SessionError> {
        let data = self.request(obs::request::GET_VERSION).await?;
        let info: VersionInfo = match data {
            Some(value) => serde_json::from_value(value).map_err(protocol_error)?,
            None => VersionInfo::default(),
        };
        Ok(info.obs_version)
    }

    async fn start_record(&self) -> Result<(), SessionError> {
        self.request(obs::request::START_RECORD).await.map(|_| ())
    }

    async fn stop_record(&self) -> Result<Option<String>, SessionError> {
        let data = self.request(obs::request::STOP_RECORD).await?;
        let stop: StopRecordData = match data {
            Some(value) => serde_json::from_value(value).map_err(protocol_error)?,
            None => StopRecordData::default(),
        };
        Ok(stop.output_path)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(device = %self.key, error = %e, "Error closing OBS WebSocket");
        }
        drop(sink);
        self.reader.abort();
        self.pending.lock().await.clear();
        debug!(device = %self.key, "OBS session closed");
    }
}

impl Drop for ObsSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl fmt::Debug for ObsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObsSession")
            .field("key", &self.key)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Frame I/O
// ============================================================================

/// Reads until the next decodable text frame.
async fn next_frame<S>(stream: &mut S) -> Result<ServerFrame, SessionError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(item) = stream.next().await {
        let message = item.map_err(|e| SessionError::Connect(e.to_string()))?;
        match message {
            Message::Text(text) => return obs::decode(text.as_str()).map_err(protocol_error),
            Message::Close(frame) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                let reason = frame
                    .as_ref()
                    .map(|f| f.reason.to_string())
                    .unwrap_or_default();
                return Err(match code {
                    Some(CLOSE_AUTHENTICATION_FAILED) => SessionError::AuthenticationFailed(reason),
                    _ => SessionError::Closed,
                });
            }
            _ => continue,
        }
    }
    Err(SessionError::Closed)
}

fn spawn_reader<S>(
    key: DeviceKey,
    mut stream: S,
    pending: PendingRequests,
    closed: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(Message::Text(text)) => match obs::decode(text.as_str()) {
                    Ok(ServerFrame::RequestResponse(response)) => {
                        let waiter = pending.lock().await.remove(&response.request_id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!(
                                device = %key,
                                request_id = %response.request_id,
                                "Response for unknown request"
                            ),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(device = %key, error = %e, "Ignoring undecodable frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!(device = %key, "OBS closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(device = %key, error = %e, "OBS WebSocket read failed");
                    break;
                }
            }
        }

        closed.store(true, Ordering::SeqCst);
        pending.lock().await.clear();
    })
}

fn protocol_error<E: fmt::Display>(err: E) -> SessionError {
    SessionError::Protocol(err.to_string())
}
