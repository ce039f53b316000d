//! Unix socket command surface.
//!
//! `DaemonServer` owns the socket file for as long as it runs: a stale file
//! from a crashed daemon is replaced on bind, and the file is removed again
//! when the server stops, however it stops. Every accepted client gets a
//! [`ConnectionHandler`] on its own task, cancelled together with the server.
//!
//! ```text
//!  syncrec CLI ──▶ UnixListener ──accept──▶ ConnectionHandler (per client)
//!                                              │ commands       ▲ events
//!                                              ▼                │
//!                                          Controller ──▶ Subscription
//!                                     (pool + orchestrator)
//! ```
//!
//! At most [`MAX_SUBSCRIBERS`] clients may follow the event stream at once.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A failed accept is logged and the loop keeps going

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, SharedWriter, SocketSubscriber};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::Controller;

/// Maximum number of concurrently subscribed clients
pub const MAX_SUBSCRIBERS: usize = 10;

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {source}")]
    SocketSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Too many subscribers (max: {max})")]
    TooManySubscribers { max: usize },
}

impl ServerError {
    /// Error code used on the daemon socket.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SocketSetup { .. } => "unavailable",
            Self::TooManySubscribers { .. } => "too_many_subscribers",
        }
    }
}

/// Serves the daemon socket.
pub struct DaemonServer {
    socket_path: PathBuf,
    controller: Controller,
    cancel_token: CancellationToken,
    /// Active event subscriptions across all clients
    subscribers: Arc<AtomicUsize>,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        controller: Controller,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            controller,
            cancel_token,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and serves clients until the cancellation token
    /// fires. The socket file is gone when this returns.
    pub async fn run(&self) -> Result<(), ServerError> {
        let setup_error = |source| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            source,
        };

        prepare_socket_path(&self.socket_path).map_err(setup_error)?;
        let listener = UnixListener::bind(&self.socket_path).map_err(setup_error)?;
        let _guard = SocketFileGuard(&self.socket_path);

        info!(socket = %self.socket_path.display(), "Daemon server listening");

        let mut clients = JoinSet::new();
        let mut accepted: u64 = 0;

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!(clients = clients.len(), "Server shutdown requested");
                    break;
                }

                accept = listener.accept() => match accept {
                    Ok((stream, _)) => {
                        clients.spawn(self.handler_for(stream, accepted).run());
                        accepted += 1;
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },

                // Reap finished handlers so the set does not grow unbounded.
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        }

        // Handlers hold child tokens, so they are already winding down.
        while clients.join_next().await.is_some() {}
        debug!(accepted, "All client handlers finished");
        Ok(())
    }

    fn handler_for(&self, stream: UnixStream, connection_number: u64) -> ConnectionHandler {
        let (reader, writer) = stream.into_split();
        ConnectionHandler::new(
            reader,
            writer,
            self.controller.clone(),
            Arc::clone(&self.subscribers),
            self.cancel_token.child_token(),
            connection_number,
        )
    }
}

/// Removes a leftover socket file and creates the parent directory.
fn prepare_socket_path(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Deletes the socket file when the server stops.
struct SocketFileGuard<'a>(&'a Path);

impl Drop for SocketFileGuard<'_> {
    fn drop(&mut self) {
        match fs::remove_file(self.0) {
            Ok(()) => info!(socket = %self.0.display(), "Socket removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(socket = %self.0.display(), error = %e, "Failed to remove socket file"),
        }
    }
}
