//! Fire-and-forget OSC signals to the external transport target.
//!
//! Each signal is one UDP datagram. There is no acknowledgement, so a
//! successful send only means the datagram left this host. Resolving the
//! target and binding the socket happen in [`TransportClient::prepare`],
//! ahead of the send.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use syncrec_core::{TransportAction, TransportTarget};
use syncrec_protocol::osc;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

/// Errors from sending a transport signal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not resolve {0}")]
    Unresolved(String),

    #[error("resolving {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("UDP send failed: {0}")]
    Io(#[from] io::Error),
}

/// Sends OSC actions over UDP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportClient;

impl TransportClient {
    pub fn new() -> Self {
        Self
    }

    /// Resolves `target` and binds a socket for it, within `limit`.
    pub async fn prepare(
        &self,
        target: &TransportTarget,
        limit: Duration,
    ) -> Result<PreparedSignal, TransportError> {
        match timeout(limit, resolve_and_bind(target)).await {
            Ok(prepared) => prepared,
            Err(_) => Err(TransportError::Timeout {
                target: target.to_string(),
                after: limit,
            }),
        }
    }
}

async fn resolve_and_bind(target: &TransportTarget) -> Result<PreparedSignal, TransportError> {
    let addr = lookup_host((target.ip.as_str(), target.port))
        .await?
        .next()
        .ok_or_else(|| TransportError::Unresolved(target.to_string()))?;

    let bind: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;

    Ok(PreparedSignal {
        target: target.clone(),
        addr,
        socket,
    })
}

/// A resolved transport target with a bound socket, ready to send.
#[derive(Debug)]
pub struct PreparedSignal {
    target: TransportTarget,
    addr: SocketAddr,
    socket: UdpSocket,
}

impl PreparedSignal {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends `action` as one datagram.
    pub async fn send(&self, action: TransportAction) -> Result<(), TransportError> {
        let packet = osc::encode_action(action);
        self.socket.send_to(&packet, self.addr).await?;

        debug!(
            target = %self.target,
            %action,
            address = %action.osc_address(),
            "Transport signal sent"
        );
        Ok(())
    }
}
