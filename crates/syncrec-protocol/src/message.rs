//! Protocol message types for daemon communication.
//!
//! Every message is one JSON object per line. Client messages carry the
//! protocol version next to a `type` tag; daemon messages carry only the tag.

use crate::version::ProtocolVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use syncrec_core::{DeviceDescriptor, DeviceKey, DeviceStatus, TransportTarget};

/// Commands a client can send to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// List every registered device with its live status
    ListDevices,

    /// Register a new device
    AddDevice { device: DeviceDescriptor },

    /// Unregister a device (disconnecting it first)
    RemoveDevice { ip: String, port: u16 },

    /// Open a session to one device
    ConnectDevice { ip: String, port: u16 },

    /// Open sessions to every registered device
    ConnectAll,

    /// Close the session to one device
    DisconnectDevice { ip: String, port: u16 },

    /// Schedule a synchronized start on every connected device
    StartRecording,

    /// Stop recording everywhere, immediately
    StopRecording,

    /// Configure the external transport target
    SetTransport { ip: String, port: u16 },

    /// Read the external transport target
    GetTransport,

    /// Receive device_status/log events (current status is replayed first)
    Subscribe,

    /// Stop receiving events
    Unsubscribe,

    /// Ping to check connection
    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

impl MessageType {
    /// Returns the device key addressed by this message, if any.
    pub fn device_key(&self) -> Option<DeviceKey> {
        match self {
            Self::RemoveDevice { ip, port }
            | Self::ConnectDevice { ip, port }
            | Self::DisconnectDevice { ip, port } => Some(DeviceKey::new(ip.clone(), *port)),
            Self::AddDevice { device } => Some(device.key()),
            _ => None,
        }
    }
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn list_devices() -> Self {
        Self::new(MessageType::ListDevices)
    }

    pub fn add_device(device: DeviceDescriptor) -> Self {
        Self::new(MessageType::AddDevice { device })
    }

    pub fn remove_device(key: &DeviceKey) -> Self {
        Self::new(MessageType::RemoveDevice {
            ip: key.host().to_string(),
            port: key.port(),
        })
    }

    pub fn connect_device(key: &DeviceKey) -> Self {
        Self::new(MessageType::ConnectDevice {
            ip: key.host().to_string(),
            port: key.port(),
        })
    }

    pub fn connect_all() -> Self {
        Self::new(MessageType::ConnectAll)
    }

    pub fn disconnect_device(key: &DeviceKey) -> Self {
        Self::new(MessageType::DisconnectDevice {
            ip: key.host().to_string(),
            port: key.port(),
        })
    }

    pub fn start_recording() -> Self {
        Self::new(MessageType::StartRecording)
    }

    pub fn stop_recording() -> Self {
        Self::new(MessageType::StopRecording)
    }

    pub fn set_transport(target: &TransportTarget) -> Self {
        Self::new(MessageType::SetTransport {
            ip: target.ip.clone(),
            port: target.port,
        })
    }

    pub fn get_transport() -> Self {
        Self::new(MessageType::GetTransport)
    }

    pub fn subscribe() -> Self {
        Self::new(MessageType::Subscribe)
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Full device list response
    DeviceList { devices: Vec<DeviceStatus> },

    /// Command completed
    #[serde(rename = "ok")]
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Result of a connect-all batch
    ConnectAllComplete { connected: u32, failed: u32 },

    /// A synchronized start was scheduled
    RecordingScheduled {
        /// Wall-clock instant at which every device fires
        fire_at: DateTime<Utc>,
        lead_time_ms: u64,
        devices: u32,
        transport: bool,
    },

    /// Stop was issued to every connected device
    RecordingStopped {
        stopped: u32,
        failed: u32,
        /// Pending start actions that were cancelled
        cancelled: u32,
    },

    /// Current transport target (both fields absent when unset)
    TransportConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },

    /// Event: a device's status changed (or replay on subscribe)
    DeviceStatus(DeviceStatus),

    /// Event: human-readable log line
    Log { message: String },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn device_list(devices: Vec<DeviceStatus>) -> Self {
        Self::DeviceList { devices }
    }

    pub fn ok() -> Self {
        Self::Success { message: None }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
        }
    }

    pub fn transport_config(target: Option<&TransportTarget>) -> Self {
        Self::TransportConfig {
            ip: target.map(|t| t.ip.clone()),
            port: target.map(|t| t.port),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Returns true for unsolicited events (as opposed to command replies).
    pub fn is_event(&self) -> bool {
        matches!(self, Self::DeviceStatus(_) | Self::Log { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncrec_core::ConnectionStatus;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::connect_device(&DeviceKey::new("10.0.0.2", 4455));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "connect_device");
        assert_eq!(json["ip"], "10.0.0.2");
        assert_eq!(json["port"], 4455);
        assert_eq!(json["protocol_version"]["major"], 1);
    }

    #[test]
    fn test_add_device_parses_from_wire() {
        let line = r#"{"protocol_version":{"major":1,"minor":0},"type":"add_device","device":{"ip":"cam1","port":4455,"password":"pw","name":"Cam 1"}}"#;
        let parsed: ClientMessage = serde_json::from_str(line).unwrap();
        match parsed.message {
            MessageType::AddDevice { device } => {
                assert_eq!(device.key(), DeviceKey::new("cam1", 4455));
                assert_eq!(device.name, "Cam 1");
            }
            other => panic!("Expected AddDevice, got {other:?}"),
        }
    }

    #[test]
    fn test_device_key_extraction() {
        let msg = MessageType::DisconnectDevice {
            ip: "h".to_string(),
            port: 7,
        };
        assert_eq!(msg.device_key(), Some(DeviceKey::new("h", 7)));
        assert_eq!(MessageType::StartRecording.device_key(), None);
    }

    #[test]
    fn test_device_status_event_shape() {
        let msg = DaemonMessage::DeviceStatus(DeviceStatus {
            ip: "host1".to_string(),
            port: 1,
            name: "A".to_string(),
            status: ConnectionStatus::Connected,
            recording: true,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "device_status");
        assert_eq!(json["status"], "Connected");
        assert_eq!(json["recording"], true);
        assert!(msg.is_event());
    }

    #[test]
    fn test_success_is_tagged_ok() {
        let json = serde_json::to_string(&DaemonMessage::ok()).unwrap();
        assert_eq!(json, r#"{"type":"ok"}"#);
        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, DaemonMessage::Success { message: None }));
    }

    #[test]
    fn test_transport_config_unset() {
        let json = serde_json::to_string(&DaemonMessage::transport_config(None)).unwrap();
        assert_eq!(json, r#"{"type":"transport_config"}"#);
    }

    #[test]
    fn test_log_and_error_helpers() {
        assert!(DaemonMessage::log("hello").is_event());

        let err = DaemonMessage::error_with_code("nope", "unknown_device");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "unknown_device");
        assert!(!err.is_event());
    }
}
