//! Device identity, descriptors and the status view.
//!
//! A device is a remote recording endpoint (an OBS instance) addressed by
//! host and port. The `(host, port)` pair is the device's identity; every
//! other field of a [`DeviceDescriptor`] is payload.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Device Key
// ============================================================================

/// Identity of a device: its host and port.
///
/// Serialized as `{"ip": ..., "port": ...}` so that it can be embedded in
/// wire messages next to the other device fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    #[serde(rename = "ip")]
    host: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    port: u16,
}

impl DeviceKey {
    /// Creates a new key from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` string.
    ///
    /// The last `:` separates the port, so bracket-less IPv6 literals are
    /// not supported.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| DomainError::ParseError {
            field: "address".to_string(),
            reason: format!("'{s}' is not in host:port form"),
        })?;

        let port = port.parse::<u16>().map_err(|e| DomainError::ParseError {
            field: "port".to_string(),
            reason: e.to_string(),
        })?;

        let key = Self::new(host, port);
        key.validate()?;
        Ok(key)
    }

    /// Returns the host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Checks that the host is non-empty and the port is non-zero.
    pub fn validate(&self) -> DomainResult<()> {
        if self.host.trim().is_empty() {
            return Err(DomainError::invalid("host", "<empty>", "a hostname or IP"));
        }
        if self.port == 0 {
            return Err(DomainError::invalid("port", self.port, "1-65535"));
        }
        Ok(())
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Device Descriptor
// ============================================================================

/// A registered device: where it lives, how to authenticate, what to call it.
///
/// Descriptors are never mutated in place; to change a field, remove the
/// device and add it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Host name or IP address
    pub ip: String,

    /// WebSocket port
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,

    /// Session password (empty when the device has authentication disabled)
    #[serde(default)]
    pub password: String,

    /// Human-readable display name
    #[serde(default)]
    pub name: String,
}

impl DeviceDescriptor {
    /// Creates a new descriptor.
    pub fn new(
        ip: impl Into<String>,
        port: u16,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            port,
            password: password.into(),
            name: name.into(),
        }
    }

    /// Returns the identity key of this descriptor.
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.ip.clone(), self.port)
    }

    /// Returns true if this descriptor has the given key.
    pub fn has_key(&self, key: &DeviceKey) -> bool {
        self.ip == key.host() && self.port == key.port()
    }

    /// Validates the address fields.
    pub fn validate(&self) -> DomainResult<()> {
        self.key().validate()
    }

    /// Returns the display name, falling back to the address.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.key().to_string()
        } else {
            self.name.clone()
        }
    }
}

// ============================================================================
// Device Status
// ============================================================================

/// Whether a live session to the device exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    /// Returns true for `Connected`.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Point-in-time status of one device, as shown to observers.
///
/// This is both the payload of `device_status` events and the element type
/// of device listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub ip: String,
    pub port: u16,
    pub name: String,
    pub status: ConnectionStatus,
    pub recording: bool,
}

impl DeviceStatus {
    /// Status of a registered device with no live session.
    pub fn disconnected(descriptor: &DeviceDescriptor) -> Self {
        Self {
            ip: descriptor.ip.clone(),
            port: descriptor.port,
            name: descriptor.name.clone(),
            status: ConnectionStatus::Disconnected,
            recording: false,
        }
    }

    /// Status of a connected device.
    pub fn connected(descriptor: &DeviceDescriptor, recording: bool) -> Self {
        Self {
            ip: descriptor.ip.clone(),
            port: descriptor.port,
            name: descriptor.name.clone(),
            status: ConnectionStatus::Connected,
            recording,
        }
    }

    /// Returns the identity key of the device this status describes.
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.ip.clone(), self.port)
    }

    /// Returns true if a live session exists.
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Accepts `4455` as well as `"4455"`.
///
/// Device files written by earlier tooling stored ports as strings.
fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u16),
        Text(String),
    }

    match RawPort::deserialize(deserializer)? {
        RawPort::Number(n) => Ok(n),
        RawPort::Text(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|e| serde::de::Error::custom(format!("invalid port '{s}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = DeviceKey::new("10.0.0.5", 4455);
        assert_eq!(key.to_string(), "10.0.0.5:4455");
    }

    #[test]
    fn test_key_parse() {
        let key = DeviceKey::parse("studio-a.local:4455").unwrap();
        assert_eq!(key.host(), "studio-a.local");
        assert_eq!(key.port(), 4455);
    }

    #[test]
    fn test_key_parse_rejects_bad_input() {
        assert!(DeviceKey::parse("no-port").is_err());
        assert!(DeviceKey::parse("host:notanumber").is_err());
        assert!(DeviceKey::parse("host:0").is_err());
        assert!(DeviceKey::parse(":4455").is_err());
    }

    #[test]
    fn test_descriptor_key_and_has_key() {
        let d = DeviceDescriptor::new("host1", 1, "secret", "Cam A");
        assert_eq!(d.key(), DeviceKey::new("host1", 1));
        assert!(d.has_key(&DeviceKey::new("host1", 1)));
        assert!(!d.has_key(&DeviceKey::new("host1", 2)));
    }

    #[test]
    fn test_descriptor_display_name_fallback() {
        let named = DeviceDescriptor::new("host1", 1, "", "Cam A");
        assert_eq!(named.display_name(), "Cam A");

        let unnamed = DeviceDescriptor::new("host1", 1, "", "");
        assert_eq!(unnamed.display_name(), "host1:1");
    }

    #[test]
    fn test_descriptor_accepts_string_port() {
        let json = r#"{"ip": "192.168.1.20", "port": "4455", "password": "pw", "name": "Stage"}"#;
        let d: DeviceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.port, 4455);
        assert_eq!(d.name, "Stage");
    }

    #[test]
    fn test_descriptor_defaults_optional_fields() {
        let json = r#"{"ip": "192.168.1.20", "port": 4455}"#;
        let d: DeviceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.password, "");
        assert_eq!(d.name, "");
    }

    #[test]
    fn test_descriptor_rejects_garbage_port() {
        let json = r#"{"ip": "h", "port": "http"}"#;
        assert!(serde_json::from_str::<DeviceDescriptor>(json).is_err());
    }

    #[test]
    fn test_status_serialization_shape() {
        let d = DeviceDescriptor::new("host1", 1, "secret", "Cam A");
        let status = DeviceStatus::connected(&d, true);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["ip"], "host1");
        assert_eq!(json["port"], 1);
        assert_eq!(json["name"], "Cam A");
        assert_eq!(json["status"], "Connected");
        assert_eq!(json["recording"], true);
        // The credential never leaves the daemon through a status view.
        assert!(json.get("password").is_none());
    }

    #[test]
    fn test_disconnected_status_is_not_recording() {
        let d = DeviceDescriptor::new("host2", 2, "", "Cam B");
        let status = DeviceStatus::disconnected(&d);
        assert_eq!(status.status, ConnectionStatus::Disconnected);
        assert!(!status.recording);
        assert!(!status.is_connected());
        assert_eq!(status.key(), d.key());
    }
}
