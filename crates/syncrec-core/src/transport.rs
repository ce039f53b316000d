//! External transport target (a REAPER-style workstation reached over OSC).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Address of the external transport target.
///
/// At most one target is active at a time. When none is configured,
/// transport signals are skipped silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportTarget {
    pub ip: String,
    pub port: u16,
}

impl TransportTarget {
    /// Creates a new transport target, validating the address.
    pub fn new(ip: impl Into<String>, port: u16) -> DomainResult<Self> {
        let ip = ip.into();
        if ip.trim().is_empty() {
            return Err(DomainError::invalid("transport ip", "<empty>", "a hostname or IP"));
        }
        if port == 0 {
            return Err(DomainError::invalid("transport port", port, "1-65535"));
        }
        Ok(Self { ip, port })
    }
}

impl fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// The two fixed signals the transport target understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportAction {
    /// "Transport: Record"
    BeginRecord,
    /// "Transport: Stop"
    StopRecord,
}

impl TransportAction {
    /// REAPER action command identifier.
    pub fn action_id(&self) -> u32 {
        match self {
            Self::BeginRecord => 1013,
            Self::StopRecord => 1016,
        }
    }

    /// OSC address pattern that triggers this action.
    pub fn osc_address(&self) -> String {
        format!("/action/{}", self.action_id())
    }
}

impl fmt::Display for TransportAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginRecord => write!(f, "begin record"),
            Self::StopRecord => write!(f, "stop record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osc_addresses() {
        assert_eq!(TransportAction::BeginRecord.osc_address(), "/action/1013");
        assert_eq!(TransportAction::StopRecord.osc_address(), "/action/1016");
    }

    #[test]
    fn test_target_validation() {
        assert!(TransportTarget::new("127.0.0.1", 8000).is_ok());
        assert!(TransportTarget::new("", 8000).is_err());
        assert!(TransportTarget::new("127.0.0.1", 0).is_err());
    }

    #[test]
    fn test_target_display() {
        let target = TransportTarget::new("10.0.0.9", 9000).unwrap();
        assert_eq!(target.to_string(), "10.0.0.9:9000");
    }
}
