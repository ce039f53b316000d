//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

impl DomainError {
    /// Creates an invalid field error.
    pub fn invalid(field: &str, value: impl ToString, expected: &str) -> Self {
        Self::InvalidFieldValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
