//! Domain-level errors.
//!
//! These errors are independent of the store driver and of transport.

use thiserror::Error;

/// Domain-specific errors for invalid values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed a domain rule
    #[error("Validation error: {0}")]
    Validation(String),
}

impl DomainError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }
}

/// Result type alias for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
