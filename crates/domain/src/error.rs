//! Unified error type for the domain layer.

use thiserror::Error;

/// Errors raised by pure domain operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Validation failed (e.g., invalid field values)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Runtime projection could not be built from the aggregate
    #[error("Projection failed: {0}")]
    Projection(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn projection(msg: impl Into<String>) -> Self {
        Self::Projection(msg.into())
    }
}
