//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures and invalid state transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// ID parsing or validation error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Invalid fingerprint hash format (expected SHA-256 hex)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
