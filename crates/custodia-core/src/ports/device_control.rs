//! Device control port (privileged platform capability)
//!
//! The capability that physically blocks user interaction. Losing the
//! privilege is a permanent condition: lock operations fail terminally,
//! are audited, and are never retried automatically.

use thiserror::Error;

/// Errors from the device-control capability
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The privilege backing the capability has been revoked
    #[error("Device control privilege unavailable: {0}")]
    PrivilegeLost(String),

    /// The capability is present but the operation failed
    #[error("Device control operation failed: {0}")]
    Failed(String),
}

/// Port trait for the privileged device-control capability
#[async_trait::async_trait]
pub trait IDeviceControl: Send + Sync {
    /// Physically blocks user interaction now
    ///
    /// Failure is terminal for the calling lock operation.
    async fn lock_now(&self) -> Result<(), ControlError>;

    /// Returns true if the privilege backing the capability is intact
    async fn is_control_available(&self) -> bool;
}
