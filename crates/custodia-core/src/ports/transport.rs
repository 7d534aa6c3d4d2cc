//! Transport port (remote authority exchange)
//!
//! The heartbeat is the sole channel for remote-initiated transitions:
//! only the `lock_status` of a successful heartbeat response feeds
//! reconciliation. Alerts are best-effort fire-and-forget; a failure to
//! deliver one never blocks enforcement.
//!
//! Wire security (TLS, authentication headers) is the adapter's concern
//! and out of scope here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    command::ManagementCommand,
    fingerprint::DeviceIdentifiers,
    mismatch::{MismatchKind, MismatchSeverity},
    newtypes::DeviceId,
};

/// Errors at the transport boundary
///
/// Connectivity and timeout failures are recoverable: the caller queues
/// the work and retries on the next heartbeat cycle. A rejection is a
/// definitive answer from the authority, not a connectivity problem.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The authority could not be reached
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    /// The request did not complete within the configured bound
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The authority answered with a rejection
    #[error("Request rejected by authority: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Returns true if the failure is a connectivity problem worth
    /// retrying on the next cycle (as opposed to a rejection)
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Connectivity(_) | TransportError::Timeout(_)
        )
    }
}

/// Local lock status as reported inside the heartbeat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockStatusReport {
    /// Whether the device is currently locked
    pub is_locked: bool,
    /// Current lock reason, if locked
    pub reason: Option<String>,
}

/// Heartbeat request sent every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Enrolled device identifier
    pub device_id: DeviceId,
    /// When the request was built
    pub timestamp: DateTime<Utc>,
    /// Current device identifier snapshot
    #[serde(rename = "device_snapshot")]
    pub snapshot: DeviceIdentifiers,
    /// Local lock status
    pub lock_status: LockStatusReport,
}

/// The remote authority's declared lock intent
///
/// This is the strongly-typed reconciliation snapshot: the only part of a
/// heartbeat response that can drive a state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteLockSnapshot {
    /// Whether the authority wants the device locked
    pub is_locked: bool,
    /// Categorized reason to display when locking
    pub reason: Option<String>,
}

/// Heartbeat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Whether the authority accepted the heartbeat
    pub success: bool,
    /// The authority's declared intent
    pub lock_status: RemoteLockSnapshot,
}

/// Acknowledgement of a management command delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the authority accepted the command
    pub success: bool,
    /// Operator-facing acknowledgement text
    pub message: String,
    /// Authority-side processing time
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget integrity drift notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchAlert {
    /// Enrolled device identifier
    pub device_id: DeviceId,
    /// Classified tampering kind
    pub mismatch_type: MismatchKind,
    /// Classified severity
    pub severity: MismatchSeverity,
    /// Baseline value
    pub stored_value: String,
    /// Observed value
    pub current_value: String,
    /// When the drift was classified
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget repeated-failure notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousActivityAlert {
    /// Enrolled device identifier
    pub device_id: DeviceId,
    /// What the tracker observed
    pub reason: String,
}

/// Port trait for the remote authority exchange
#[async_trait::async_trait]
pub trait ITransport: Send + Sync {
    /// Performs one heartbeat exchange
    async fn send_heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError>;

    /// Delivers a management command to the authority
    async fn send_command(
        &self,
        device_id: &DeviceId,
        command: &ManagementCommand,
    ) -> Result<CommandResponse, TransportError>;

    /// Delivers an integrity mismatch alert (best-effort)
    async fn send_mismatch_alert(&self, alert: &MismatchAlert) -> Result<(), TransportError>;

    /// Delivers a suspicious-activity alert (best-effort)
    async fn send_suspicious_activity(
        &self,
        alert: &SuspiciousActivityAlert,
    ) -> Result<(), TransportError>;
}
