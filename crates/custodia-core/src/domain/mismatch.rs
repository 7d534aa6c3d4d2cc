//! Integrity mismatch domain entities
//!
//! A mismatch is a classified condition, not an error: comparison of the
//! current device identifiers against the stored baseline produces
//! [`MismatchRecord`]s whose severity and kind drive the response policy
//! (lock, alert, audit). Records are append-only with a capped history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which identifier drifted from the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierField {
    SerialNumber,
    HardwareId,
    OsBuild,
    SimIdentifiers,
    InstalledMemory,
    Rooted,
    UsbDebugging,
    DeveloperMode,
    BootloaderUnlocked,
    CustomRom,
}

impl fmt::Display for IdentifierField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentifierField::SerialNumber => "serial_number",
            IdentifierField::HardwareId => "hardware_id",
            IdentifierField::OsBuild => "os_build",
            IdentifierField::SimIdentifiers => "sim_identifiers",
            IdentifierField::InstalledMemory => "installed_memory",
            IdentifierField::Rooted => "rooted",
            IdentifierField::UsbDebugging => "usb_debugging",
            IdentifierField::DeveloperMode => "developer_mode",
            IdentifierField::BootloaderUnlocked => "bootloader_unlocked",
            IdentifierField::CustomRom => "custom_rom",
        };
        write!(f, "{}", s)
    }
}

impl IdentifierField {
    /// Generic reason string exposed outward; never includes the values
    pub fn mismatch_reason(&self) -> &'static str {
        match self {
            IdentifierField::SerialNumber => "Device serial number mismatch detected",
            IdentifierField::HardwareId => "Hardware identifier mismatch detected",
            IdentifierField::OsBuild => "Operating system build changed",
            IdentifierField::SimIdentifiers => "SIM identifier mismatch detected",
            IdentifierField::InstalledMemory => "Device memory configuration changed",
            IdentifierField::Rooted => "Device rooting status changed",
            IdentifierField::UsbDebugging => "USB debugging status changed",
            IdentifierField::DeveloperMode => "Developer mode status changed",
            IdentifierField::BootloaderUnlocked => "Bootloader unlock status changed",
            IdentifierField::CustomRom => "Custom ROM status changed",
        }
    }
}

/// How severe the classified drift is
///
/// Ordering is meaningful: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for MismatchSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MismatchSeverity::Low => "low",
            MismatchSeverity::Medium => "medium",
            MismatchSeverity::High => "high",
            MismatchSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// What kind of tampering the drift pattern indicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// An identifier drifted without a recognizable swap/clone pattern
    Drift,
    /// Multiple identifiers differ: the hardware is likely not the
    /// enrolled device
    DeviceSwap,
    /// The fingerprint matches while an underlying identifier differs:
    /// the fingerprint inputs are being spoofed
    DeviceClone,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MismatchKind::Drift => "drift",
            MismatchKind::DeviceSwap => "device_swap",
            MismatchKind::DeviceClone => "device_clone",
        };
        write!(f, "{}", s)
    }
}

/// One classified drift observation, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchRecord {
    /// Classified tampering kind
    kind: MismatchKind,
    /// Classified severity
    severity: MismatchSeverity,
    /// The identifier that drifted
    field: IdentifierField,
    /// Baseline value, rendered for audit
    stored_value: String,
    /// Currently observed value, rendered for audit
    current_value: String,
    /// When the comparison ran
    timestamp: DateTime<Utc>,
}

impl MismatchRecord {
    /// Creates a record stamped with the current time
    pub fn new(
        kind: MismatchKind,
        severity: MismatchSeverity,
        field: IdentifierField,
        stored_value: impl Into<String>,
        current_value: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            field,
            stored_value: stored_value.into(),
            current_value: current_value.into(),
            timestamp: Utc::now(),
        }
    }

    /// Reconstructs a record from storage
    pub fn from_parts(
        kind: MismatchKind,
        severity: MismatchSeverity,
        field: IdentifierField,
        stored_value: String,
        current_value: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            severity,
            field,
            stored_value,
            current_value,
            timestamp,
        }
    }

    /// Returns the classified kind
    pub fn kind(&self) -> MismatchKind {
        self.kind
    }

    /// Returns the classified severity
    pub fn severity(&self) -> MismatchSeverity {
        self.severity
    }

    /// Returns the drifted identifier
    pub fn field(&self) -> IdentifierField {
        self.field
    }

    /// Returns the baseline value
    pub fn stored_value(&self) -> &str {
        &self.stored_value
    }

    /// Returns the observed value
    pub fn current_value(&self) -> &str {
        &self.current_value
    }

    /// Returns when the comparison ran
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
