//! Device identifier and fingerprint domain entities
//!
//! The fingerprint is a SHA-256 digest over a canonical rendering of a
//! fixed set of stable device identifiers. Collection of the raw values is
//! behind the [`IIdentitySource`](crate::ports::IIdentitySource) port; this
//! module only defines the shapes and the canonical rendering the digest is
//! computed over.
//!
//! The baseline (identifiers + fingerprint) is captured once at first run
//! and replaced only through an explicit remote-approved re-baseline, never
//! silently on mismatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::FingerprintHash;

/// The fixed set of stable identifiers the fingerprint is computed over
///
/// Field additions change the canonical rendering and therefore every
/// fingerprint; treat the set as frozen once devices are enrolled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentifiers {
    /// Manufacturer serial number
    pub serial_number: String,
    /// Stable hardware identifier (board/vendor id)
    pub hardware_id: String,
    /// Operating system build identifier
    pub os_build: String,
    /// SIM/modem identifiers; may legitimately shrink when a SIM is removed
    pub sim_identifiers: Vec<String>,
    /// Installed memory as reported by the platform (e.g. "16 GB")
    pub installed_memory: String,
    /// Security posture: device is rooted
    pub rooted: bool,
    /// Security posture: USB debugging enabled
    pub usb_debugging: bool,
    /// Security posture: developer mode enabled
    pub developer_mode: bool,
    /// Security posture: bootloader unlocked
    pub bootloader_unlocked: bool,
    /// Security posture: a non-factory OS image is installed
    pub custom_rom: bool,
}

impl DeviceIdentifiers {
    /// Canonical rendering the fingerprint digest is computed over
    ///
    /// Field order is fixed, strings are lowercased and trimmed, and the
    /// SIM list is sorted so reordering reported identifiers cannot change
    /// the digest.
    pub fn canonical_string(&self) -> String {
        let mut sims: Vec<String> = self
            .sim_identifiers
            .iter()
            .map(|s| s.trim().to_lowercase())
            .collect();
        sims.sort();

        format!(
            "serial={}|hw={}|os={}|sims={}|mem={}|rooted={}|usb={}|dev={}|boot={}|rom={}",
            self.serial_number.trim().to_lowercase(),
            self.hardware_id.trim().to_lowercase(),
            self.os_build.trim().to_lowercase(),
            sims.join(","),
            self.installed_memory.trim().to_lowercase().replace(' ', ""),
            self.rooted,
            self.usb_debugging,
            self.developer_mode,
            self.bootloader_unlocked,
            self.custom_rom,
        )
    }
}

/// A captured fingerprint: the digest plus its collection time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// SHA-256 digest of the canonical identifier rendering
    hash: FingerprintHash,
    /// When the identifiers were collected
    collected_at: DateTime<Utc>,
}

impl DeviceFingerprint {
    /// Creates a fingerprint stamped with the current time
    pub fn new(hash: FingerprintHash) -> Self {
        Self {
            hash,
            collected_at: Utc::now(),
        }
    }

    /// Reconstructs a fingerprint from storage
    pub fn from_parts(hash: FingerprintHash, collected_at: DateTime<Utc>) -> Self {
        Self { hash, collected_at }
    }

    /// Returns the digest
    pub fn hash(&self) -> &FingerprintHash {
        &self.hash
    }

    /// Returns when the identifiers were collected
    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    /// Returns true if both fingerprints carry the same digest
    pub fn matches(&self, other: &DeviceFingerprint) -> bool {
        self.hash == other.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifiers() -> DeviceIdentifiers {
        DeviceIdentifiers {
            serial_number: "SN-12345".to_string(),
            hardware_id: "HW-A1".to_string(),
            os_build: "build-7".to_string(),
            sim_identifiers: vec!["356938035643809".to_string(), "490154203237518".to_string()],
            installed_memory: "16 GB".to_string(),
            rooted: false,
            usb_debugging: false,
            developer_mode: false,
            bootloader_unlocked: false,
            custom_rom: false,
        }
    }

    #[test]
    fn test_canonical_string_is_stable() {
        let a = identifiers();
        let b = identifiers();
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn test_canonical_string_normalizes_case_and_whitespace() {
        let mut shouty = identifiers();
        shouty.serial_number = "  sn-12345 ".to_string();
        shouty.installed_memory = "16GB".to_string();
        assert_eq!(shouty.canonical_string(), identifiers().canonical_string());
    }

    #[test]
    fn test_canonical_string_sorts_sims() {
        let mut reordered = identifiers();
        reordered.sim_identifiers.reverse();
        assert_eq!(
            reordered.canonical_string(),
            identifiers().canonical_string()
        );
    }

    #[test]
    fn test_canonical_string_changes_with_posture() {
        let mut rooted = identifiers();
        rooted.rooted = true;
        assert_ne!(rooted.canonical_string(), identifiers().canonical_string());
    }

    #[test]
    fn test_fingerprint_matches() {
        let hash = FingerprintHash::new(
            "a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3",
        )
        .unwrap();
        let a = DeviceFingerprint::new(hash.clone());
        let b = DeviceFingerprint::new(hash);
        assert!(a.matches(&b));
    }
}
