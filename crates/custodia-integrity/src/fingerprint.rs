//! Fingerprint computation
//!
//! SHA-256 over the canonical identifier rendering defined by
//! [`DeviceIdentifiers::canonical_string`]. The canonical form already
//! normalizes case, whitespace, and SIM ordering, so the digest is stable
//! across cosmetic reporting differences.

use sha2::{Digest, Sha256};

use custodia_core::domain::{
    errors::DomainError,
    fingerprint::{DeviceFingerprint, DeviceIdentifiers},
    newtypes::FingerprintHash,
};

/// Computes the fingerprint for the given identifier set
pub fn compute_fingerprint(
    identifiers: &DeviceIdentifiers,
) -> Result<DeviceFingerprint, DomainError> {
    let digest = Sha256::digest(identifiers.canonical_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(DeviceFingerprint::new(FingerprintHash::new(hex)?))
}
