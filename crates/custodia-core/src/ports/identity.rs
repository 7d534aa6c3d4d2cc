//! Identity source port (raw identifier collection)
//!
//! Collecting serial numbers, SIM identifiers, and security posture flags
//! requires platform APIs that live outside the core. The integrity
//! monitor only ever sees the collected [`DeviceIdentifiers`].

use crate::domain::fingerprint::DeviceIdentifiers;

/// Port trait for collecting the stable device identifiers
#[async_trait::async_trait]
pub trait IIdentitySource: Send + Sync {
    /// Collects the current identifier set from the platform
    async fn collect(&self) -> anyhow::Result<DeviceIdentifiers>;
}
