//! Lock screen port (blocking overlay signalling)
//!
//! Rendering the overlay is an external concern; this port only signals
//! show/dismiss with a categorized reason string. No internal error detail
//! ever reaches the device holder - only the reason passed here.

/// Port trait for the blocking lock-screen overlay
#[async_trait::async_trait]
pub trait ILockScreen: Send + Sync {
    /// Shows the blocking overlay with a categorized reason
    async fn show(&self, reason: &str) -> anyhow::Result<()>;

    /// Dismisses the overlay
    async fn dismiss(&self) -> anyhow::Result<()>;
}
