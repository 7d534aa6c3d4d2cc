//! Platform adapters for the daemon
//!
//! These are the Linux-host implementations of the core's platform ports:
//!
//! - [`HookDeviceControl`] - runs the configured privileged command; an
//!   unconfigured or unrunnable hook is a privilege failure
//! - [`FileLockScreen`] - publishes the lock reason to a runtime file the
//!   external overlay renderer watches
//! - [`HostIdentitySource`] - collects stable identifiers from DMI and
//!   procfs, best-effort

use std::path::PathBuf;

use tracing::{debug, warn};

use custodia_core::domain::fingerprint::DeviceIdentifiers;
use custodia_core::ports::{ControlError, IDeviceControl, IIdentitySource, ILockScreen};

// ============================================================================
// Device control
// ============================================================================

/// Device control via a configured privileged command
///
/// The command is the deployment's bridge to whatever physically blocks
/// interaction (session lock, kiosk switch). No configured command means
/// the capability was never granted; a failing spawn means it was revoked.
/// Both are terminal for the calling lock operation.
pub struct HookDeviceControl {
    lock_command: Option<String>,
}

impl HookDeviceControl {
    /// Creates the adapter from the configured hook
    pub fn new(lock_command: Option<String>) -> Self {
        Self { lock_command }
    }
}

#[async_trait::async_trait]
impl IDeviceControl for HookDeviceControl {
    async fn lock_now(&self) -> Result<(), ControlError> {
        let command = self.lock_command.as_deref().ok_or_else(|| {
            ControlError::PrivilegeLost("no device control command configured".to_string())
        })?;

        debug!(command, "Invoking device control hook");
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
            .map_err(|e| ControlError::PrivilegeLost(format!("hook unavailable: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(ControlError::Failed(format!(
                "device control hook exited with {status}"
            )))
        }
    }

    async fn is_control_available(&self) -> bool {
        self.lock_command.is_some()
    }
}

// ============================================================================
// Lock screen
// ============================================================================

/// Lock-screen signalling via a runtime state file
///
/// The overlay renderer is a separate process; it watches this file and
/// shows a blocking screen with the categorized reason while it exists.
pub struct FileLockScreen {
    state_path: PathBuf,
}

impl FileLockScreen {
    /// Creates the adapter writing to the given state file
    pub fn new(state_path: PathBuf) -> Self {
        Self { state_path }
    }
}

#[async_trait::async_trait]
impl ILockScreen for FileLockScreen {
    async fn show(&self, reason: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.state_path, reason).await?;
        debug!(path = %self.state_path.display(), "Lock screen state published");
        Ok(())
    }

    async fn dismiss(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.state_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Identity source
// ============================================================================

/// Identifier collection from DMI and procfs
///
/// Values that cannot be read collapse to "unknown" rather than failing the
/// check; a machine that consistently reports "unknown" still fingerprints
/// consistently.
pub struct HostIdentitySource;

impl HostIdentitySource {
    async fn read_trimmed(path: &str) -> String {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    "unknown".to_string()
                } else {
                    trimmed.to_string()
                }
            }
            Err(e) => {
                warn!(path, error = %e, "Identifier source unreadable");
                "unknown".to_string()
            }
        }
    }

    /// Total memory rendered like "16 GB", from /proc/meminfo
    async fn installed_memory() -> String {
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .unwrap_or_default();
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                let kb: f64 = rest
                    .trim()
                    .trim_end_matches("kB")
                    .trim()
                    .parse()
                    .unwrap_or(0.0);
                let gb = kb / (1024.0 * 1024.0);
                return format!("{gb:.2} GB");
            }
        }
        "unknown".to_string()
    }
}

#[async_trait::async_trait]
impl IIdentitySource for HostIdentitySource {
    async fn collect(&self) -> anyhow::Result<DeviceIdentifiers> {
        Ok(DeviceIdentifiers {
            serial_number: Self::read_trimmed("/sys/class/dmi/id/product_serial").await,
            hardware_id: Self::read_trimmed("/sys/class/dmi/id/product_uuid").await,
            os_build: Self::read_trimmed("/proc/sys/kernel/osrelease").await,
            // No modem on a desktop/laptop host; the comparison skips
            // empty lists
            sim_identifiers: vec![],
            installed_memory: Self::installed_memory().await,
            rooted: false,
            usb_debugging: false,
            developer_mode: false,
            bootloader_unlocked: false,
            custom_rom: false,
        })
    }
}
