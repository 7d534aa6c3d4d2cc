//! Configuration module for Custodia.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, and defaults matching the enforcement policy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Custodia agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub authority: AuthorityConfig,
    pub heartbeat: HeartbeatConfig,
    pub lockout: LockoutConfig,
    pub integrity: IntegrityConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

/// Device enrollment settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device identifier assigned at enrollment. `None` until enrolled.
    pub id: Option<String>,
}

/// Remote authority endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Base URL of the remote authority API.
    pub base_url: String,
}

/// Heartbeat scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeat cycles.
    pub interval_secs: u64,
    /// Seconds before an in-flight heartbeat is treated as offline.
    /// Sensible values are 10-30.
    pub timeout_secs: u64,
}

/// Unlock lockout policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Trailing window (minutes) failures are counted within.
    pub window_minutes: i64,
    /// Failures within the window that open a lockout.
    pub max_failures: u32,
    /// Lockout duration (minutes) once opened.
    pub duration_minutes: i64,
    /// Days unlock attempts are retained before being purged.
    pub retention_days: i64,
}

/// Integrity verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Minutes between periodic integrity checks.
    pub check_interval_minutes: u64,
    /// Maximum mismatch records retained.
    pub mismatch_history_cap: u32,
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum audit entries retained per category.
    pub cap_per_category: u32,
}

/// Persistent storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

/// Device-control capability settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Privileged command invoked to physically block interaction.
    /// `None` means the capability is unavailable and lock operations fail.
    pub lock_command: Option<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/custodia/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("custodia")
            .join("config.yaml")
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: "https://authority.example.com/api/v1".to_string(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_secs: 15,
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            max_failures: 5,
            duration_minutes: 15,
            retention_days: 30,
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: 60,
            mismatch_history_cap: 100,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            cap_per_category: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("custodia")
                .join("custodia.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
