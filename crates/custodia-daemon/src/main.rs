//! Custodia Daemon - Background device custody agent
//!
//! This binary runs as a system service and handles:
//! - Periodic heartbeats to the remote authority and reconciliation
//! - Boot-time and periodic device integrity verification
//! - Offline command queue replay on reconnect
//! - Attempt-retention housekeeping
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires the platform adapters into the enforcement core, then
//! runs three background tasks (heartbeat, integrity, housekeeping) under a
//! single `CancellationToken` that is triggered on receipt of SIGTERM or
//! SIGINT. One-shot subcommands (`status`, `check-integrity`,
//! `export-audit`, `rebaseline`) build the same service and exit after one
//! operation.

mod adapters;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use custodia_audit::AuditLog;
use custodia_core::{config::Config, domain::newtypes::DeviceId, ports::IDeviceControl};
use custodia_guard::{AttemptTracker, LockoutPolicy};
use custodia_integrity::IntegrityMonitor;
use custodia_store::{DatabasePool, SqliteStateRepository};
use custodia_sync::{HeartbeatScheduler, LockSynchronizer, OfflineCommandQueue};
use custodia_transport::HttpTransport;

use adapters::{FileLockScreen, HookDeviceControl, HostIdentitySource};

/// Interval between housekeeping passes (attempt retention purge)
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Parser)]
#[command(name = "custodiad", version, about = "Custodia device custody agent")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent (default)
    Run,
    /// Print the current enforcement status as JSON
    Status,
    /// Run a one-shot integrity verification
    CheckIntegrity,
    /// Export the audit log as JSON
    ExportAudit,
    /// Replace the fingerprint baseline (requires an authority approval reference)
    Rebaseline {
        /// Approval reference issued by the remote authority
        approval: String,
    },
}

// ============================================================================
// AgentService
// ============================================================================

/// Fully wired enforcement core plus its background tasks
struct AgentService {
    config: Config,
    tracker: Arc<AttemptTracker>,
    queue: Arc<OfflineCommandQueue>,
    synchronizer: Arc<LockSynchronizer>,
    monitor: Arc<IntegrityMonitor>,
    scheduler: Arc<HeartbeatScheduler>,
    audit: Arc<AuditLog>,
    shutdown: CancellationToken,
}

impl AgentService {
    /// Builds the service: open storage, construct adapters, wire the core
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let device_id = DeviceId::new(
            config
                .device
                .id
                .clone()
                .context("device.id missing from configuration; enroll the device first")?,
        )?;

        let db_pool = DatabasePool::new(&config.storage.db_path)
            .await
            .context("Failed to open database")?;
        let repo = Arc::new(SqliteStateRepository::new(db_pool.pool().clone()));

        let transport = Arc::new(
            HttpTransport::new(
                config.authority.base_url.clone(),
                config.heartbeat.timeout_secs,
            )
            .context("Failed to build transport")?,
        );
        let device_control = Arc::new(HookDeviceControl::new(config.control.lock_command.clone()));
        let lock_screen = Arc::new(FileLockScreen::new(
            config
                .storage
                .db_path
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .join("lockscreen"),
        ));
        let identity = Arc::new(HostIdentitySource);

        if !device_control.is_control_available().await {
            warn!("Device control hook not configured; lock operations will fail");
        }

        let audit = Arc::new(AuditLog::new(repo.clone(), config.audit.cap_per_category));
        let tracker = Arc::new(AttemptTracker::new(
            repo.clone(),
            transport.clone(),
            audit.clone(),
            device_id.clone(),
            LockoutPolicy::from_config(&config.lockout),
        ));
        let queue = Arc::new(OfflineCommandQueue::new(repo.clone(), audit.clone()));

        let synchronizer = Arc::new(
            LockSynchronizer::load(
                repo.clone(),
                device_control,
                lock_screen,
                tracker.clone(),
                transport.clone(),
                queue.clone(),
                audit.clone(),
                device_id.clone(),
            )
            .await
            .context("Failed to load lock state")?,
        );

        let monitor = Arc::new(IntegrityMonitor::new(
            identity.clone(),
            repo.clone(),
            synchronizer.clone(),
            transport.clone(),
            audit.clone(),
            device_id.clone(),
            config.integrity.mismatch_history_cap,
        ));

        let scheduler = Arc::new(HeartbeatScheduler::new(
            synchronizer.clone(),
            queue.clone(),
            transport,
            identity,
            audit.clone(),
            device_id,
            Duration::from_secs(config.heartbeat.interval_secs),
            Duration::from_secs(config.heartbeat.timeout_secs),
        ));

        Ok(Self {
            config,
            tracker,
            queue,
            synchronizer,
            monitor,
            scheduler,
            audit,
            shutdown,
        })
    }

    /// Runs the agent until the shutdown token fires
    async fn run(&self) -> Result<()> {
        // Boot-time integrity check before the first heartbeat: a swapped
        // device must not get a clean cycle.
        let outcome = self.monitor.verify().await;
        info!(outcome = ?outcome, "Boot-time integrity check completed");

        let heartbeat = {
            let scheduler = Arc::clone(&self.scheduler);
            let token = self.shutdown.clone();
            tokio::spawn(async move { scheduler.run(token).await })
        };

        let integrity = {
            let monitor = Arc::clone(&self.monitor);
            let token = self.shutdown.clone();
            let interval =
                Duration::from_secs(self.config.integrity.check_interval_minutes * 60);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The boot-time check already ran
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let outcome = monitor.verify().await;
                            info!(outcome = ?outcome, "Periodic integrity check completed");
                        }
                    }
                }
            })
        };

        let housekeeping = {
            let tracker = Arc::clone(&self.tracker);
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = tracker.purge_expired().await {
                                warn!(error = %e, "Attempt retention purge failed");
                            }
                        }
                    }
                }
            })
        };

        info!("custodiad running");
        self.shutdown.cancelled().await;
        info!("Shutting down");

        let _ = tokio::join!(heartbeat, integrity, housekeeping);
        Ok(())
    }

    // --- One-shot operations ---

    async fn print_status(&self) -> Result<()> {
        let status = self.synchronizer.status().await?;
        let online = self.scheduler.is_online();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "is_locked": status.is_locked,
                "reason": status.reason,
                "lock_id": status.lock_id.map(|id| id.to_string()),
                "queue_depth": status.queue_depth,
                "wipe_eligible": status.wipe_eligible,
                "online": online,
            }))?
        );
        Ok(())
    }

    async fn check_integrity(&self) -> Result<()> {
        let outcome = self.monitor.verify().await;
        println!("{outcome:?}");
        Ok(())
    }

    async fn export_audit(&self) -> Result<()> {
        let entries = self.audit.export().await;
        println!("{}", serde_json::to_string_pretty(&entries)?);
        Ok(())
    }

    async fn rebaseline(&self, approval: &str) -> Result<()> {
        let identifiers = self.monitor.rebaseline(approval).await?;
        info!(serial = %identifiers.serial_number, "Baseline replaced");
        // Drain anything parked while the device was being serviced
        let replay = self.queue.apply_all(&self.synchronizer).await?;
        if replay.applied > 0 {
            info!(applied = replay.applied, "Replayed queued commands");
        }
        Ok(())
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Installs SIGTERM/SIGINT handlers that cancel the token
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Received interrupt");
        }

        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();
    info!(config_path = %config_path.display(), "Loaded configuration");

    let shutdown = CancellationToken::new();
    let service = AgentService::new(config, shutdown.clone()).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            spawn_signal_handler(shutdown);
            service.run().await
        }
        Command::Status => service.print_status().await,
        Command::CheckIntegrity => service.check_integrity().await,
        Command::ExportAudit => service.export_audit().await,
        Command::Rebaseline { approval } => service.rebaseline(&approval).await,
    }
}
