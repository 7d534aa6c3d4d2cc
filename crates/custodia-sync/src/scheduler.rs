//! Heartbeat scheduler - the periodic task driving remote reconciliation
//!
//! The [`HeartbeatScheduler`] runs one cycle per interval (default 60 s):
//! build the request, perform the time-bounded network exchange, then
//! reconcile against the authority's declared intent. It is the **sole
//! channel** for remote-initiated transitions.
//!
//! ## Flow
//!
//! ```text
//! interval tick ──→ collect snapshot ──→ send_heartbeat (timeout-bounded)
//!                                              │
//!                          offline ◄── error ──┴── success ──► reconcile()
//!                             │                                    │
//!                       (queue keeps                    offline→online edge:
//!                        accumulating)                  queue.apply_all()
//! ```
//!
//! A timed-out or failed cycle is treated as offline: no reconciliation
//! happens and queued commands stay parked. The first successful cycle
//! after an offline stretch is the connectivity-restored signal that
//! triggers queue replay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use custodia_audit::AuditLog;
use custodia_core::domain::newtypes::DeviceId;
use custodia_core::ports::{HeartbeatRequest, IIdentitySource, ITransport};

use crate::queue::OfflineCommandQueue;
use crate::synchronizer::{LockSynchronizer, ReconcileOutcome};

/// Periodic heartbeat task
///
/// ## Dependencies
///
/// - `synchronizer`: reconciliation target
/// - `queue`: replayed on the offline→online edge
/// - `transport`: the heartbeat exchange itself
/// - `identity`: device snapshot carried in every request
pub struct HeartbeatScheduler {
    synchronizer: Arc<LockSynchronizer>,
    queue: Arc<OfflineCommandQueue>,
    transport: Arc<dyn ITransport>,
    identity: Arc<dyn IIdentitySource>,
    audit: Arc<AuditLog>,
    device_id: DeviceId,
    /// Seconds between cycles
    interval: Duration,
    /// Bound on the in-flight network call
    timeout: Duration,
    /// Connectivity state; starts offline so the first successful cycle
    /// replays anything queued before the last shutdown
    online: AtomicBool,
}

impl HeartbeatScheduler {
    /// Creates a new scheduler
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        synchronizer: Arc<LockSynchronizer>,
        queue: Arc<OfflineCommandQueue>,
        transport: Arc<dyn ITransport>,
        identity: Arc<dyn IIdentitySource>,
        audit: Arc<AuditLog>,
        device_id: DeviceId,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = timeout.as_secs(),
            "Creating heartbeat scheduler"
        );
        Self {
            synchronizer,
            queue,
            transport,
            identity,
            audit,
            device_id,
            interval,
            timeout,
            online: AtomicBool::new(false),
        }
    }

    /// Returns whether the last cycle reached the authority
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Main loop: one cycle per interval until cancelled
    ///
    /// Cycle errors are absorbed here - a failed heartbeat must never kill
    /// the loop, it just leaves the device offline until the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Heartbeat scheduler starting");

        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Heartbeat scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.cycle().await;
                }
            }
        }

        info!("Heartbeat scheduler stopped");
    }

    /// Performs one heartbeat cycle
    ///
    /// Public so the daemon can drive a one-shot cycle (boot-time sync)
    /// outside the periodic loop.
    pub async fn cycle(&self) {
        let snapshot = match self.identity.collect().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Identifier collection failed, skipping cycle");
                self.mark_offline(&format!("identifier collection failed: {e}"))
                    .await;
                return;
            }
        };

        let request = HeartbeatRequest {
            device_id: self.device_id.clone(),
            timestamp: Utc::now(),
            snapshot,
            lock_status: self.synchronizer.status_report().await,
        };

        let response =
            match tokio::time::timeout(self.timeout, self.transport.send_heartbeat(&request)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    self.mark_offline(&e.to_string()).await;
                    return;
                }
                Err(_) => {
                    self.mark_offline(&format!(
                        "heartbeat timed out after {} seconds",
                        self.timeout.as_secs()
                    ))
                    .await;
                    return;
                }
            };

        if !response.success {
            // Only the lock_status of a *successful* response may feed
            // reconciliation.
            self.mark_offline("authority reported failure").await;
            return;
        }

        let outcome = match self.synchronizer.reconcile(&response.lock_status).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Terminal enforcement failure (privilege loss); audited by
                // the synchronizer, nothing more to do this cycle.
                warn!(error = %e, "Reconciliation failed");
                return;
            }
        };
        debug!(outcome = ?outcome, "Reconciliation completed");

        let was_offline = !self.online.swap(true, Ordering::AcqRel);
        if was_offline {
            info!("Connectivity restored, replaying offline queue");
            if let Err(e) = self.queue.apply_all(&self.synchronizer).await {
                warn!(error = %e, "Queue replay failed");
            }
        }

        let reconciled = !matches!(outcome, ReconcileOutcome::InSync);
        self.audit
            .sync_cycle(reconciled, response.lock_status.is_locked)
            .await;
    }

    /// Marks the cycle offline and audits the cause
    async fn mark_offline(&self, error: &str) {
        let was_online = self.online.swap(false, Ordering::AcqRel);
        if was_online {
            info!(error, "Connectivity lost");
        } else {
            debug!(error, "Still offline");
        }
        self.audit.sync_offline(error).await;
    }
}
