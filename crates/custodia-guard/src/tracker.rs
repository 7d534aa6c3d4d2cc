//! Unlock attempt tracker
//!
//! The [`AttemptTracker`] persists every unlock evaluation and answers the
//! Synchronizer's lockout queries. Failures are counted inside a trailing
//! window, starting after the most recent successful attempt for the same
//! lock episode - which is how a successful unlock clears the window.
//!
//! ## Failure handling
//!
//! Storage errors must never block the lock/unlock critical path. When the
//! attempt store is unreadable the tracker *fails open*: it reports "not
//! locked out" and audits the degradation. Availability over strictness is
//! the configured policy here, not an accident.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use custodia_audit::AuditLog;
use custodia_core::config::LockoutConfig;
use custodia_core::domain::{
    attempt::{LockoutStatus, LockoutWindow, UnlockAttempt},
    newtypes::{DeviceId, LockId},
};
use custodia_core::ports::{IStateRepository, ITransport, SuspiciousActivityAlert};

/// Lockout policy parameters, normally taken from [`LockoutConfig`]
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// Trailing window failures are counted within
    pub window: Duration,
    /// Failures within the window that open a lockout
    pub max_failures: u32,
    /// Lockout duration once opened
    pub duration: Duration,
    /// Retention period for attempt records
    pub retention: Duration,
}

impl LockoutPolicy {
    /// Builds the policy from configuration
    pub fn from_config(config: &LockoutConfig) -> Self {
        Self {
            window: Duration::minutes(config.window_minutes),
            max_failures: config.max_failures,
            duration: Duration::minutes(config.duration_minutes),
            retention: Duration::days(config.retention_days),
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from_config(&LockoutConfig::default())
    }
}

/// Records unlock attempts and enforces the failure-based lockout
///
/// ## Dependencies
///
/// - `state_repo`: attempt persistence and window queries
/// - `transport`: best-effort suspicious-activity reporting
/// - `audit`: attempt and degradation entries
pub struct AttemptTracker {
    state_repo: Arc<dyn IStateRepository>,
    transport: Arc<dyn ITransport>,
    audit: Arc<AuditLog>,
    device_id: DeviceId,
    policy: LockoutPolicy,
}

impl AttemptTracker {
    /// Creates a new tracker
    pub fn new(
        state_repo: Arc<dyn IStateRepository>,
        transport: Arc<dyn ITransport>,
        audit: Arc<AuditLog>,
        device_id: DeviceId,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            state_repo,
            transport,
            audit,
            device_id,
            policy,
        }
    }

    /// Returns the active policy
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Persists an attempt and recomputes the lockout state it contributes to
    ///
    /// The attempt record happens-before the lockout recomputation. When the
    /// recorded failure is the one that breaches the threshold, a
    /// suspicious-activity report goes out best-effort.
    pub async fn record_attempt(&self, attempt: &UnlockAttempt) {
        if let Err(e) = self.state_repo.save_attempt(attempt).await {
            // Fail open: the attempt is lost, the critical path continues.
            warn!(error = %e, "Failed to persist unlock attempt");
            self.audit.tracker_degraded(&e.to_string()).await;
            return;
        }
        self.audit.attempt_recorded(attempt).await;

        if attempt.success() {
            return;
        }

        let now = Utc::now();
        let failures = match self.failures_in_window(&attempt.lock_id(), now).await {
            Ok(failures) => failures,
            Err(e) => {
                warn!(error = %e, "Failed to recompute lockout window");
                self.audit.tracker_degraded(&e.to_string()).await;
                return;
            }
        };

        debug!(
            lock_id = %attempt.lock_id(),
            failures = failures.len(),
            threshold = self.policy.max_failures,
            "Recomputed failure window"
        );

        // Report exactly at the crossing so a continuing attack does not
        // flood the authority with one alert per failure.
        if failures.len() == self.policy.max_failures as usize {
            info!(
                lock_id = %attempt.lock_id(),
                failures = failures.len(),
                "Lockout window opened"
            );
            self.audit
                .lockout_opened(attempt.lock_id(), failures.len() as u32)
                .await;

            let alert = SuspiciousActivityAlert {
                device_id: self.device_id.clone(),
                reason: format!(
                    "{} failed unlock attempts within {} minutes",
                    failures.len(),
                    self.policy.window.num_minutes()
                ),
            };
            if let Err(e) = self.transport.send_suspicious_activity(&alert).await {
                // Best-effort: delivery failure is logged and dropped.
                warn!(error = %e, "Failed to report suspicious activity");
            }
        }
    }

    /// Answers whether unlock processing for `lock_id` is suspended
    ///
    /// Consulted by the Synchronizer before honoring *any* unlock, including
    /// remote-authority ones. Fails open on storage errors.
    pub async fn check_lockout(&self, lock_id: &LockId) -> LockoutStatus {
        let now = Utc::now();
        let failures = match self.failures_in_window(lock_id, now).await {
            Ok(failures) => failures,
            Err(e) => {
                warn!(error = %e, "Lockout check degraded, failing open");
                self.audit.tracker_degraded(&e.to_string()).await;
                return LockoutStatus::clear(0, self.policy.max_failures);
            }
        };

        match self.derive_window(&failures) {
            Some(window) if window.is_active_at(now) => {
                LockoutStatus::from_window(&window, now, self.policy.max_failures)
            }
            _ => LockoutStatus::clear(failures.len() as u32, self.policy.max_failures),
        }
    }

    /// Deletes attempts older than the retention period
    ///
    /// Run periodically by the daemon's housekeeping task.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - self.policy.retention;
        let removed = self.state_repo.purge_attempts_before(cutoff).await?;
        if removed > 0 {
            info!(removed, "Purged expired unlock attempts");
        }
        Ok(removed)
    }

    /// Failed attempts inside the trailing window, after the last success
    async fn failures_in_window(
        &self,
        lock_id: &LockId,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<UnlockAttempt>> {
        let since = now - self.policy.window;
        let attempts = self
            .state_repo
            .attempts_for_lock_since(lock_id, since)
            .await?;

        // A success resets the count: only failures after it matter.
        let mut failures = Vec::new();
        for attempt in attempts {
            if attempt.success() {
                failures.clear();
            } else {
                failures.push(attempt);
            }
        }
        Ok(failures)
    }

    /// Derives the lockout window from a failure run, if the threshold is met
    ///
    /// The window opens at the breaching attempt (the one that made the
    /// count reach the threshold); later failures do not extend it.
    fn derive_window(&self, failures: &[UnlockAttempt]) -> Option<LockoutWindow> {
        let threshold = self.policy.max_failures as usize;
        if threshold == 0 || failures.len() < threshold {
            return None;
        }
        let breach = &failures[threshold - 1];
        Some(LockoutWindow::new(
            breach.timestamp(),
            self.policy.duration,
            failures.len() as u32,
        ))
    }
}
