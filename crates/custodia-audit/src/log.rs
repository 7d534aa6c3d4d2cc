//! AuditLog - high-level audit logging service
//!
//! Wraps `IStateRepository::append_audit()` with convenience methods for
//! each type of auditable event. All methods are non-fatal: errors in audit
//! persistence are logged via `tracing::warn!` but never propagated, so the
//! functional paths (lock, unlock, reconcile) can never be blocked by a
//! failing audit write.
//!
//! Retention is a ring buffer per category: after each append the category
//! is pruned down to the configured cap, so a noisy component cannot evict
//! another component's history.

use std::sync::Arc;

use serde_json::json;

use custodia_core::domain::{
    attempt::{LockoutStatus, UnlockAttempt},
    audit::{AuditCategory, AuditEntry, AuditLevel},
    command::CommandSource,
    mismatch::{MismatchRecord, MismatchSeverity},
    newtypes::LockId,
};
use custodia_core::ports::IStateRepository;

/// High-level audit log that wraps the state repository's audit persistence.
///
/// All methods silently swallow errors (logging a warning) to ensure
/// audit failures never break enforcement operations.
pub struct AuditLog {
    state_repo: Arc<dyn IStateRepository>,
    /// Ring-buffer cap applied per category after each append
    cap_per_category: u32,
}

impl AuditLog {
    /// Creates a new `AuditLog` backed by the given state repository.
    pub fn new(state_repo: Arc<dyn IStateRepository>, cap_per_category: u32) -> Self {
        Self {
            state_repo,
            cap_per_category,
        }
    }

    /// Persist an audit entry, swallowing errors with a tracing warning.
    pub async fn append(&self, entry: AuditEntry) {
        if let Err(e) = self.state_repo.append_audit(&entry).await {
            tracing::warn!(error = %e, category = %entry.category(), "Failed to append audit entry");
            return;
        }
        if let Err(e) = self
            .state_repo
            .prune_audit(entry.category(), self.cap_per_category)
            .await
        {
            tracing::warn!(error = %e, category = %entry.category(), "Failed to prune audit category");
        }
    }

    /// Flattens all categories for remote submission, oldest first per category.
    pub async fn export(&self) -> Vec<AuditEntry> {
        let mut entries = Vec::new();
        for category in AuditCategory::ALL {
            match self
                .state_repo
                .audit_entries(Some(category), self.cap_per_category)
                .await
            {
                Ok(mut batch) => entries.append(&mut batch),
                Err(e) => {
                    tracing::warn!(error = %e, category = %category, "Failed to export audit category");
                }
            }
        }
        entries
    }

    // ========================================================================
    // Lock / unlock lifecycle
    // ========================================================================

    /// Log a completed lock transition.
    pub async fn lock_applied(&self, lock_id: LockId, reason: &str, source: CommandSource) {
        let entry = AuditEntry::info(AuditCategory::Lock, "Device locked").with_context(json!({
            "lock_id": lock_id.to_string(),
            "reason": reason,
            "source": source.to_string(),
        }));
        self.append(entry).await;
    }

    /// Log an idempotent lock replay (already locked, no new episode).
    pub async fn lock_noop(&self, lock_id: LockId, reason: &str) {
        let entry = AuditEntry::info(AuditCategory::Lock, "Lock replayed, already locked")
            .with_context(json!({
                "lock_id": lock_id.to_string(),
                "reason": reason,
            }));
        self.append(entry).await;
    }

    /// Log a terminal lock failure (device-control privilege lost).
    pub async fn lock_failed(&self, reason: &str, error: &str) {
        let entry = AuditEntry::critical(AuditCategory::Lock, "Lock failed").with_context(json!({
            "reason": reason,
            "error": error,
        }));
        self.append(entry).await;
    }

    /// Log a completed unlock transition.
    pub async fn unlock_applied(&self, lock_id: LockId, reason: &str) {
        let entry = AuditEntry::info(AuditCategory::Unlock, "Device unlocked").with_context(
            json!({
                "lock_id": lock_id.to_string(),
                "reason": reason,
            }),
        );
        self.append(entry).await;
    }

    /// Log an unlock refused because a lockout window is active.
    pub async fn unlock_refused_lockout(&self, lock_id: LockId, status: &LockoutStatus) {
        let entry = AuditEntry::warning(AuditCategory::Unlock, "Unlock refused during lockout")
            .with_context(json!({
                "lock_id": lock_id.to_string(),
                "failed_attempts": status.failed_attempts,
                "max_attempts": status.max_attempts,
                "remaining_secs": status.remaining.num_seconds(),
            }));
        self.append(entry).await;
    }

    /// Log an unlock rejected because the initiator was not the remote authority.
    pub async fn unlock_rejected_source(&self, source: CommandSource) {
        let entry = AuditEntry::warning(AuditCategory::Unlock, "Unlock rejected, invalid source")
            .with_context(json!({
                "source": source.to_string(),
            }));
        self.append(entry).await;
    }

    // ========================================================================
    // Attempts and tracker degradation
    // ========================================================================

    /// Log a recorded unlock attempt.
    pub async fn attempt_recorded(&self, attempt: &UnlockAttempt) {
        let entry = AuditEntry::info(AuditCategory::Attempt, "Unlock attempt recorded")
            .with_context(json!({
                "attempt_id": attempt.id().to_string(),
                "lock_id": attempt.lock_id().to_string(),
                "attempt_type": attempt.attempt_type().to_string(),
                "success": attempt.success(),
            }));
        self.append(entry).await;
    }

    /// Log that a lockout window opened after repeated failures.
    pub async fn lockout_opened(&self, lock_id: LockId, failures: u32) {
        let entry = AuditEntry::warning(AuditCategory::Attempt, "Lockout window opened")
            .with_context(json!({
                "lock_id": lock_id.to_string(),
                "failures": failures,
            }));
        self.append(entry).await;
    }

    /// Log that the attempt tracker degraded to fail-open on a storage error.
    pub async fn tracker_degraded(&self, error: &str) {
        let entry = AuditEntry::warning(
            AuditCategory::Attempt,
            "Attempt tracker degraded, failing open",
        )
        .with_context(json!({
            "error": error,
        }));
        self.append(entry).await;
    }

    // ========================================================================
    // Integrity verification
    // ========================================================================

    /// Log a passed integrity check.
    pub async fn integrity_verified(&self) {
        self.append(AuditEntry::info(
            AuditCategory::Mismatch,
            "Device integrity verified",
        ))
        .await;
    }

    /// Log a classified mismatch.
    pub async fn mismatch_classified(&self, record: &MismatchRecord) {
        let level = if record.severity() >= MismatchSeverity::High {
            AuditLevel::Critical
        } else {
            AuditLevel::Warning
        };
        let entry = AuditEntry::new(
            AuditCategory::Mismatch,
            level,
            "Integrity mismatch classified",
        )
        .with_context(json!({
            "kind": record.kind().to_string(),
            "severity": record.severity().to_string(),
            "field": record.field().to_string(),
        }));
        self.append(entry).await;
    }

    /// Log the first-run baseline capture.
    pub async fn baseline_established(&self, hash: &str) {
        let entry = AuditEntry::info(AuditCategory::Mismatch, "Fingerprint baseline established")
            .with_context(json!({
                "hash": hash,
            }));
        self.append(entry).await;
    }

    /// Log a remote-approved re-baseline.
    pub async fn baseline_replaced(&self, hash: &str, approval: &str) {
        let entry = AuditEntry::warning(AuditCategory::Mismatch, "Fingerprint baseline replaced")
            .with_context(json!({
                "hash": hash,
                "approval": approval,
            }));
        self.append(entry).await;
    }

    // ========================================================================
    // Sync lifecycle
    // ========================================================================

    /// Log a completed heartbeat cycle.
    pub async fn sync_cycle(&self, reconciled: bool, remote_locked: bool) {
        let entry = AuditEntry::info(AuditCategory::Sync, "Heartbeat cycle completed")
            .with_context(json!({
                "reconciled": reconciled,
                "remote_locked": remote_locked,
            }));
        self.append(entry).await;
    }

    /// Log an offline heartbeat cycle.
    pub async fn sync_offline(&self, error: &str) {
        let entry =
            AuditEntry::warning(AuditCategory::Sync, "Heartbeat cycle offline").with_context(
                json!({
                    "error": error,
                }),
            );
        self.append(entry).await;
    }

    /// Log a queued command (connectivity unavailable).
    pub async fn command_queued(&self, action: &str, reason: &str, sequence: u64) {
        let entry = AuditEntry::info(AuditCategory::Sync, "Command queued offline").with_context(
            json!({
                "action": action,
                "reason": reason,
                "sequence": sequence,
            }),
        );
        self.append(entry).await;
    }

    /// Log a queue replay pass.
    pub async fn queue_replayed(&self, applied: usize, halted: bool) {
        let entry = AuditEntry::info(AuditCategory::Sync, "Offline queue replayed").with_context(
            json!({
                "applied": applied,
                "halted": halted,
            }),
        );
        self.append(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use custodia_core::domain::{
        attempt::AttemptType,
        audit::AuditLevel,
        newtypes::DeviceId,
    };
    use custodia_store::{DatabasePool, SqliteStateRepository};

    async fn setup() -> (Arc<SqliteStateRepository>, AuditLog) {
        let pool = DatabasePool::in_memory().await.unwrap();
        let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        let log = AuditLog::new(repo.clone(), 5);
        (repo, log)
    }

    #[tokio::test]
    async fn test_lock_applied_recorded() {
        let (repo, log) = setup().await;
        let lock_id = LockId::new();

        log.lock_applied(lock_id, "Payment overdue", CommandSource::RemoteAuthority)
            .await;

        let entries = repo
            .audit_entries(Some(AuditCategory::Lock), 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message(), "Device locked");
        assert_eq!(entries[0].context()["lock_id"], lock_id.to_string());
    }

    #[tokio::test]
    async fn test_unlock_refused_has_warning_level() {
        let (repo, log) = setup().await;
        let status = LockoutStatus::clear(5, 5);

        log.unlock_refused_lockout(LockId::new(), &status).await;

        let entries = repo
            .audit_entries(Some(AuditCategory::Unlock), 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level(), AuditLevel::Warning);
    }

    #[tokio::test]
    async fn test_ring_buffer_cap_enforced() {
        let (repo, log) = setup().await;

        // Cap is 5; append 8 sync entries
        for i in 0..8 {
            log.sync_cycle(i % 2 == 0, false).await;
        }

        let entries = repo
            .audit_entries(Some(AuditCategory::Sync), 100)
            .await
            .unwrap();
        assert_eq!(entries.len(), 5);
    }

    #[tokio::test]
    async fn test_cap_does_not_cross_categories() {
        let (repo, log) = setup().await;

        for _ in 0..5 {
            log.sync_cycle(false, false).await;
        }
        log.lock_applied(LockId::new(), "x", CommandSource::RemoteAuthority)
            .await;

        let lock_entries = repo
            .audit_entries(Some(AuditCategory::Lock), 100)
            .await
            .unwrap();
        assert_eq!(lock_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_export_flattens_all_categories() {
        let (_repo, log) = setup().await;

        log.lock_applied(LockId::new(), "x", CommandSource::RemoteAuthority)
            .await;
        log.sync_cycle(true, true).await;
        let attempt = UnlockAttempt::new(
            LockId::new(),
            DeviceId::new("DEV-001").unwrap(),
            AttemptType::Reconcile,
            false,
            "r",
        );
        log.attempt_recorded(&attempt).await;

        let exported = log.export().await;
        assert_eq!(exported.len(), 3);
        // Export order follows category declaration order
        assert_eq!(exported[0].category(), AuditCategory::Lock);
    }

    #[tokio::test]
    async fn test_audit_failure_is_non_fatal() {
        // A repository over a poisoned pool: closing the pool makes every
        // query fail, which append() must swallow.
        let pool = DatabasePool::in_memory().await.unwrap();
        let sqlite_pool = pool.pool().clone();
        let repo = Arc::new(SqliteStateRepository::new(sqlite_pool.clone()));
        let log = AuditLog::new(repo, 5);

        sqlite_pool.close().await;

        // This should NOT panic or return an error
        log.lock_applied(LockId::new(), "x", CommandSource::RemoteAuthority)
            .await;
        log.sync_offline("network unreachable").await;
    }
}
