//! State repository port (driven/secondary port)
//!
//! This module defines the interface for persisting and querying all
//! enforcement state: the canonical lock state, the offline command queue,
//! unlock attempts, the fingerprint baseline, mismatch records, and audit
//! entries.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, filesystem, etc.) and don't need domain-level classification.
//!   Callers that must degrade gracefully (audit, attempt tracker) decide
//!   their own policy on error.
//! - The underlying engine is assumed to provide at-least-once durability;
//!   the enforcement layer adds idempotency on top, so duplicate writes and
//!   replays are always safe.
//! - All write operations take references to domain entities, allowing
//!   the caller to retain ownership.

use chrono::{DateTime, Utc};

use crate::domain::{
    attempt::UnlockAttempt,
    audit::{AuditCategory, AuditEntry},
    command::{ManagementCommand, QueuedCommand},
    fingerprint::{DeviceFingerprint, DeviceIdentifiers},
    lock_state::LockState,
    mismatch::MismatchRecord,
    newtypes::LockId,
};

/// Port trait for persistent enforcement state
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- Lock state ---

    /// Saves the canonical lock state (single row, insert or replace)
    async fn save_lock_state(&self, state: &LockState) -> anyhow::Result<()>;

    /// Loads the canonical lock state
    ///
    /// Returns `None` on first run, before any state has been persisted.
    async fn load_lock_state(&self) -> anyhow::Result<Option<LockState>>;

    // --- Offline command queue ---

    /// Appends a command to the queue, returning its assigned sequence number
    ///
    /// Sequence numbers are strictly monotonic across the queue's lifetime.
    async fn enqueue_command(&self, command: &ManagementCommand) -> anyhow::Result<u64>;

    /// Replaces the command at `sequence` in place (duplicate collapse)
    async fn replace_command(
        &self,
        sequence: u64,
        command: &ManagementCommand,
    ) -> anyhow::Result<()>;

    /// Returns all queued commands in ascending sequence order
    async fn list_commands(&self) -> anyhow::Result<Vec<QueuedCommand>>;

    /// Returns the most recently enqueued command, if any
    async fn last_command(&self) -> anyhow::Result<Option<QueuedCommand>>;

    /// Removes the command at `sequence` (after successful replay)
    async fn remove_command(&self, sequence: u64) -> anyhow::Result<()>;

    /// Removes all queued commands (administrative reset)
    async fn clear_commands(&self) -> anyhow::Result<()>;

    // --- Unlock attempts ---

    /// Persists an unlock attempt record
    async fn save_attempt(&self, attempt: &UnlockAttempt) -> anyhow::Result<()>;

    /// Returns attempts for a lock episode at or after `since`,
    /// ordered oldest first
    async fn attempts_for_lock_since(
        &self,
        lock_id: &LockId,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<UnlockAttempt>>;

    /// Deletes attempts older than `cutoff`, returning the number removed
    async fn purge_attempts_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;

    // --- Fingerprint baseline ---

    /// Stores the baseline (identifiers + fingerprint), replacing any prior one
    ///
    /// Callers enforce the re-baseline policy; the repository just writes.
    async fn save_baseline(
        &self,
        identifiers: &DeviceIdentifiers,
        fingerprint: &DeviceFingerprint,
    ) -> anyhow::Result<()>;

    /// Loads the baseline, `None` before first capture
    async fn load_baseline(
        &self,
    ) -> anyhow::Result<Option<(DeviceIdentifiers, DeviceFingerprint)>>;

    // --- Wipe eligibility flag ---

    /// Marks the device wipe-eligible (the wipe itself is delegated externally)
    async fn mark_wipe_eligible(&self, reason: &str) -> anyhow::Result<()>;

    /// Returns the wipe-eligibility reason, if the device has been marked
    async fn wipe_eligible_reason(&self) -> anyhow::Result<Option<String>>;

    // --- Mismatch records ---

    /// Appends a mismatch record
    async fn save_mismatch(&self, record: &MismatchRecord) -> anyhow::Result<()>;

    /// Returns the most recent mismatch records, newest first
    async fn list_mismatches(&self, limit: u32) -> anyhow::Result<Vec<MismatchRecord>>;

    /// Deletes all but the newest `cap` mismatch records
    async fn prune_mismatches(&self, cap: u32) -> anyhow::Result<()>;

    // --- Audit entries ---

    /// Appends an audit entry
    async fn append_audit(&self, entry: &AuditEntry) -> anyhow::Result<()>;

    /// Returns audit entries, oldest first, optionally filtered by category
    async fn audit_entries(
        &self,
        category: Option<AuditCategory>,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditEntry>>;

    /// Deletes all but the newest `cap` entries in `category`
    async fn prune_audit(&self, category: AuditCategory, cap: u32) -> anyhow::Result<()>;
}
