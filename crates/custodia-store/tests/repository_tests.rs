//! Integration tests for SqliteStateRepository
//!
//! These tests verify all IStateRepository methods using an in-memory
//! SQLite database. Each test function creates a fresh database to
//! ensure test isolation.

use chrono::{Duration, Utc};

use custodia_core::domain::{
    attempt::{AttemptType, UnlockAttempt},
    audit::{AuditCategory, AuditEntry},
    command::{CommandSource, ManagementCommand},
    fingerprint::{DeviceFingerprint, DeviceIdentifiers},
    lock_state::{LockState, LockTransition},
    mismatch::{IdentifierField, MismatchKind, MismatchRecord, MismatchSeverity},
    newtypes::{DeviceId, FingerprintHash, LockId},
};
use custodia_core::ports::IStateRepository;
use custodia_store::{DatabasePool, SqliteStateRepository};

// ============================================================================
// Test helpers
// ============================================================================

/// Create a fresh in-memory repository for each test
async fn setup() -> SqliteStateRepository {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateRepository::new(pool.pool().clone())
}

fn device() -> DeviceId {
    DeviceId::new("DEV-001").unwrap()
}

fn identifiers() -> DeviceIdentifiers {
    DeviceIdentifiers {
        serial_number: "SN-12345".to_string(),
        hardware_id: "HW-A1".to_string(),
        os_build: "build-7".to_string(),
        sim_identifiers: vec!["356938035643809".to_string()],
        installed_memory: "16 GB".to_string(),
        rooted: false,
        usb_debugging: false,
        developer_mode: false,
        bootloader_unlocked: false,
        custom_rom: false,
    }
}

fn fingerprint() -> DeviceFingerprint {
    let hash =
        FingerprintHash::new("a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3")
            .unwrap();
    DeviceFingerprint::new(hash)
}

// ============================================================================
// Lock state tests
// ============================================================================

#[tokio::test]
async fn test_load_lock_state_empty() {
    let repo = setup().await;
    let state = repo.load_lock_state().await.unwrap();
    assert!(state.is_none());
}

#[tokio::test]
async fn test_save_and_load_lock_state() {
    let repo = setup().await;

    let mut state = LockState::unlocked();
    let id = match state.lock("Payment overdue") {
        LockTransition::Locked(id) => id,
        other => panic!("Expected Locked, got {other:?}"),
    };
    repo.save_lock_state(&state).await.unwrap();

    // Simulated restart: reload and compare the identity triple
    let restored = repo.load_lock_state().await.unwrap().unwrap();
    assert!(restored.is_locked());
    assert_eq!(restored.reason(), Some("Payment overdue"));
    assert_eq!(restored.lock_id(), Some(id));
    assert_eq!(restored.locked_at(), state.locked_at());
}

#[tokio::test]
async fn test_save_lock_state_is_upsert() {
    let repo = setup().await;

    let mut state = LockState::unlocked();
    state.lock("first");
    repo.save_lock_state(&state).await.unwrap();

    state.unlock();
    repo.save_lock_state(&state).await.unwrap();

    let restored = repo.load_lock_state().await.unwrap().unwrap();
    assert!(!restored.is_locked());
    assert!(restored.reason().is_none());
    // Episode id retained across the unlock
    assert_eq!(restored.lock_id(), state.lock_id());
}

// ============================================================================
// Command queue tests
// ============================================================================

#[tokio::test]
async fn test_enqueue_assigns_monotonic_sequence() {
    let repo = setup().await;

    let a = ManagementCommand::lock("a", CommandSource::RemoteAuthority);
    let b = ManagementCommand::unlock("b", CommandSource::RemoteAuthority);

    let seq_a = repo.enqueue_command(&a).await.unwrap();
    let seq_b = repo.enqueue_command(&b).await.unwrap();
    assert!(seq_b > seq_a);
}

#[tokio::test]
async fn test_list_commands_fifo_order() {
    let repo = setup().await;

    for reason in ["one", "two", "three"] {
        let command = ManagementCommand::lock(reason, CommandSource::RemoteAuthority);
        repo.enqueue_command(&command).await.unwrap();
    }

    let commands = repo.list_commands().await.unwrap();
    assert_eq!(commands.len(), 3);
    let reasons: Vec<&str> = commands.iter().map(|c| c.command().reason()).collect();
    assert_eq!(reasons, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_replace_command() {
    let repo = setup().await;

    let original = ManagementCommand::lock("old reason", CommandSource::RemoteAuthority);
    let seq = repo.enqueue_command(&original).await.unwrap();

    let replacement = ManagementCommand::lock("new reason", CommandSource::RemoteAuthority);
    repo.replace_command(seq, &replacement).await.unwrap();

    let last = repo.last_command().await.unwrap().unwrap();
    assert_eq!(last.sequence(), seq);
    assert_eq!(last.command().reason(), "new reason");
}

#[tokio::test]
async fn test_remove_and_clear_commands() {
    let repo = setup().await;

    let a = ManagementCommand::lock("a", CommandSource::RemoteAuthority);
    let b = ManagementCommand::lock("b", CommandSource::IntegrityMonitor);
    let seq_a = repo.enqueue_command(&a).await.unwrap();
    repo.enqueue_command(&b).await.unwrap();

    repo.remove_command(seq_a).await.unwrap();
    let remaining = repo.list_commands().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].command().reason(), "b");

    repo.clear_commands().await.unwrap();
    assert!(repo.list_commands().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_last_command_empty() {
    let repo = setup().await;
    assert!(repo.last_command().await.unwrap().is_none());
}

// ============================================================================
// Unlock attempt tests
// ============================================================================

#[tokio::test]
async fn test_save_and_query_attempts() {
    let repo = setup().await;
    let lock_id = LockId::new();

    for success in [false, false, true] {
        let attempt = UnlockAttempt::new(
            lock_id,
            device(),
            AttemptType::Reconcile,
            success,
            "unlock requested",
        );
        repo.save_attempt(&attempt).await.unwrap();
    }

    let since = Utc::now() - Duration::minutes(30);
    let attempts = repo.attempts_for_lock_since(&lock_id, since).await.unwrap();
    assert_eq!(attempts.len(), 3);
    // Oldest first
    assert!(!attempts[0].success());
    assert!(attempts[2].success());
}

#[tokio::test]
async fn test_attempts_scoped_by_lock_id() {
    let repo = setup().await;
    let lock_a = LockId::new();
    let lock_b = LockId::new();

    let attempt = UnlockAttempt::new(lock_a, device(), AttemptType::RemoteCommand, false, "x");
    repo.save_attempt(&attempt).await.unwrap();

    let since = Utc::now() - Duration::minutes(30);
    assert_eq!(
        repo.attempts_for_lock_since(&lock_a, since)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(repo
        .attempts_for_lock_since(&lock_b, since)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_purge_attempts_before() {
    let repo = setup().await;
    let lock_id = LockId::new();

    let attempt = UnlockAttempt::new(lock_id, device(), AttemptType::Reconcile, false, "x");
    repo.save_attempt(&attempt).await.unwrap();

    // Cutoff in the past removes nothing
    let removed = repo
        .purge_attempts_before(Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(removed, 0);

    // Cutoff in the future removes the record
    let removed = repo
        .purge_attempts_before(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);
}

// ============================================================================
// Baseline and wipe flag tests
// ============================================================================

#[tokio::test]
async fn test_baseline_roundtrip() {
    let repo = setup().await;
    assert!(repo.load_baseline().await.unwrap().is_none());

    let ids = identifiers();
    let fp = fingerprint();
    repo.save_baseline(&ids, &fp).await.unwrap();

    let (restored_ids, restored_fp) = repo.load_baseline().await.unwrap().unwrap();
    assert_eq!(restored_ids, ids);
    assert_eq!(restored_fp.hash(), fp.hash());
}

#[tokio::test]
async fn test_baseline_replace() {
    let repo = setup().await;
    repo.save_baseline(&identifiers(), &fingerprint())
        .await
        .unwrap();

    let mut changed = identifiers();
    changed.serial_number = "SN-99999".to_string();
    repo.save_baseline(&changed, &fingerprint()).await.unwrap();

    let (restored, _) = repo.load_baseline().await.unwrap().unwrap();
    assert_eq!(restored.serial_number, "SN-99999");
}

#[tokio::test]
async fn test_wipe_eligible_flag() {
    let repo = setup().await;
    assert!(repo.wipe_eligible_reason().await.unwrap().is_none());

    repo.mark_wipe_eligible("Device swap detected").await.unwrap();
    assert_eq!(
        repo.wipe_eligible_reason().await.unwrap().as_deref(),
        Some("Device swap detected")
    );
}

// ============================================================================
// Mismatch record tests
// ============================================================================

#[tokio::test]
async fn test_mismatch_save_and_list() {
    let repo = setup().await;

    let record = MismatchRecord::new(
        MismatchKind::DeviceSwap,
        MismatchSeverity::High,
        IdentifierField::SerialNumber,
        "SN-1",
        "SN-2",
    );
    repo.save_mismatch(&record).await.unwrap();

    let records = repo.list_mismatches(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind(), MismatchKind::DeviceSwap);
    assert_eq!(records[0].stored_value(), "SN-1");
}

#[tokio::test]
async fn test_mismatch_prune_keeps_newest() {
    let repo = setup().await;

    for i in 0..10 {
        let record = MismatchRecord::new(
            MismatchKind::Drift,
            MismatchSeverity::Medium,
            IdentifierField::OsBuild,
            "old",
            format!("new-{i}"),
        );
        repo.save_mismatch(&record).await.unwrap();
    }

    repo.prune_mismatches(3).await.unwrap();

    let records = repo.list_mismatches(10).await.unwrap();
    assert_eq!(records.len(), 3);
    // Newest first
    assert_eq!(records[0].current_value(), "new-9");
}

// ============================================================================
// Audit tests
// ============================================================================

#[tokio::test]
async fn test_audit_append_and_query() {
    let repo = setup().await;

    repo.append_audit(&AuditEntry::info(AuditCategory::Lock, "locked"))
        .await
        .unwrap();
    repo.append_audit(&AuditEntry::info(AuditCategory::Sync, "cycle"))
        .await
        .unwrap();

    let all = repo.audit_entries(None, 100).await.unwrap();
    assert_eq!(all.len(), 2);

    let lock_only = repo
        .audit_entries(Some(AuditCategory::Lock), 100)
        .await
        .unwrap();
    assert_eq!(lock_only.len(), 1);
    assert_eq!(lock_only[0].message(), "locked");
}

#[tokio::test]
async fn test_audit_prune_is_per_category() {
    let repo = setup().await;

    for i in 0..5 {
        repo.append_audit(&AuditEntry::info(AuditCategory::Sync, format!("sync-{i}")))
            .await
            .unwrap();
    }
    repo.append_audit(&AuditEntry::info(AuditCategory::Lock, "locked"))
        .await
        .unwrap();

    repo.prune_audit(AuditCategory::Sync, 2).await.unwrap();

    let sync = repo
        .audit_entries(Some(AuditCategory::Sync), 100)
        .await
        .unwrap();
    assert_eq!(sync.len(), 2);
    // The newest sync entries survive
    assert_eq!(sync[0].message(), "sync-3");
    assert_eq!(sync[1].message(), "sync-4");

    // Other categories are untouched
    let lock = repo
        .audit_entries(Some(AuditCategory::Lock), 100)
        .await
        .unwrap();
    assert_eq!(lock.len(), 1);
}
