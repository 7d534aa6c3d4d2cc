//! Integration tests for the lock state synchronizer, offline queue, and
//! heartbeat scheduler
//!
//! These tests exercise the enforcement core end to end over an in-memory
//! SQLite repository, with scripted transport, device-control, and
//! lock-screen doubles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;

use custodia_audit::AuditLog;
use custodia_core::domain::{
    attempt::AttemptType,
    audit::AuditCategory,
    command::{CommandSource, ManagementCommand},
    fingerprint::DeviceIdentifiers,
    newtypes::DeviceId,
};
use custodia_core::ports::{
    CommandResponse, ControlError, HeartbeatRequest, HeartbeatResponse, IDeviceControl,
    IIdentitySource, ILockScreen, IStateRepository, ITransport, MismatchAlert, RemoteLockSnapshot,
    SuspiciousActivityAlert, TransportError,
};
use custodia_guard::{AttemptTracker, LockoutPolicy};
use custodia_store::{DatabasePool, SqliteStateRepository};
use custodia_sync::{
    HeartbeatScheduler, LockError, LockOutcome, LockSynchronizer, OfflineCommandQueue,
    ReconcileOutcome, RequestOutcome, UnlockOutcome, UnlockRejection,
};

// ============================================================================
// Test doubles
// ============================================================================

/// Transport double with scriptable failures
///
/// - `fail_command_reasons`: send_command fails with a connectivity error
///   for commands carrying one of these reasons
/// - `fail_all_commands`: every send_command fails with a connectivity error
/// - `heartbeats`: scripted heartbeat responses, popped per call
struct ScriptedTransport {
    fail_command_reasons: Mutex<Vec<String>>,
    fail_all_commands: AtomicBool,
    sent_commands: Mutex<Vec<ManagementCommand>>,
    heartbeats: Mutex<VecDeque<Result<HeartbeatResponse, TransportError>>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            fail_command_reasons: Mutex::new(Vec::new()),
            fail_all_commands: AtomicBool::new(false),
            sent_commands: Mutex::new(Vec::new()),
            heartbeats: Mutex::new(VecDeque::new()),
        }
    }

    fn fail_commands_with_reason(&self, reason: &str) {
        self.fail_command_reasons
            .lock()
            .unwrap()
            .push(reason.to_string());
    }

    fn set_offline(&self, offline: bool) {
        self.fail_all_commands.store(offline, Ordering::Release);
    }

    fn sent_commands(&self) -> Vec<ManagementCommand> {
        self.sent_commands.lock().unwrap().clone()
    }

    fn push_heartbeat(&self, response: Result<HeartbeatResponse, TransportError>) {
        self.heartbeats.lock().unwrap().push_back(response);
    }
}

#[async_trait::async_trait]
impl ITransport for ScriptedTransport {
    async fn send_heartbeat(
        &self,
        _request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError> {
        match self.heartbeats.lock().unwrap().pop_front() {
            Some(scripted) => scripted,
            None => Ok(HeartbeatResponse {
                success: true,
                lock_status: RemoteLockSnapshot {
                    is_locked: false,
                    reason: None,
                },
            }),
        }
    }

    async fn send_command(
        &self,
        _device_id: &DeviceId,
        command: &ManagementCommand,
    ) -> Result<CommandResponse, TransportError> {
        if self.fail_all_commands.load(Ordering::Acquire) {
            return Err(TransportError::Connectivity(
                "no route to authority".to_string(),
            ));
        }
        if self
            .fail_command_reasons
            .lock()
            .unwrap()
            .iter()
            .any(|r| r == command.reason())
        {
            return Err(TransportError::Connectivity(
                "no route to authority".to_string(),
            ));
        }
        self.sent_commands.lock().unwrap().push(command.clone());
        Ok(CommandResponse {
            success: true,
            message: "ok".to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn send_mismatch_alert(&self, _alert: &MismatchAlert) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_suspicious_activity(
        &self,
        _alert: &SuspiciousActivityAlert,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Device-control double with a revocable privilege
struct MockDeviceControl {
    available: AtomicBool,
}

impl MockDeviceControl {
    fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
        }
    }

    fn revoke(&self) {
        self.available.store(false, Ordering::Release);
    }
}

#[async_trait::async_trait]
impl IDeviceControl for MockDeviceControl {
    async fn lock_now(&self) -> Result<(), ControlError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ControlError::PrivilegeLost(
                "device owner privilege revoked".to_string(),
            ))
        }
    }

    async fn is_control_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

/// Lock-screen double recording show/dismiss events
struct RecordingLockScreen {
    events: Mutex<Vec<String>>,
}

impl RecordingLockScreen {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ILockScreen for RecordingLockScreen {
    async fn show(&self, reason: &str) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(format!("show:{reason}"));
        Ok(())
    }

    async fn dismiss(&self) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("dismiss".to_string());
        Ok(())
    }
}

/// Identity double returning a fixed snapshot
struct FixedIdentity;

#[async_trait::async_trait]
impl IIdentitySource for FixedIdentity {
    async fn collect(&self) -> anyhow::Result<DeviceIdentifiers> {
        Ok(DeviceIdentifiers {
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
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    repo: Arc<SqliteStateRepository>,
    transport: Arc<ScriptedTransport>,
    control: Arc<MockDeviceControl>,
    screen: Arc<RecordingLockScreen>,
    queue: Arc<OfflineCommandQueue>,
    synchronizer: Arc<LockSynchronizer>,
    tracker: Arc<AttemptTracker>,
}

fn device() -> DeviceId {
    DeviceId::new("DEV-001").unwrap()
}

async fn setup() -> Harness {
    let pool = DatabasePool::in_memory().await.unwrap();
    setup_with_repo(Arc::new(SqliteStateRepository::new(pool.pool().clone()))).await
}

async fn setup_with_repo(repo: Arc<SqliteStateRepository>) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let control = Arc::new(MockDeviceControl::new());
    let screen = Arc::new(RecordingLockScreen::new());
    let audit = Arc::new(AuditLog::new(repo.clone(), 1000));
    let tracker = Arc::new(AttemptTracker::new(
        repo.clone(),
        transport.clone(),
        audit.clone(),
        device(),
        LockoutPolicy::default(),
    ));
    let queue = Arc::new(OfflineCommandQueue::new(repo.clone(), audit.clone()));

    let synchronizer = Arc::new(
        LockSynchronizer::load(
            repo.clone(),
            control.clone(),
            screen.clone(),
            tracker.clone(),
            transport.clone(),
            queue.clone(),
            audit,
            device(),
        )
        .await
        .unwrap(),
    );

    Harness {
        repo,
        transport,
        control,
        screen,
        queue,
        synchronizer,
        tracker,
    }
}

fn locked_snapshot(reason: &str) -> RemoteLockSnapshot {
    RemoteLockSnapshot {
        is_locked: true,
        reason: Some(reason.to_string()),
    }
}

fn unlocked_snapshot() -> RemoteLockSnapshot {
    RemoteLockSnapshot {
        is_locked: false,
        reason: None,
    }
}

/// Record `count` failed unlock evaluations against the current episode
/// by replaying unlocks from an invalid (non-remote) source.
async fn record_failures(harness: &Harness, count: usize) {
    for _ in 0..count {
        let outcome = harness
            .synchronizer
            .apply_unlock(
                "unauthorized unlock",
                CommandSource::IntegrityMonitor,
                AttemptType::RemoteCommand,
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            UnlockOutcome::Rejected(UnlockRejection::NotRemoteAuthority(_))
        ));
    }
}

// ============================================================================
// Reconciliation scenarios
// ============================================================================

#[tokio::test]
async fn test_heartbeat_lock_scenario() {
    let harness = setup().await;

    // Device unlocked; the authority declares a lock
    let outcome = harness
        .synchronizer
        .reconcile(&locked_snapshot("Payment overdue"))
        .await
        .unwrap();

    let lock_id = match outcome {
        ReconcileOutcome::Locked(id) => id,
        other => panic!("Expected Locked, got {other:?}"),
    };

    let status = harness.synchronizer.status().await.unwrap();
    assert!(status.is_locked);
    assert_eq!(status.reason.as_deref(), Some("Payment overdue"));
    assert_eq!(status.lock_id, Some(lock_id));

    // Overlay shown with the categorized reason
    assert_eq!(
        harness.screen.events(),
        vec!["show:Payment overdue".to_string()]
    );

    // LOCK audit entry recorded
    let entries = harness
        .repo
        .audit_entries(Some(AuditCategory::Lock), 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message(), "Device locked");
}

#[tokio::test]
async fn test_reconcile_in_sync_is_noop() {
    let harness = setup().await;

    let outcome = harness
        .synchronizer
        .reconcile(&unlocked_snapshot())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::InSync);

    // No transitions, no overlay, no lock audit entries
    assert!(harness.screen.events().is_empty());
    let entries = harness
        .repo
        .audit_entries(Some(AuditCategory::Lock), 10)
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_reconcile_converges_to_remote_intent() {
    let harness = setup().await;

    harness
        .synchronizer
        .reconcile(&locked_snapshot("Payment overdue"))
        .await
        .unwrap();
    assert!(harness.synchronizer.status().await.unwrap().is_locked);

    // Next cycle declares unlocked; local state follows
    let outcome = harness
        .synchronizer
        .reconcile(&unlocked_snapshot())
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Unlocked(_)));
    assert!(!harness.synchronizer.status().await.unwrap().is_locked);

    // Overlay shown then dismissed
    let events = harness.screen.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], "dismiss");
}

#[tokio::test]
async fn test_remote_unlock_clears_lockout_for_episode() {
    let harness = setup().await;

    harness
        .synchronizer
        .reconcile(&locked_snapshot("Payment overdue"))
        .await
        .unwrap();
    let lock_id = harness.synchronizer.status().await.unwrap().lock_id.unwrap();

    // Failures below the threshold do not gate the unlock
    record_failures(&harness, 4).await;

    let outcome = harness
        .synchronizer
        .reconcile(&unlocked_snapshot())
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Unlocked(_)));

    // The successful unlock cleared the failure run for that episode
    let status = harness.tracker.check_lockout(&lock_id).await;
    assert!(!status.is_locked_out);
    assert_eq!(status.failed_attempts, 0);
}

// ============================================================================
// Lockout gate
// ============================================================================

#[tokio::test]
async fn test_lockout_gates_remote_unlock() {
    let harness = setup().await;

    harness
        .synchronizer
        .reconcile(&locked_snapshot("Payment overdue"))
        .await
        .unwrap();

    // Five failures open the lockout window
    record_failures(&harness, 5).await;

    // Even the remote authority's unlock is refused until expiry
    let outcome = harness
        .synchronizer
        .reconcile(&unlocked_snapshot())
        .await
        .unwrap();
    let status = match outcome {
        ReconcileOutcome::UnlockRefused(status) => status,
        other => panic!("Expected UnlockRefused, got {other:?}"),
    };
    assert!(status.is_locked_out);
    assert!(status.remaining.num_minutes() >= 14);

    // Still locked
    assert!(harness.synchronizer.status().await.unwrap().is_locked);

    // The refused evaluation was itself recorded as a failure
    let lock_id = harness.synchronizer.status().await.unwrap().lock_id.unwrap();
    let updated = harness.tracker.check_lockout(&lock_id).await;
    assert_eq!(updated.failed_attempts, 6);
}

#[tokio::test]
async fn test_unlock_rejected_for_non_remote_source() {
    let harness = setup().await;
    harness
        .synchronizer
        .apply_lock("Tamper detected", CommandSource::IntegrityMonitor)
        .await
        .unwrap();

    let outcome = harness
        .synchronizer
        .apply_unlock(
            "local override",
            CommandSource::Operator,
            AttemptType::RemoteCommand,
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        UnlockOutcome::Rejected(UnlockRejection::NotRemoteAuthority(CommandSource::Operator))
    ));
    assert!(harness.synchronizer.status().await.unwrap().is_locked);

    // The rejection is recorded as a failed attempt
    let lock_id = harness.synchronizer.status().await.unwrap().lock_id.unwrap();
    let status = harness.tracker.check_lockout(&lock_id).await;
    assert_eq!(status.failed_attempts, 1);
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_apply_lock_idempotent() {
    let harness = setup().await;

    let first = harness
        .synchronizer
        .apply_lock("Payment overdue", CommandSource::RemoteAuthority)
        .await
        .unwrap();
    let first_id = match first {
        LockOutcome::Applied(id) => id,
        other => panic!("Expected Applied, got {other:?}"),
    };

    let second = harness
        .synchronizer
        .apply_lock("Payment overdue", CommandSource::RemoteAuthority)
        .await
        .unwrap();

    // No new episode on replay
    assert_eq!(second, LockOutcome::AlreadySatisfied(first_id));

    // One applied entry plus one no-op marker
    let entries = harness
        .repo
        .audit_entries(Some(AuditCategory::Lock), 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message(), "Device locked");
    assert_eq!(entries[1].message(), "Lock replayed, already locked");
}

#[tokio::test]
async fn test_apply_unlock_idempotent() {
    let harness = setup().await;

    let outcome = harness
        .synchronizer
        .apply_unlock(
            "Payment received",
            CommandSource::RemoteAuthority,
            AttemptType::Reconcile,
        )
        .await
        .unwrap();
    assert_eq!(outcome, UnlockOutcome::AlreadyUnlocked);
}

// ============================================================================
// Privilege failures
// ============================================================================

#[tokio::test]
async fn test_privilege_loss_is_terminal() {
    let harness = setup().await;
    harness.control.revoke();

    let result = harness
        .synchronizer
        .apply_lock("Payment overdue", CommandSource::RemoteAuthority)
        .await;

    assert!(matches!(result, Err(LockError::Privilege(_))));

    // State unchanged, no overlay, but the failure is audited
    assert!(!harness.synchronizer.status().await.unwrap().is_locked);
    assert!(harness.screen.events().is_empty());
    let entries = harness
        .repo
        .audit_entries(Some(AuditCategory::Lock), 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message(), "Lock failed");
}

// ============================================================================
// Locally-triggered requests and the offline queue
// ============================================================================

#[tokio::test]
async fn test_request_lock_online_applies_and_notifies() {
    let harness = setup().await;

    let outcome = harness
        .synchronizer
        .request_lock("Tamper detected", CommandSource::IntegrityMonitor)
        .await
        .unwrap();

    assert!(matches!(outcome, RequestOutcome::Applied(_)));
    assert!(harness.synchronizer.status().await.unwrap().is_locked);
    assert_eq!(harness.transport.sent_commands().len(), 1);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_request_lock_offline_locks_and_queues() {
    let harness = setup().await;
    harness.transport.set_offline(true);

    let outcome = harness
        .synchronizer
        .request_lock("Tamper detected", CommandSource::IntegrityMonitor)
        .await
        .unwrap();

    // Enforcement is immediate even offline; only the notification queues
    assert!(matches!(outcome, RequestOutcome::Queued(_)));
    assert!(harness.synchronizer.status().await.unwrap().is_locked);
    assert_eq!(harness.queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_queue_collapses_duplicate_tail() {
    let harness = setup().await;
    harness.transport.set_offline(true);

    for _ in 0..3 {
        harness
            .synchronizer
            .request_lock("Tamper detected", CommandSource::IntegrityMonitor)
            .await
            .unwrap();
    }

    // Back-to-back (action, reason) duplicates collapse to the latest entry
    assert_eq!(harness.queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_queue_replay_fifo_halts_on_failure() {
    let harness = setup().await;

    // Park three distinct lock commands while offline
    harness.transport.set_offline(true);
    for reason in ["alpha", "bravo", "charlie"] {
        harness
            .synchronizer
            .request_lock(reason, CommandSource::IntegrityMonitor)
            .await
            .unwrap();
    }
    assert_eq!(harness.queue.depth().await.unwrap(), 3);

    // Back online, but delivery of "bravo" keeps failing
    harness.transport.set_offline(false);
    harness.transport.fail_commands_with_reason("bravo");

    let result = harness
        .queue
        .apply_all(&harness.synchronizer)
        .await
        .unwrap();

    // "alpha" applied and removed; the pass halts at "bravo"; "charlie"
    // is never attempted
    assert_eq!(result.applied, 1);
    assert!(result.halted);

    let remaining = harness.repo.list_commands().await.unwrap();
    let reasons: Vec<&str> = remaining
        .iter()
        .map(|c| c.command().reason())
        .collect();
    assert_eq!(reasons, vec!["bravo", "charlie"]);

    let sent: Vec<String> = harness
        .transport
        .sent_commands()
        .iter()
        .map(|c| c.reason().to_string())
        .collect();
    assert!(sent.contains(&"alpha".to_string()));
    assert!(!sent.contains(&"charlie".to_string()));
}

#[tokio::test]
async fn test_queue_replay_of_satisfied_command_is_noop() {
    let harness = setup().await;

    harness.transport.set_offline(true);
    harness
        .synchronizer
        .request_lock("Tamper detected", CommandSource::IntegrityMonitor)
        .await
        .unwrap();
    let episode = harness.synchronizer.status().await.unwrap().lock_id;

    harness.transport.set_offline(false);
    let result = harness
        .queue
        .apply_all(&harness.synchronizer)
        .await
        .unwrap();

    assert_eq!(result.applied, 1);
    assert!(!result.halted);
    // Replay did not mint a new episode
    assert_eq!(harness.synchronizer.status().await.unwrap().lock_id, episode);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_queue_clear() {
    let harness = setup().await;
    harness.transport.set_offline(true);
    harness
        .synchronizer
        .request_lock("x", CommandSource::IntegrityMonitor)
        .await
        .unwrap();

    harness.queue.clear().await.unwrap();
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

// ============================================================================
// Restart round-trip
// ============================================================================

#[tokio::test]
async fn test_state_survives_restart() {
    let pool = DatabasePool::in_memory().await.unwrap();
    let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));

    let harness = setup_with_repo(repo.clone()).await;
    harness
        .synchronizer
        .apply_lock("Payment overdue", CommandSource::RemoteAuthority)
        .await
        .unwrap();
    let before = harness.synchronizer.status().await.unwrap();

    // Simulated process restart over the same database
    let restarted = setup_with_repo(repo).await;
    let after = restarted.synchronizer.status().await.unwrap();

    assert_eq!(after.is_locked, before.is_locked);
    assert_eq!(after.reason, before.reason);
    assert_eq!(after.lock_id, before.lock_id);
}

// ============================================================================
// Heartbeat scheduler
// ============================================================================

fn scheduler_for(harness: &Harness) -> HeartbeatScheduler {
    let audit = Arc::new(AuditLog::new(harness.repo.clone(), 1000));
    HeartbeatScheduler::new(
        harness.synchronizer.clone(),
        harness.queue.clone(),
        harness.transport.clone(),
        Arc::new(FixedIdentity),
        audit,
        device(),
        StdDuration::from_secs(60),
        StdDuration::from_secs(15),
    )
}

#[tokio::test]
async fn test_cycle_applies_remote_intent() {
    let harness = setup().await;
    let scheduler = scheduler_for(&harness);

    harness.transport.push_heartbeat(Ok(HeartbeatResponse {
        success: true,
        lock_status: locked_snapshot("Payment overdue"),
    }));

    scheduler.cycle().await;

    assert!(scheduler.is_online());
    let status = harness.synchronizer.status().await.unwrap();
    assert!(status.is_locked);
    assert_eq!(status.reason.as_deref(), Some("Payment overdue"));
}

#[tokio::test]
async fn test_offline_cycle_does_not_reconcile() {
    let harness = setup().await;
    let scheduler = scheduler_for(&harness);

    harness
        .transport
        .push_heartbeat(Err(TransportError::Connectivity("dns failure".to_string())));

    scheduler.cycle().await;

    assert!(!scheduler.is_online());
    assert!(!harness.synchronizer.status().await.unwrap().is_locked);

    // The offline cycle is audited under SYNC
    let entries = harness
        .repo
        .audit_entries(Some(AuditCategory::Sync), 10)
        .await
        .unwrap();
    assert!(entries
        .iter()
        .any(|e| e.message() == "Heartbeat cycle offline"));
}

#[tokio::test]
async fn test_reconnect_replays_queue() {
    let harness = setup().await;
    let scheduler = scheduler_for(&harness);

    // Offline: a local lock request parks its notification
    harness.transport.set_offline(true);
    harness
        .transport
        .push_heartbeat(Err(TransportError::Timeout(15)));
    scheduler.cycle().await;

    harness
        .synchronizer
        .request_lock("Tamper detected", CommandSource::IntegrityMonitor)
        .await
        .unwrap();
    assert_eq!(harness.queue.depth().await.unwrap(), 1);

    // Connectivity restored: the next successful cycle drains the queue
    harness.transport.set_offline(false);
    harness.transport.push_heartbeat(Ok(HeartbeatResponse {
        success: true,
        lock_status: locked_snapshot("Tamper detected"),
    }));
    scheduler.cycle().await;

    assert!(scheduler.is_online());
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
    assert!(harness
        .transport
        .sent_commands()
        .iter()
        .any(|c| c.reason() == "Tamper detected"));
}

#[tokio::test]
async fn test_unsuccessful_response_is_treated_as_offline() {
    let harness = setup().await;
    let scheduler = scheduler_for(&harness);

    // A response with success=false must not feed reconciliation
    harness.transport.push_heartbeat(Ok(HeartbeatResponse {
        success: false,
        lock_status: locked_snapshot("should not apply"),
    }));

    scheduler.cycle().await;

    assert!(!scheduler.is_online());
    assert!(!harness.synchronizer.status().await.unwrap().is_locked);
}
