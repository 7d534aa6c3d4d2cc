//! Lock State Synchronizer
//!
//! The [`LockSynchronizer`] is the sole writer of the canonical
//! [`LockState`]. Every transition - remote reconciliation, queued command
//! replay, integrity enforcement - flows through it, and a `tokio` mutex
//! makes it a monitor: one logical operation completes before the next
//! begins, so concurrent lock and unlock triggers cannot race.
//!
//! ## Failure semantics
//!
//! - Device-control failures are terminal: surfaced to the caller, audited,
//!   never retried automatically.
//! - Lock state persistence failures are retried with bounded exponential
//!   backoff; the in-memory state stays authoritative until a write lands.
//! - Lock screen signalling is best-effort; a failed overlay update never
//!   fails the transition that caused it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use custodia_audit::AuditLog;
use custodia_core::domain::{
    attempt::{AttemptType, LockoutStatus, UnlockAttempt},
    command::{CommandAction, CommandSource, ManagementCommand},
    lock_state::{LockState, LockTransition},
    newtypes::{DeviceId, LockId},
};
use custodia_core::ports::{
    ControlError, IDeviceControl, ILockScreen, IStateRepository, ITransport, LockStatusReport,
    RemoteLockSnapshot,
};
use custodia_guard::AttemptTracker;

use crate::queue::OfflineCommandQueue;

/// Fallback reason when the remote snapshot declares a lock without one
const DEFAULT_REMOTE_LOCK_REASON: &str = "Locked by remote authority";

// ============================================================================
// Persistence retry
// ============================================================================

/// Maximum number of retries for lock state persistence
const MAX_PERSIST_RETRIES: u32 = 3;

/// Base delay for exponential backoff (500 ms)
const PERSIST_BASE_DELAY_MS: u64 = 500;

/// Executes a persistence operation with bounded exponential backoff
///
/// Backoff schedule: 500ms, 1s, 2s. The final error is returned to the
/// caller, which keeps the in-memory state authoritative and moves on.
async fn persist_with_retry<F, Fut>(operation_name: &str, f: F) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=MAX_PERSIST_RETRIES {
        match f().await {
            Ok(()) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Persistence succeeded after retry"
                    );
                }
                return Ok(());
            }
            Err(err) => {
                if attempt < MAX_PERSIST_RETRIES {
                    let delay_ms = PERSIST_BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms,
                        error = %err,
                        "Persistence failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Retry exhausted for {}", operation_name)))
}

// ============================================================================
// Result and error types
// ============================================================================

/// Errors from lock/unlock operations
#[derive(Debug, Error)]
pub enum LockError {
    /// The privileged device-control capability failed; terminal, not retried
    #[error("Device control failure: {0}")]
    Privilege(#[from] ControlError),

    /// The offline queue could not persist a command
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

/// Outcome of a lock application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The device transitioned to LOCKED under a fresh episode
    Applied(LockId),
    /// Already locked; the reason was refreshed, no new episode
    AlreadySatisfied(LockId),
}

impl LockOutcome {
    /// The episode id the outcome refers to
    pub fn lock_id(&self) -> LockId {
        match self {
            LockOutcome::Applied(id) | LockOutcome::AlreadySatisfied(id) => *id,
        }
    }
}

/// Why an unlock evaluation was refused
#[derive(Debug, Clone, PartialEq)]
pub enum UnlockRejection {
    /// An active lockout window covers the current episode
    LockoutActive(LockoutStatus),
    /// The initiator is not the remote authority (no local unlock path)
    NotRemoteAuthority(CommandSource),
}

/// Outcome of an unlock application
#[derive(Debug, Clone, PartialEq)]
pub enum UnlockOutcome {
    /// The device transitioned to UNLOCKED, ending the episode
    Applied(LockId),
    /// Already unlocked; idempotent no-op
    AlreadyUnlocked,
    /// The evaluation was refused; the refusal is recorded as an attempt
    Rejected(UnlockRejection),
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The remote intent drove a lock transition
    Locked(LockId),
    /// The remote intent drove an unlock transition
    Unlocked(LockId),
    /// The remote wanted an unlock but the lockout gate refused it
    UnlockRefused(LockoutStatus),
    /// Local state already matched the remote intent
    InSync,
}

/// Outcome of a locally-triggered request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// The request was delivered and applied
    Applied(LockId),
    /// The state already satisfied the request
    AlreadySatisfied,
    /// Connectivity was unavailable; the command is parked in the queue
    Queued(u64),
    /// The authority definitively refused the request
    Rejected(String),
}

/// Read-only snapshot of the agent's enforcement state
#[derive(Debug, Clone)]
pub struct AgentStatus {
    /// Whether the device is locked
    pub is_locked: bool,
    /// Current lock reason
    pub reason: Option<String>,
    /// Current (or most recent) lock episode
    pub lock_id: Option<LockId>,
    /// Commands waiting for connectivity
    pub queue_depth: usize,
    /// Wipe-eligibility reason, if the device has been marked
    pub wipe_eligible: Option<String>,
}

// ============================================================================
// LockSynchronizer
// ============================================================================

/// Sole writer of the canonical lock state
///
/// ## Dependencies
///
/// - `state_repo`: lock state persistence
/// - `device_control`: the privileged capability that physically locks
/// - `lock_screen`: blocking overlay signalling
/// - `tracker`: lockout gate consulted before every unlock
/// - `transport`: management command delivery for locally-triggered requests
/// - `queue`: parking for commands the authority could not receive
/// - `audit`: LOCK/UNLOCK entries
pub struct LockSynchronizer {
    /// Monitor around the canonical state: one logical operation at a time
    state: Mutex<LockState>,
    state_repo: Arc<dyn IStateRepository>,
    device_control: Arc<dyn IDeviceControl>,
    lock_screen: Arc<dyn ILockScreen>,
    tracker: Arc<AttemptTracker>,
    transport: Arc<dyn ITransport>,
    queue: Arc<OfflineCommandQueue>,
    audit: Arc<AuditLog>,
    device_id: DeviceId,
}

impl LockSynchronizer {
    /// Creates a synchronizer, reloading persisted state
    ///
    /// On first run (nothing persisted) the device starts unlocked; the
    /// remote authority's intent arrives with the first heartbeat.
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        state_repo: Arc<dyn IStateRepository>,
        device_control: Arc<dyn IDeviceControl>,
        lock_screen: Arc<dyn ILockScreen>,
        tracker: Arc<AttemptTracker>,
        transport: Arc<dyn ITransport>,
        queue: Arc<OfflineCommandQueue>,
        audit: Arc<AuditLog>,
        device_id: DeviceId,
    ) -> anyhow::Result<Self> {
        let state = state_repo.load_lock_state().await?.unwrap_or_default();
        info!(
            is_locked = state.is_locked(),
            lock_id = ?state.lock_id(),
            "Lock state loaded"
        );

        Ok(Self {
            state: Mutex::new(state),
            state_repo,
            device_control,
            lock_screen,
            tracker,
            transport,
            queue,
            audit,
            device_id,
        })
    }

    /// Local lock status as reported in heartbeat requests
    pub async fn status_report(&self) -> LockStatusReport {
        let state = self.state.lock().await;
        LockStatusReport {
            is_locked: state.is_locked(),
            reason: state.reason().map(String::from),
        }
    }

    /// Read-only status snapshot for operators
    pub async fn status(&self) -> anyhow::Result<AgentStatus> {
        let (is_locked, reason, lock_id) = {
            let state = self.state.lock().await;
            (
                state.is_locked(),
                state.reason().map(String::from),
                state.lock_id(),
            )
        };
        let queue_depth = self.queue.depth().await?;
        let wipe_eligible = self.state_repo.wipe_eligible_reason().await?;

        Ok(AgentStatus {
            is_locked,
            reason,
            lock_id,
            queue_depth,
            wipe_eligible,
        })
    }

    // ========================================================================
    // apply_lock / apply_unlock
    // ========================================================================

    /// Drives the UNLOCKED→LOCKED transition
    ///
    /// Invokes the device-control capability synchronously before mutating
    /// state: if the privilege is gone the state must not claim a lock that
    /// is not physically enforced. Idempotent when already locked.
    pub async fn apply_lock(
        &self,
        reason: &str,
        source: CommandSource,
    ) -> Result<LockOutcome, LockError> {
        let mut state = self.state.lock().await;

        if state.is_locked() {
            let transition = state.lock(reason);
            let id = match transition {
                LockTransition::AlreadyLocked(id) => id,
                // lock() on a locked state only yields AlreadyLocked
                LockTransition::Locked(id) => id,
                _ => unreachable!("lock() never unlocks"),
            };
            self.persist(&state).await;
            // Refresh the displayed reason
            if let Err(e) = self.lock_screen.show(reason).await {
                warn!(error = %e, "Failed to refresh lock screen");
            }
            self.audit.lock_noop(id, reason).await;
            debug!(lock_id = %id, "Lock replayed, already locked");
            return Ok(LockOutcome::AlreadySatisfied(id));
        }

        // The physical block comes first; a privilege failure is terminal.
        if let Err(e) = self.device_control.lock_now().await {
            self.audit.lock_failed(reason, &e.to_string()).await;
            return Err(LockError::Privilege(e));
        }

        let transition = state.lock(reason);
        let id = match transition {
            LockTransition::Locked(id) => id,
            _ => unreachable!("lock() on unlocked state yields Locked"),
        };

        self.persist(&state).await;

        if let Err(e) = self.lock_screen.show(reason).await {
            warn!(error = %e, "Failed to show lock screen");
        }

        self.audit.lock_applied(id, reason, source).await;
        info!(lock_id = %id, reason, source = %source, "Device locked");
        Ok(LockOutcome::Applied(id))
    }

    /// Drives the LOCKED→UNLOCKED transition
    ///
    /// Permitted only for the remote authority - there is no local unlock
    /// path by design. The lockout gate is consulted first and refuses even
    /// legitimate remote unlocks while a window is active: the cooldown is
    /// the defense against replayed or oscillating remote command streams.
    pub async fn apply_unlock(
        &self,
        reason: &str,
        source: CommandSource,
        attempt_type: AttemptType,
    ) -> Result<UnlockOutcome, LockError> {
        let mut state = self.state.lock().await;

        if !state.is_locked() {
            debug!("Unlock replayed, already unlocked");
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        // is_locked implies an episode id exists
        let lock_id = match state.lock_id() {
            Some(id) => id,
            None => {
                warn!("Locked state without episode id, treating as unlocked");
                return Ok(UnlockOutcome::AlreadyUnlocked);
            }
        };

        if source != CommandSource::RemoteAuthority {
            let attempt =
                UnlockAttempt::new(lock_id, self.device_id.clone(), attempt_type, false, reason);
            self.tracker.record_attempt(&attempt).await;
            self.audit.unlock_rejected_source(source).await;
            warn!(source = %source, "Unlock rejected, not the remote authority");
            return Ok(UnlockOutcome::Rejected(UnlockRejection::NotRemoteAuthority(
                source,
            )));
        }

        let status = self.tracker.check_lockout(&lock_id).await;
        if status.is_locked_out {
            let attempt =
                UnlockAttempt::new(lock_id, self.device_id.clone(), attempt_type, false, reason);
            self.tracker.record_attempt(&attempt).await;
            self.audit.unlock_refused_lockout(lock_id, &status).await;
            warn!(
                lock_id = %lock_id,
                remaining_secs = status.remaining.num_seconds(),
                "Unlock refused, lockout active"
            );
            return Ok(UnlockOutcome::Rejected(UnlockRejection::LockoutActive(
                status,
            )));
        }

        let transition = state.unlock();
        debug_assert!(matches!(transition, LockTransition::Unlocked(_)));

        self.persist(&state).await;

        if let Err(e) = self.lock_screen.dismiss().await {
            warn!(error = %e, "Failed to dismiss lock screen");
        }

        // The successful attempt clears the lockout window for this episode.
        let attempt =
            UnlockAttempt::new(lock_id, self.device_id.clone(), attempt_type, true, reason);
        self.tracker.record_attempt(&attempt).await;

        self.audit.unlock_applied(lock_id, reason).await;
        info!(lock_id = %lock_id, reason, "Device unlocked");
        Ok(UnlockOutcome::Applied(lock_id))
    }

    // ========================================================================
    // reconcile
    // ========================================================================

    /// Aligns local state to the remote authority's declared intent
    ///
    /// Invoked after every successful heartbeat response. The device
    /// converges to the backend's last declared intent within one heartbeat
    /// interval; a matching state is a no-op.
    pub async fn reconcile(
        &self,
        snapshot: &RemoteLockSnapshot,
    ) -> Result<ReconcileOutcome, LockError> {
        let diverges = {
            let state = self.state.lock().await;
            state.diverges_from(snapshot.is_locked)
        };

        if !diverges {
            debug!("Local state matches remote intent");
            return Ok(ReconcileOutcome::InSync);
        }

        if snapshot.is_locked {
            let reason = snapshot
                .reason
                .clone()
                .unwrap_or_else(|| DEFAULT_REMOTE_LOCK_REASON.to_string());
            let outcome = self
                .apply_lock(&reason, CommandSource::RemoteAuthority)
                .await?;
            Ok(ReconcileOutcome::Locked(outcome.lock_id()))
        } else {
            let reason = snapshot
                .reason
                .clone()
                .unwrap_or_else(|| "Unlocked by remote authority".to_string());
            match self
                .apply_unlock(&reason, CommandSource::RemoteAuthority, AttemptType::Reconcile)
                .await?
            {
                UnlockOutcome::Applied(id) => Ok(ReconcileOutcome::Unlocked(id)),
                UnlockOutcome::AlreadyUnlocked => Ok(ReconcileOutcome::InSync),
                UnlockOutcome::Rejected(UnlockRejection::LockoutActive(status)) => {
                    Ok(ReconcileOutcome::UnlockRefused(status))
                }
                UnlockOutcome::Rejected(UnlockRejection::NotRemoteAuthority(_)) => {
                    // Reconciliation always carries the remote-authority source
                    unreachable!("reconcile unlocks as the remote authority")
                }
            }
        }
    }

    // ========================================================================
    // Locally-triggered requests
    // ========================================================================

    /// Locally-triggered lock (e.g. from the integrity monitor)
    ///
    /// Enforcement is immediate - the lock is applied locally before the
    /// authority is notified. If the notification cannot be delivered the
    /// command is parked in the offline queue for replay.
    pub async fn request_lock(
        &self,
        reason: &str,
        source: CommandSource,
    ) -> Result<RequestOutcome, LockError> {
        let outcome = self.apply_lock(reason, source).await?;

        let command = ManagementCommand::lock(reason, source);
        match self.transport.send_command(&self.device_id, &command).await {
            Ok(_) => Ok(match outcome {
                LockOutcome::Applied(id) => RequestOutcome::Applied(id),
                LockOutcome::AlreadySatisfied(_) => RequestOutcome::AlreadySatisfied,
            }),
            Err(e) if e.is_connectivity() => {
                let sequence = self
                    .queue
                    .enqueue(command)
                    .await
                    .map_err(|e| LockError::Persistence(e.to_string()))?;
                info!(sequence, "Authority unreachable, lock command queued");
                Ok(RequestOutcome::Queued(sequence))
            }
            Err(e) => {
                // The lock stands locally; the authority's view converges on
                // the next heartbeat.
                warn!(error = %e, "Authority refused lock notification");
                Ok(match outcome {
                    LockOutcome::Applied(id) => RequestOutcome::Applied(id),
                    LockOutcome::AlreadySatisfied(_) => RequestOutcome::AlreadySatisfied,
                })
            }
        }
    }

    /// Locally-triggered unlock request
    ///
    /// There is no local unlock authority: the request is delivered to the
    /// remote authority, and only its acceptance applies the unlock (with
    /// remote-authority source). Offline, the command is queued.
    pub async fn request_unlock(
        &self,
        reason: &str,
        source: CommandSource,
    ) -> Result<RequestOutcome, LockError> {
        let command = ManagementCommand::unlock(reason, source);
        match self.transport.send_command(&self.device_id, &command).await {
            Ok(response) if response.success => {
                match self
                    .apply_unlock(
                        reason,
                        CommandSource::RemoteAuthority,
                        AttemptType::RemoteCommand,
                    )
                    .await?
                {
                    UnlockOutcome::Applied(id) => Ok(RequestOutcome::Applied(id)),
                    UnlockOutcome::AlreadyUnlocked => Ok(RequestOutcome::AlreadySatisfied),
                    UnlockOutcome::Rejected(UnlockRejection::LockoutActive(status)) => {
                        Ok(RequestOutcome::Rejected(format!(
                            "Lockout active for another {} seconds",
                            status.remaining.num_seconds()
                        )))
                    }
                    UnlockOutcome::Rejected(UnlockRejection::NotRemoteAuthority(_)) => {
                        unreachable!("accepted requests unlock as the remote authority")
                    }
                }
            }
            Ok(response) => Ok(RequestOutcome::Rejected(response.message)),
            Err(e) if e.is_connectivity() => {
                let sequence = self
                    .queue
                    .enqueue(command)
                    .await
                    .map_err(|e| LockError::Persistence(e.to_string()))?;
                info!(sequence, "Authority unreachable, unlock command queued");
                Ok(RequestOutcome::Queued(sequence))
            }
            Err(e) => Ok(RequestOutcome::Rejected(e.to_string())),
        }
    }

    // ========================================================================
    // Queue replay
    // ========================================================================

    /// Replays one queued command
    ///
    /// `Ok(())` means the command is finished (applied, idempotent no-op,
    /// or definitively refused by the authority) and may be removed from the
    /// queue. `Err` means the replay pass must halt with the command kept in
    /// place, preserving FIFO order for the next attempt.
    pub async fn replay_command(&self, command: &ManagementCommand) -> anyhow::Result<()> {
        match command.action() {
            CommandAction::Lock => {
                // Local enforcement first; usually an idempotent no-op by
                // the time the queue drains.
                self.apply_lock(command.reason(), command.source())
                    .await
                    .map_err(anyhow::Error::from)?;

                match self.transport.send_command(&self.device_id, command).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_connectivity() => {
                        Err(anyhow::anyhow!("Authority unreachable: {e}"))
                    }
                    Err(e) => {
                        // Definitive refusal: the local lock stands and the
                        // next reconcile resolves any disagreement.
                        warn!(error = %e, "Authority refused replayed lock command");
                        Ok(())
                    }
                }
            }
            CommandAction::Unlock => {
                match self.transport.send_command(&self.device_id, command).await {
                    Ok(response) if response.success => {
                        match self
                            .apply_unlock(
                                command.reason(),
                                CommandSource::RemoteAuthority,
                                AttemptType::QueueReplay,
                            )
                            .await
                            .map_err(anyhow::Error::from)?
                        {
                            UnlockOutcome::Applied(_) | UnlockOutcome::AlreadyUnlocked => Ok(()),
                            UnlockOutcome::Rejected(rejection) => Err(anyhow::anyhow!(
                                "Unlock replay refused: {rejection:?}"
                            )),
                        }
                    }
                    Ok(response) => {
                        warn!(message = %response.message, "Authority refused replayed unlock");
                        Ok(())
                    }
                    Err(e) if e.is_connectivity() => {
                        Err(anyhow::anyhow!("Authority unreachable: {e}"))
                    }
                    Err(e) => {
                        warn!(error = %e, "Authority rejected replayed unlock");
                        Ok(())
                    }
                }
            }
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persists the lock state with bounded retry
    ///
    /// On exhausted retries the in-memory state remains authoritative; the
    /// next transition (or daemon restart from a stale row) re-persists.
    async fn persist(&self, state: &LockState) {
        let repo = Arc::clone(&self.state_repo);
        let snapshot = state.clone();
        let result = persist_with_retry("save_lock_state", || {
            let repo = Arc::clone(&repo);
            let snapshot = snapshot.clone();
            async move { repo.save_lock_state(&snapshot).await }
        })
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Lock state persistence exhausted retries, in-memory state stays authoritative");
        }
    }
}
