//! LockState domain entity
//!
//! This module defines the canonical lock state for the managed device.
//! There is exactly one `LockState` per device, and it is mutated only by
//! the Lock State Synchronizer.
//!
//! ## State Machine
//!
//! ```text
//!     ┌────────────┐     lock(reason)      ┌────────────┐
//!     │  UNLOCKED  │ ────────────────────► │   LOCKED   │
//!     │            │                       │ (lock_id)  │
//!     └────────────┘ ◄──────────────────── └────────────┘
//!                      unlock(reason)
//!                   (remote authority only)
//! ```
//!
//! Each UNLOCKED→LOCKED transition assigns a fresh [`LockId`] that names the
//! lock episode. The id is retained after unlock so attempts and audit
//! entries recorded during the episode stay linked to it; it is replaced by
//! the next lock. Re-locking an already locked device refreshes the reason
//! but never mints a new id (idempotent replay).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::LockId;

/// Result of driving a lock or unlock transition on [`LockState`]
///
/// `AlreadyLocked` / `AlreadyUnlocked` mark idempotent no-ops: the state
/// was already satisfying the request, so no new episode was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTransition {
    /// The device transitioned to LOCKED under a fresh lock episode
    Locked(LockId),
    /// The device was already locked; the reason may have been refreshed
    AlreadyLocked(LockId),
    /// The device transitioned to UNLOCKED, ending the given episode
    Unlocked(LockId),
    /// The device was already unlocked
    AlreadyUnlocked,
}

impl LockTransition {
    /// Returns true if the transition actually changed the state
    pub fn changed(&self) -> bool {
        matches!(self, LockTransition::Locked(_) | LockTransition::Unlocked(_))
    }
}

/// Canonical lock state of the managed device
///
/// Invariants:
/// - `lock_id` is `Some` from the first lock onward; it identifies the most
///   recent lock episode even after the device is unlocked again.
/// - `reason` is `Some` exactly while the device is locked.
/// - Only the Synchronizer mutates this type; everything else reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    /// Whether the device is currently locked
    is_locked: bool,
    /// Categorized reason shown on the lock screen (None when unlocked)
    reason: Option<String>,
    /// Identifier of the current (or most recent) lock episode
    lock_id: Option<LockId>,
    /// When the current episode started
    locked_at: Option<DateTime<Utc>>,
    /// When the device was last unlocked
    unlocked_at: Option<DateTime<Utc>>,
}

impl LockState {
    /// Creates the initial, unlocked state for a freshly enrolled device
    pub fn unlocked() -> Self {
        Self {
            is_locked: false,
            reason: None,
            lock_id: None,
            locked_at: None,
            unlocked_at: None,
        }
    }

    // --- Getters ---

    /// Returns true if the device is locked
    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    /// Returns the lock reason, if locked
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns the current (or most recent) lock episode id
    pub fn lock_id(&self) -> Option<LockId> {
        self.lock_id
    }

    /// Returns when the current episode started
    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        self.locked_at
    }

    /// Returns when the device was last unlocked
    pub fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        self.unlocked_at
    }

    /// Returns true if the local state diverges from the remote intent
    pub fn diverges_from(&self, remote_is_locked: bool) -> bool {
        self.is_locked != remote_is_locked
    }

    // --- Transitions ---

    /// Drives the UNLOCKED→LOCKED transition
    ///
    /// Assigns a fresh [`LockId`] and stamps `locked_at`. If the device is
    /// already locked the reason is refreshed in place and the existing
    /// episode id is returned - replaying a lock never starts a new episode.
    pub fn lock(&mut self, reason: impl Into<String>) -> LockTransition {
        let reason = reason.into();
        if self.is_locked {
            // Idempotent: refresh the displayed reason only.
            self.reason = Some(reason);
            // is_locked implies lock_id is Some; unwrap_or_else guards the
            // impossible case without panicking in production.
            let id = self.lock_id.unwrap_or_else(LockId::new);
            self.lock_id = Some(id);
            return LockTransition::AlreadyLocked(id);
        }

        let id = LockId::new();
        self.is_locked = true;
        self.reason = Some(reason);
        self.lock_id = Some(id);
        self.locked_at = Some(Utc::now());
        LockTransition::Locked(id)
    }

    /// Drives the LOCKED→UNLOCKED transition
    ///
    /// The episode id is retained for audit linkage. Unlocking an already
    /// unlocked device is a no-op.
    pub fn unlock(&mut self) -> LockTransition {
        if !self.is_locked {
            return LockTransition::AlreadyUnlocked;
        }

        self.is_locked = false;
        self.reason = None;
        self.unlocked_at = Some(Utc::now());
        match self.lock_id {
            Some(id) => LockTransition::Unlocked(id),
            None => LockTransition::AlreadyUnlocked,
        }
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::unlocked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_unlocked() {
        let state = LockState::unlocked();
        assert!(!state.is_locked());
        assert!(state.reason().is_none());
        assert!(state.lock_id().is_none());
        assert!(state.locked_at().is_none());
    }

    #[test]
    fn test_lock_assigns_fresh_id() {
        let mut state = LockState::unlocked();

        let transition = state.lock("Payment overdue");
        let id = match transition {
            LockTransition::Locked(id) => id,
            other => panic!("Expected Locked, got {other:?}"),
        };

        assert!(state.is_locked());
        assert_eq!(state.reason(), Some("Payment overdue"));
        assert_eq!(state.lock_id(), Some(id));
        assert!(state.locked_at().is_some());
    }

    #[test]
    fn test_lock_is_idempotent() {
        let mut state = LockState::unlocked();
        let first = state.lock("Payment overdue");
        let second = state.lock("Payment still overdue");

        let first_id = match first {
            LockTransition::Locked(id) => id,
            other => panic!("Expected Locked, got {other:?}"),
        };
        // Same episode, refreshed reason, no new id
        assert_eq!(second, LockTransition::AlreadyLocked(first_id));
        assert_eq!(state.reason(), Some("Payment still overdue"));
        assert_eq!(state.lock_id(), Some(first_id));
        assert!(!second.changed());
    }

    #[test]
    fn test_unlock_retains_episode_id() {
        let mut state = LockState::unlocked();
        let id = match state.lock("Tamper detected") {
            LockTransition::Locked(id) => id,
            other => panic!("Expected Locked, got {other:?}"),
        };

        let transition = state.unlock();
        assert_eq!(transition, LockTransition::Unlocked(id));
        assert!(!state.is_locked());
        assert!(state.reason().is_none());
        // Retained for audit linkage
        assert_eq!(state.lock_id(), Some(id));
        assert!(state.unlocked_at().is_some());
    }

    #[test]
    fn test_unlock_when_unlocked_is_noop() {
        let mut state = LockState::unlocked();
        assert_eq!(state.unlock(), LockTransition::AlreadyUnlocked);
    }

    #[test]
    fn test_relock_starts_new_episode() {
        let mut state = LockState::unlocked();
        let first = match state.lock("a") {
            LockTransition::Locked(id) => id,
            other => panic!("Expected Locked, got {other:?}"),
        };
        state.unlock();
        let second = match state.lock("b") {
            LockTransition::Locked(id) => id,
            other => panic!("Expected Locked, got {other:?}"),
        };

        assert_ne!(first, second);
    }

    #[test]
    fn test_diverges_from() {
        let mut state = LockState::unlocked();
        assert!(state.diverges_from(true));
        assert!(!state.diverges_from(false));

        state.lock("x");
        assert!(!state.diverges_from(true));
        assert!(state.diverges_from(false));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut state = LockState::unlocked();
        state.lock("Payment overdue");

        let json = serde_json::to_string(&state).unwrap();
        let restored: LockState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.is_locked(), state.is_locked());
        assert_eq!(restored.reason(), state.reason());
        assert_eq!(restored.lock_id(), state.lock_id());
    }
}
