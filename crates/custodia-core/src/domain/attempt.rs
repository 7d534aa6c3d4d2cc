//! Unlock attempt and lockout domain entities
//!
//! Every unlock evaluation - whatever its initiator - is recorded as an
//! immutable [`UnlockAttempt`]. The [`LockoutWindow`] is *derived* from
//! recent attempts on demand and is never independently authoritative:
//! failures are counted inside a trailing window, and a successful unlock
//! resets the count because counting starts after the most recent success.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::newtypes::{AttemptId, DeviceId, LockId};

/// How an unlock evaluation was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptType {
    /// A direct management command from the remote authority
    RemoteCommand,
    /// Heartbeat reconciliation observed a remote unlocked intent
    Reconcile,
    /// Replay of a queued command after connectivity returned
    QueueReplay,
}

impl fmt::Display for AttemptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptType::RemoteCommand => write!(f, "remote_command"),
            AttemptType::Reconcile => write!(f, "reconcile"),
            AttemptType::QueueReplay => write!(f, "queue_replay"),
        }
    }
}

/// An immutable record of one unlock evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockAttempt {
    /// Unique identifier for this record
    id: AttemptId,
    /// The lock episode the attempt targeted
    lock_id: LockId,
    /// The device the attempt was evaluated on
    device_id: DeviceId,
    /// When the attempt was evaluated
    timestamp: DateTime<Utc>,
    /// How the attempt was initiated
    attempt_type: AttemptType,
    /// Whether the unlock was honored
    success: bool,
    /// Reason carried by the unlock request
    reason: String,
}

impl UnlockAttempt {
    /// Creates a new attempt record stamped with the current time
    pub fn new(
        lock_id: LockId,
        device_id: DeviceId,
        attempt_type: AttemptType,
        success: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            lock_id,
            device_id,
            timestamp: Utc::now(),
            attempt_type,
            success,
            reason: reason.into(),
        }
    }

    /// Reconstructs an attempt from storage
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: AttemptId,
        lock_id: LockId,
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
        attempt_type: AttemptType,
        success: bool,
        reason: String,
    ) -> Self {
        Self {
            id,
            lock_id,
            device_id,
            timestamp,
            attempt_type,
            success,
            reason,
        }
    }

    /// Returns the record id
    pub fn id(&self) -> AttemptId {
        self.id
    }

    /// Returns the targeted lock episode
    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    /// Returns the device id
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Returns when the attempt was evaluated
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns how the attempt was initiated
    pub fn attempt_type(&self) -> AttemptType {
        self.attempt_type
    }

    /// Returns whether the unlock was honored
    pub fn success(&self) -> bool {
        self.success
    }

    /// Returns the reason carried by the request
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A time-boxed suspension of unlock processing, derived from attempts
///
/// Opened when the failure count inside the trailing window reaches the
/// configured threshold. The window starts at the breaching attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockoutWindow {
    /// When the breaching failure was recorded
    started_at: DateTime<Utc>,
    /// When unlock processing resumes
    expires_at: DateTime<Utc>,
    /// Failures observed inside the trailing window at derivation time
    failure_count: u32,
}

impl LockoutWindow {
    /// Creates a window starting at the breaching attempt
    pub fn new(started_at: DateTime<Utc>, duration: Duration, failure_count: u32) -> Self {
        Self {
            started_at,
            expires_at: started_at + duration,
            failure_count,
        }
    }

    /// Returns when the window opened
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the window expires
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the failure count the window was derived from
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Returns true if the window still covers `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Remaining cooldown at `now` (zero when expired)
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.expires_at - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }
}

/// Answer to a lockout query, consumed by the Synchronizer before any unlock
#[derive(Debug, Clone, PartialEq)]
pub struct LockoutStatus {
    /// Whether unlock processing is currently suspended
    pub is_locked_out: bool,
    /// Remaining cooldown (zero when not locked out)
    pub remaining: Duration,
    /// Failures counted in the trailing window
    pub failed_attempts: u32,
    /// Configured failure threshold
    pub max_attempts: u32,
}

impl LockoutStatus {
    /// Status for a lock episode with no active lockout
    pub fn clear(failed_attempts: u32, max_attempts: u32) -> Self {
        Self {
            is_locked_out: false,
            remaining: Duration::zero(),
            failed_attempts,
            max_attempts,
        }
    }

    /// Status derived from an active window at `now`
    pub fn from_window(window: &LockoutWindow, now: DateTime<Utc>, max_attempts: u32) -> Self {
        Self {
            is_locked_out: window.is_active_at(now),
            remaining: window.remaining_at(now),
            failed_attempts: window.failure_count(),
            max_attempts,
        }
    }
}
