//! Management command domain entities
//!
//! A [`ManagementCommand`] expresses a single lock or unlock intent. When
//! the remote authority is unreachable, commands are parked in the Offline
//! Command Queue as [`QueuedCommand`]s and replayed in FIFO order once
//! connectivity returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The action a management command requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    /// Transition the device to LOCKED
    Lock,
    /// Transition the device to UNLOCKED
    Unlock,
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAction::Lock => write!(f, "lock"),
            CommandAction::Unlock => write!(f, "unlock"),
        }
    }
}

/// Who initiated a lock or unlock operation
///
/// Unlocks are honored only for [`CommandSource::RemoteAuthority`]; there
/// is no local unlock path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    /// The backend declared this intent (heartbeat reconciliation or a
    /// direct management command)
    RemoteAuthority,
    /// The device integrity monitor requested enforcement
    IntegrityMonitor,
    /// A local operator action (one-shot daemon command)
    Operator,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSource::RemoteAuthority => write!(f, "remote_authority"),
            CommandSource::IntegrityMonitor => write!(f, "integrity_monitor"),
            CommandSource::Operator => write!(f, "operator"),
        }
    }
}

/// A single lock/unlock intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementCommand {
    /// The requested transition
    action: CommandAction,
    /// Categorized reason carried through to the lock screen and audit log
    reason: String,
    /// When the command was issued
    issued_at: DateTime<Utc>,
    /// Who issued the command
    source: CommandSource,
}

impl ManagementCommand {
    /// Creates a new command
    pub fn new(action: CommandAction, reason: impl Into<String>, source: CommandSource) -> Self {
        Self {
            action,
            reason: reason.into(),
            issued_at: Utc::now(),
            source,
        }
    }

    /// Creates a lock command
    pub fn lock(reason: impl Into<String>, source: CommandSource) -> Self {
        Self::new(CommandAction::Lock, reason, source)
    }

    /// Creates an unlock command
    pub fn unlock(reason: impl Into<String>, source: CommandSource) -> Self {
        Self::new(CommandAction::Unlock, reason, source)
    }

    /// Reconstructs a command from storage
    pub fn from_parts(
        action: CommandAction,
        reason: String,
        issued_at: DateTime<Utc>,
        source: CommandSource,
    ) -> Self {
        Self {
            action,
            reason,
            issued_at,
            source,
        }
    }

    /// Returns the requested action
    pub fn action(&self) -> CommandAction {
        self.action
    }

    /// Returns the reason string
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns when the command was issued
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Returns who issued the command
    pub fn source(&self) -> CommandSource {
        self.source
    }

    /// Returns true if `other` requests the same action for the same reason
    ///
    /// Used by the queue to collapse back-to-back duplicates so a flapping
    /// trigger cannot grow the queue unboundedly.
    pub fn duplicates(&self, other: &ManagementCommand) -> bool {
        self.action == other.action && self.reason == other.reason
    }
}

/// A command persisted in the Offline Command Queue
///
/// The sequence number is assigned by storage and is strictly monotonic;
/// replay order is ascending sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    /// Storage-assigned monotonic position in the queue
    sequence: u64,
    /// The parked command
    command: ManagementCommand,
}

impl QueuedCommand {
    /// Creates a queued command from its storage row
    pub fn new(sequence: u64, command: ManagementCommand) -> Self {
        Self { sequence, command }
    }

    /// Returns the queue sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the parked command
    pub fn command(&self) -> &ManagementCommand {
        &self.command
    }
}
