//! Offline Command Queue
//!
//! A durable FIFO for management commands that could not reach the remote
//! authority. Sequence numbers are storage-assigned and strictly monotonic;
//! replay is strictly in order and halts at the first failure so ordering
//! is preserved for the next attempt.
//!
//! Back-to-back duplicates (same action and reason as the current tail)
//! collapse to the latest entry only, so a flapping trigger cannot grow the
//! queue while the device is offline.

use std::sync::Arc;

use tracing::{debug, info, warn};

use custodia_audit::AuditLog;
use custodia_core::domain::command::ManagementCommand;
use custodia_core::ports::IStateRepository;

use crate::synchronizer::LockSynchronizer;

/// Summary of one replay pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayResult {
    /// Commands applied and removed in this pass
    pub applied: usize,
    /// Whether the pass halted on a failure, leaving commands queued
    pub halted: bool,
}

/// Durable FIFO of commands awaiting connectivity
///
/// The queue holds no reference to the synchronizer; `apply_all` borrows it
/// per pass, which keeps the dependency graph acyclic.
pub struct OfflineCommandQueue {
    state_repo: Arc<dyn IStateRepository>,
    audit: Arc<AuditLog>,
}

impl OfflineCommandQueue {
    /// Creates a queue over the given repository
    pub fn new(state_repo: Arc<dyn IStateRepository>, audit: Arc<AuditLog>) -> Self {
        Self { state_repo, audit }
    }

    /// Parks a command, returning its sequence number
    ///
    /// If the command duplicates the current tail (same action, same
    /// reason) the tail is replaced in place instead of growing the queue.
    pub async fn enqueue(&self, command: ManagementCommand) -> anyhow::Result<u64> {
        if let Some(tail) = self.state_repo.last_command().await? {
            if tail.command().duplicates(&command) {
                self.state_repo
                    .replace_command(tail.sequence(), &command)
                    .await?;
                debug!(
                    sequence = tail.sequence(),
                    action = %command.action(),
                    "Collapsed duplicate queued command"
                );
                return Ok(tail.sequence());
            }
        }

        let sequence = self.state_repo.enqueue_command(&command).await?;
        self.audit
            .command_queued(
                &command.action().to_string(),
                command.reason(),
                sequence,
            )
            .await;
        info!(sequence, action = %command.action(), "Command queued");
        Ok(sequence)
    }

    /// Number of commands currently queued
    pub async fn depth(&self) -> anyhow::Result<usize> {
        Ok(self.state_repo.list_commands().await?.len())
    }

    /// Replays all queued commands strictly in FIFO order
    ///
    /// Each command is driven through the Synchronizer and removed on
    /// success. The pass **halts on the first failure**, preserving order
    /// for the next connectivity-restored signal rather than skipping
    /// ahead.
    pub async fn apply_all(&self, synchronizer: &LockSynchronizer) -> anyhow::Result<ReplayResult> {
        let commands = self.state_repo.list_commands().await?;
        if commands.is_empty() {
            return Ok(ReplayResult {
                applied: 0,
                halted: false,
            });
        }

        info!(pending = commands.len(), "Replaying offline command queue");

        let mut applied = 0;
        let mut halted = false;
        for queued in commands {
            match synchronizer.replay_command(queued.command()).await {
                Ok(()) => {
                    self.state_repo.remove_command(queued.sequence()).await?;
                    applied += 1;
                }
                Err(e) => {
                    warn!(
                        sequence = queued.sequence(),
                        error = %e,
                        "Queue replay halted"
                    );
                    halted = true;
                    break;
                }
            }
        }

        self.audit.queue_replayed(applied, halted).await;
        Ok(ReplayResult { applied, halted })
    }

    /// Administrative reset: drops every queued command
    pub async fn clear(&self) -> anyhow::Result<()> {
        self.state_repo.clear_commands().await?;
        info!("Offline command queue cleared");
        Ok(())
    }
}
