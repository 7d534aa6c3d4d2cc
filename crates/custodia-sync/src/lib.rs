//! Custodia Sync - Lock state synchronization engine
//!
//! The enforcement brain of the agent:
//! - [`LockSynchronizer`] - sole writer of the canonical lock state;
//!   applies lock/unlock transitions, reconciles against remote intent,
//!   and routes locally-triggered requests through the offline queue when
//!   the authority is unreachable
//! - [`OfflineCommandQueue`] - durable FIFO replayed on reconnect
//! - [`HeartbeatScheduler`] - the periodic task that is the sole channel
//!   for remote-initiated transitions

pub mod queue;
pub mod scheduler;
pub mod synchronizer;

pub use queue::{OfflineCommandQueue, ReplayResult};
pub use scheduler::HeartbeatScheduler;
pub use synchronizer::{
    AgentStatus, LockError, LockOutcome, ReconcileOutcome, RequestOutcome, UnlockOutcome,
    UnlockRejection, LockSynchronizer,
};
