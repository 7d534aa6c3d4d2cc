//! Custodia Guard - Unlock attempt tracking and lockout enforcement
//!
//! Records every unlock evaluation regardless of initiator and enforces a
//! failure-based lockout: repeated failures inside a trailing window open a
//! time-boxed suspension of unlock processing that gates even legitimate
//! remote-authority unlocks.
//!
//! The lockout window is always *derived* from persisted attempts; there is
//! no separate authoritative lockout row that could drift out of sync.

pub mod tracker;

pub use tracker::{AttemptTracker, LockoutPolicy};
