//! Custodia Integrity - Device swap/clone/tamper detection
//!
//! Computes a fingerprint over a fixed set of stable device identifiers,
//! compares every check against the stored baseline, classifies drift
//! severity, and translates the classification into enforcement actions
//! through the Lock State Synchronizer.
//!
//! Classification is count-based with one special pattern: a matching
//! fingerprint over drifted identifiers means the fingerprint inputs are
//! being spoofed - a device clone - and is always critical.

pub mod compare;
pub mod fingerprint;
pub mod monitor;

pub use compare::{ComparisonReport, FieldDrift};
pub use fingerprint::compute_fingerprint;
pub use monitor::{IntegrityMonitor, MismatchSummary, VerificationOutcome};
