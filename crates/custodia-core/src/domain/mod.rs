//! Domain entities and business logic
//!
//! This module contains the core domain types for Custodia:
//! - Newtypes for type-safe identifiers and validated domain types
//! - The canonical lock state and its transitions
//! - Management commands and their queued form
//! - Unlock attempts and the derived lockout window
//! - Device identifiers, fingerprints, and mismatch classification
//! - Audit entries spanning all components
//! - Domain-specific error types

pub mod attempt;
pub mod audit;
pub mod command;
pub mod errors;
pub mod fingerprint;
pub mod lock_state;
pub mod mismatch;
pub mod newtypes;

// Re-export commonly used types
pub use attempt::{AttemptType, LockoutStatus, LockoutWindow, UnlockAttempt};
pub use audit::{AuditCategory, AuditEntry, AuditLevel};
pub use command::{CommandAction, CommandSource, ManagementCommand, QueuedCommand};
pub use errors::DomainError;
pub use fingerprint::{DeviceFingerprint, DeviceIdentifiers};
pub use lock_state::{LockState, LockTransition};
pub use mismatch::{IdentifierField, MismatchKind, MismatchRecord, MismatchSeverity};
pub use newtypes::*;
