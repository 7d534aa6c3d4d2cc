//! Custodia Audit - Append-only enforcement audit log
//!
//! Provides:
//! - `AuditLog`: High-level service for recording audit entries across all
//!   enforcement components (LOCK, UNLOCK, MISMATCH, ATTEMPT, SYNC)
//! - Capped ring-buffer retention per category
//! - `export()` for remote submission

pub mod log;

pub use log::AuditLog;
