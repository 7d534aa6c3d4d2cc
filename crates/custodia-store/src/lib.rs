//! Custodia Store - Local state persistence
//!
//! SQLite-based store for:
//! - The canonical lock state
//! - The offline command queue
//! - Unlock attempt records
//! - The fingerprint baseline and wipe-eligibility flag
//! - Mismatch records and audit entries
//!
//! ## Architecture
//!
//! This crate implements the `IStateRepository` port from `custodia-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteStateRepository`] - Full `IStateRepository` implementation
//! - [`StoreError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use custodia_store::{DatabasePool, SqliteStateRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/custodia/custodia.db")).await?;
//! let repo = SqliteStateRepository::new(pool.pool().clone());
//! // Use repo as IStateRepository...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateRepository;

use thiserror::Error;

/// Errors from the SQLite store adapter
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open or connect to the database
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be converted to its domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A query failed at the SQLite layer
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
}
