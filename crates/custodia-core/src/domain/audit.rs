//! Audit entry domain entities
//!
//! Audit entries form an append-only record spanning all enforcement
//! components. Persistence is capped per category (ring buffer); appends
//! never fail the calling operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The component area an audit entry belongs to
///
/// The cap on stored entries is enforced per category, so a noisy
/// component cannot evict another component's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Lock transitions and lock failures
    Lock,
    /// Unlock transitions, refusals, and lockout rejections
    Unlock,
    /// Integrity verification and mismatch classification
    Mismatch,
    /// Unlock attempt recording and tracker degradation
    Attempt,
    /// Heartbeat cycles, reconciliation, queue replay
    Sync,
}

impl AuditCategory {
    /// All categories, in export order
    pub const ALL: [AuditCategory; 5] = [
        AuditCategory::Lock,
        AuditCategory::Unlock,
        AuditCategory::Mismatch,
        AuditCategory::Attempt,
        AuditCategory::Sync,
    ];
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditCategory::Lock => "lock",
            AuditCategory::Unlock => "unlock",
            AuditCategory::Mismatch => "mismatch",
            AuditCategory::Attempt => "attempt",
            AuditCategory::Sync => "sync",
        };
        write!(f, "{}", s)
    }
}

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event occurred
    timestamp: DateTime<Utc>,
    /// Component area
    category: AuditCategory,
    /// Severity
    level: AuditLevel,
    /// Human-readable event description
    message: String,
    /// Additional structured details
    context: Value,
}

impl AuditEntry {
    /// Creates a new entry stamped with the current time
    pub fn new(category: AuditCategory, level: AuditLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            level,
            message: message.into(),
            context: Value::Null,
        }
    }

    /// Creates an informational entry
    pub fn info(category: AuditCategory, message: impl Into<String>) -> Self {
        Self::new(category, AuditLevel::Info, message)
    }

    /// Creates a warning entry
    pub fn warning(category: AuditCategory, message: impl Into<String>) -> Self {
        Self::new(category, AuditLevel::Warning, message)
    }

    /// Creates a critical entry
    pub fn critical(category: AuditCategory, message: impl Into<String>) -> Self {
        Self::new(category, AuditLevel::Critical, message)
    }

    /// Attaches structured context to this entry
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Reconstructs an entry from storage
    pub fn from_parts(
        timestamp: DateTime<Utc>,
        category: AuditCategory,
        level: AuditLevel,
        message: String,
        context: Value,
    ) -> Self {
        Self {
            timestamp,
            category,
            level,
            message,
            context,
        }
    }

    /// Returns when the event occurred
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the component area
    pub fn category(&self) -> AuditCategory {
        self.category
    }

    /// Returns the severity
    pub fn level(&self) -> AuditLevel {
        self.level
    }

    /// Returns the event description
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the structured context
    pub fn context(&self) -> &Value {
        &self.context
    }
}
