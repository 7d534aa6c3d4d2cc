//! SQLite implementation of IStateRepository
//!
//! This module provides the concrete SQLite-based implementation of the
//! state repository port defined in custodia-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type        | SQL Type | Strategy                                   |
//! |--------------------|----------|--------------------------------------------|
//! | LockId, AttemptId  | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | DeviceId           | TEXT     | String via `.as_str()` / `DeviceId::new()` |
//! | FingerprintHash    | TEXT     | String via `.as_str()` / `FingerprintHash::new()` |
//! | DateTime<Utc>      | TEXT     | Fixed-width RFC 3339 (micros, Z)           |
//! | CommandAction etc. | TEXT     | Plain snake_case strings                   |
//! | DeviceIdentifiers  | TEXT     | serde_json serialization                   |
//! | audit context      | TEXT     | serde_json serialization                   |

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use custodia_core::domain::{
    attempt::{AttemptType, UnlockAttempt},
    audit::{AuditCategory, AuditEntry, AuditLevel},
    command::{CommandAction, CommandSource, ManagementCommand, QueuedCommand},
    fingerprint::{DeviceFingerprint, DeviceIdentifiers},
    lock_state::LockState,
    mismatch::{IdentifierField, MismatchKind, MismatchRecord, MismatchSeverity},
    newtypes::{AttemptId, DeviceId, FingerprintHash, LockId},
};
use custodia_core::ports::IStateRepository;

use crate::StoreError;

/// SQLite-based implementation of the state repository port
///
/// Provides persistent storage for all enforcement state using SQLite.
/// All operations are performed through a connection pool for concurrency.
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Render a timestamp as fixed-width RFC 3339 UTC text
///
/// Microsecond precision with a Z suffix keeps the column width constant,
/// so lexicographic comparison in SQL matches time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a DateTime<Utc> from an RFC 3339 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn command_action_to_string(action: CommandAction) -> &'static str {
    match action {
        CommandAction::Lock => "lock",
        CommandAction::Unlock => "unlock",
    }
}

fn command_action_from_string(s: &str) -> Result<CommandAction, StoreError> {
    match s {
        "lock" => Ok(CommandAction::Lock),
        "unlock" => Ok(CommandAction::Unlock),
        other => Err(StoreError::SerializationError(format!(
            "Unknown command action: {}",
            other
        ))),
    }
}

fn command_source_to_string(source: CommandSource) -> &'static str {
    match source {
        CommandSource::RemoteAuthority => "remote_authority",
        CommandSource::IntegrityMonitor => "integrity_monitor",
        CommandSource::Operator => "operator",
    }
}

fn command_source_from_string(s: &str) -> Result<CommandSource, StoreError> {
    match s {
        "remote_authority" => Ok(CommandSource::RemoteAuthority),
        "integrity_monitor" => Ok(CommandSource::IntegrityMonitor),
        "operator" => Ok(CommandSource::Operator),
        other => Err(StoreError::SerializationError(format!(
            "Unknown command source: {}",
            other
        ))),
    }
}

fn attempt_type_to_string(attempt_type: AttemptType) -> &'static str {
    match attempt_type {
        AttemptType::RemoteCommand => "remote_command",
        AttemptType::Reconcile => "reconcile",
        AttemptType::QueueReplay => "queue_replay",
    }
}

fn attempt_type_from_string(s: &str) -> Result<AttemptType, StoreError> {
    match s {
        "remote_command" => Ok(AttemptType::RemoteCommand),
        "reconcile" => Ok(AttemptType::Reconcile),
        "queue_replay" => Ok(AttemptType::QueueReplay),
        other => Err(StoreError::SerializationError(format!(
            "Unknown attempt type: {}",
            other
        ))),
    }
}

fn category_to_string(category: AuditCategory) -> &'static str {
    match category {
        AuditCategory::Lock => "lock",
        AuditCategory::Unlock => "unlock",
        AuditCategory::Mismatch => "mismatch",
        AuditCategory::Attempt => "attempt",
        AuditCategory::Sync => "sync",
    }
}

fn category_from_string(s: &str) -> Result<AuditCategory, StoreError> {
    match s {
        "lock" => Ok(AuditCategory::Lock),
        "unlock" => Ok(AuditCategory::Unlock),
        "mismatch" => Ok(AuditCategory::Mismatch),
        "attempt" => Ok(AuditCategory::Attempt),
        "sync" => Ok(AuditCategory::Sync),
        other => Err(StoreError::SerializationError(format!(
            "Unknown audit category: {}",
            other
        ))),
    }
}

fn level_to_string(level: AuditLevel) -> &'static str {
    match level {
        AuditLevel::Info => "info",
        AuditLevel::Warning => "warning",
        AuditLevel::Critical => "critical",
    }
}

fn level_from_string(s: &str) -> Result<AuditLevel, StoreError> {
    match s {
        "info" => Ok(AuditLevel::Info),
        "warning" => Ok(AuditLevel::Warning),
        "critical" => Ok(AuditLevel::Critical),
        other => Err(StoreError::SerializationError(format!(
            "Unknown audit level: {}",
            other
        ))),
    }
}

fn kind_to_string(kind: MismatchKind) -> &'static str {
    match kind {
        MismatchKind::Drift => "drift",
        MismatchKind::DeviceSwap => "device_swap",
        MismatchKind::DeviceClone => "device_clone",
    }
}

fn kind_from_string(s: &str) -> Result<MismatchKind, StoreError> {
    match s {
        "drift" => Ok(MismatchKind::Drift),
        "device_swap" => Ok(MismatchKind::DeviceSwap),
        "device_clone" => Ok(MismatchKind::DeviceClone),
        other => Err(StoreError::SerializationError(format!(
            "Unknown mismatch kind: {}",
            other
        ))),
    }
}

fn severity_to_string(severity: MismatchSeverity) -> &'static str {
    match severity {
        MismatchSeverity::Low => "low",
        MismatchSeverity::Medium => "medium",
        MismatchSeverity::High => "high",
        MismatchSeverity::Critical => "critical",
    }
}

fn severity_from_string(s: &str) -> Result<MismatchSeverity, StoreError> {
    match s {
        "low" => Ok(MismatchSeverity::Low),
        "medium" => Ok(MismatchSeverity::Medium),
        "high" => Ok(MismatchSeverity::High),
        "critical" => Ok(MismatchSeverity::Critical),
        other => Err(StoreError::SerializationError(format!(
            "Unknown mismatch severity: {}",
            other
        ))),
    }
}

fn field_to_string(field: IdentifierField) -> String {
    field.to_string()
}

fn field_from_string(s: &str) -> Result<IdentifierField, StoreError> {
    match s {
        "serial_number" => Ok(IdentifierField::SerialNumber),
        "hardware_id" => Ok(IdentifierField::HardwareId),
        "os_build" => Ok(IdentifierField::OsBuild),
        "sim_identifiers" => Ok(IdentifierField::SimIdentifiers),
        "installed_memory" => Ok(IdentifierField::InstalledMemory),
        "rooted" => Ok(IdentifierField::Rooted),
        "usb_debugging" => Ok(IdentifierField::UsbDebugging),
        "developer_mode" => Ok(IdentifierField::DeveloperMode),
        "bootloader_unlocked" => Ok(IdentifierField::BootloaderUnlocked),
        "custom_rom" => Ok(IdentifierField::CustomRom),
        other => Err(StoreError::SerializationError(format!(
            "Unknown identifier field: {}",
            other
        ))),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a LockState from a database row
///
/// Uses serde JSON deserialization to reconstruct the LockState since
/// the struct has private fields that can only be set through its
/// transitions or deserialization.
fn lock_state_from_row(row: &SqliteRow) -> Result<LockState, StoreError> {
    let is_locked: i64 = row.get("is_locked");
    let reason: Option<String> = row.get("reason");
    let lock_id: Option<String> = row.get("lock_id");
    let locked_at: Option<String> = row.get("locked_at");
    let unlocked_at: Option<String> = row.get("unlocked_at");

    let value = serde_json::json!({
        "is_locked": is_locked != 0,
        "reason": reason,
        "lock_id": lock_id,
        "locked_at": parse_optional_datetime(locked_at)?,
        "unlocked_at": parse_optional_datetime(unlocked_at)?,
    });

    serde_json::from_value(value).map_err(|e| {
        StoreError::SerializationError(format!("Failed to reconstruct lock state: {}", e))
    })
}

fn queued_command_from_row(row: &SqliteRow) -> Result<QueuedCommand, StoreError> {
    let sequence: i64 = row.get("sequence");
    let action: String = row.get("action");
    let reason: String = row.get("reason");
    let issued_at: String = row.get("issued_at");
    let source: String = row.get("source");

    let command = ManagementCommand::from_parts(
        command_action_from_string(&action)?,
        reason,
        parse_datetime(&issued_at)?,
        command_source_from_string(&source)?,
    );
    Ok(QueuedCommand::new(sequence as u64, command))
}

fn attempt_from_row(row: &SqliteRow) -> Result<UnlockAttempt, StoreError> {
    let id: String = row.get("id");
    let lock_id: String = row.get("lock_id");
    let device_id: String = row.get("device_id");
    let timestamp: String = row.get("timestamp");
    let attempt_type: String = row.get("attempt_type");
    let success: i64 = row.get("success");
    let reason: String = row.get("reason");

    Ok(UnlockAttempt::from_parts(
        AttemptId::from_str(&id)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        LockId::from_str(&lock_id)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        DeviceId::new(device_id).map_err(|e| StoreError::SerializationError(e.to_string()))?,
        parse_datetime(&timestamp)?,
        attempt_type_from_string(&attempt_type)?,
        success != 0,
        reason,
    ))
}

fn mismatch_from_row(row: &SqliteRow) -> Result<MismatchRecord, StoreError> {
    let kind: String = row.get("kind");
    let severity: String = row.get("severity");
    let field: String = row.get("field");
    let stored_value: String = row.get("stored_value");
    let current_value: String = row.get("current_value");
    let timestamp: String = row.get("timestamp");

    Ok(MismatchRecord::from_parts(
        kind_from_string(&kind)?,
        severity_from_string(&severity)?,
        field_from_string(&field)?,
        stored_value,
        current_value,
        parse_datetime(&timestamp)?,
    ))
}

fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditEntry, StoreError> {
    let timestamp: String = row.get("timestamp");
    let category: String = row.get("category");
    let level: String = row.get("level");
    let message: String = row.get("message");
    let context: String = row.get("context");

    let context_value = serde_json::from_str(&context).map_err(|e| {
        StoreError::SerializationError(format!("Failed to parse audit context: {}", e))
    })?;

    Ok(AuditEntry::from_parts(
        parse_datetime(&timestamp)?,
        category_from_string(&category)?,
        level_from_string(&level)?,
        message,
        context_value,
    ))
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    // --- Lock state ---

    async fn save_lock_state(&self, state: &LockState) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lock_state (id, is_locked, reason, lock_id, locked_at, unlocked_at)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                is_locked = excluded.is_locked,
                reason = excluded.reason,
                lock_id = excluded.lock_id,
                locked_at = excluded.locked_at,
                unlocked_at = excluded.unlocked_at
            "#,
        )
        .bind(state.is_locked() as i64)
        .bind(state.reason())
        .bind(state.lock_id().map(|id| id.to_string()))
        .bind(state.locked_at().map(format_datetime))
        .bind(state.unlocked_at().map(format_datetime))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_lock_state(&self) -> anyhow::Result<Option<LockState>> {
        let row = sqlx::query("SELECT * FROM lock_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(lock_state_from_row(&row)?)),
            None => Ok(None),
        }
    }

    // --- Offline command queue ---

    async fn enqueue_command(&self, command: &ManagementCommand) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO command_queue (action, reason, issued_at, source)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(command_action_to_string(command.action()))
        .bind(command.reason())
        .bind(format_datetime(command.issued_at()))
        .bind(command_source_to_string(command.source()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid() as u64)
    }

    async fn replace_command(
        &self,
        sequence: u64,
        command: &ManagementCommand,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE command_queue
            SET action = ?, reason = ?, issued_at = ?, source = ?
            WHERE sequence = ?
            "#,
        )
        .bind(command_action_to_string(command.action()))
        .bind(command.reason())
        .bind(format_datetime(command.issued_at()))
        .bind(command_source_to_string(command.source()))
        .bind(sequence as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_commands(&self) -> anyhow::Result<Vec<QueuedCommand>> {
        let rows = sqlx::query("SELECT * FROM command_queue ORDER BY sequence ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| queued_command_from_row(row).map_err(anyhow::Error::from))
            .collect()
    }

    async fn last_command(&self) -> anyhow::Result<Option<QueuedCommand>> {
        let row = sqlx::query("SELECT * FROM command_queue ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(queued_command_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn remove_command(&self, sequence: u64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM command_queue WHERE sequence = ?")
            .bind(sequence as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_commands(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM command_queue")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Unlock attempts ---

    async fn save_attempt(&self, attempt: &UnlockAttempt) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO unlock_attempts
                (id, lock_id, device_id, timestamp, attempt_type, success, reason)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.id().to_string())
        .bind(attempt.lock_id().to_string())
        .bind(attempt.device_id().as_str())
        .bind(format_datetime(attempt.timestamp()))
        .bind(attempt_type_to_string(attempt.attempt_type()))
        .bind(attempt.success() as i64)
        .bind(attempt.reason())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempts_for_lock_since(
        &self,
        lock_id: &LockId,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<UnlockAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM unlock_attempts
            WHERE lock_id = ? AND timestamp >= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(lock_id.to_string())
        .bind(format_datetime(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| attempt_from_row(row).map_err(anyhow::Error::from))
            .collect()
    }

    async fn purge_attempts_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM unlock_attempts WHERE timestamp < ?")
            .bind(format_datetime(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // --- Fingerprint baseline ---

    async fn save_baseline(
        &self,
        identifiers: &DeviceIdentifiers,
        fingerprint: &DeviceFingerprint,
    ) -> anyhow::Result<()> {
        let identifiers_json = serde_json::to_string(identifiers)?;
        sqlx::query(
            r#"
            INSERT INTO fingerprint_baseline (id, identifiers, hash, collected_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                identifiers = excluded.identifiers,
                hash = excluded.hash,
                collected_at = excluded.collected_at
            "#,
        )
        .bind(identifiers_json)
        .bind(fingerprint.hash().as_str())
        .bind(format_datetime(fingerprint.collected_at()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_baseline(
        &self,
    ) -> anyhow::Result<Option<(DeviceIdentifiers, DeviceFingerprint)>> {
        let row = sqlx::query("SELECT * FROM fingerprint_baseline WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let identifiers_json: String = row.get("identifiers");
        let hash: String = row.get("hash");
        let collected_at: String = row.get("collected_at");

        let identifiers: DeviceIdentifiers = serde_json::from_str(&identifiers_json)
            .map_err(|e| {
                StoreError::SerializationError(format!("Failed to parse baseline: {}", e))
            })?;
        let fingerprint = DeviceFingerprint::from_parts(
            FingerprintHash::new(hash).map_err(|e| {
                StoreError::SerializationError(format!("Invalid stored fingerprint: {}", e))
            })?,
            parse_datetime(&collected_at)?,
        );

        Ok(Some((identifiers, fingerprint)))
    }

    // --- Wipe eligibility flag ---

    async fn mark_wipe_eligible(&self, reason: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_flags (name, value, updated_at)
            VALUES ('wipe_eligible', ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(reason)
        .bind(format_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn wipe_eligible_reason(&self) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM agent_flags WHERE name = 'wipe_eligible'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    // --- Mismatch records ---

    async fn save_mismatch(&self, record: &MismatchRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mismatch_records
                (kind, severity, field, stored_value, current_value, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind_to_string(record.kind()))
        .bind(severity_to_string(record.severity()))
        .bind(field_to_string(record.field()))
        .bind(record.stored_value())
        .bind(record.current_value())
        .bind(format_datetime(record.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_mismatches(&self, limit: u32) -> anyhow::Result<Vec<MismatchRecord>> {
        let rows = sqlx::query("SELECT * FROM mismatch_records ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| mismatch_from_row(row).map_err(anyhow::Error::from))
            .collect()
    }

    async fn prune_mismatches(&self, cap: u32) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            DELETE FROM mismatch_records
            WHERE id NOT IN (
                SELECT id FROM mismatch_records ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(cap as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Audit entries ---

    async fn append_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let context = serde_json::to_string(entry.context())?;
        sqlx::query(
            r#"
            INSERT INTO audit_log (timestamp, category, level, message, context)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_datetime(entry.timestamp()))
        .bind(category_to_string(entry.category()))
        .bind(level_to_string(entry.level()))
        .bind(entry.message())
        .bind(context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_entries(
        &self,
        category: Option<AuditCategory>,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = match category {
            Some(category) => {
                sqlx::query(
                    "SELECT * FROM audit_log WHERE category = ? ORDER BY id ASC LIMIT ?",
                )
                .bind(category_to_string(category))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM audit_log ORDER BY id ASC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(|row| audit_entry_from_row(row).map_err(anyhow::Error::from))
            .collect()
    }

    async fn prune_audit(&self, category: AuditCategory, cap: u32) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            DELETE FROM audit_log
            WHERE category = ? AND id NOT IN (
                SELECT id FROM audit_log WHERE category = ? ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(category_to_string(category))
        .bind(category_to_string(category))
        .bind(cap as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
