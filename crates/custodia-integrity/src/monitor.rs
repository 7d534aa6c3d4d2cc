//! Integrity monitor - baseline management, classification, response policy
//!
//! The [`IntegrityMonitor`] owns the verification flow that runs at boot
//! and on a periodic timer:
//!
//! 1. Collect the current identifiers and compute their fingerprint.
//! 2. First run: store the baseline, compare nothing.
//! 3. Otherwise compare field by field and classify:
//!    - everything equal → verified
//!    - fingerprint equal while a field differs → **device clone** (the
//!      fingerprint inputs are being spoofed), critical
//!    - exactly one field differs → medium
//!    - two fields differ → **device swap**, high
//!    - three or more → **device swap**, critical
//! 4. Respond by severity: critical locks, marks wipe-eligible, and alerts;
//!    high locks and alerts; medium alerts; low only audits.
//!
//! Verification never propagates errors outward - every path resolves to
//! an audit entry plus the optional lock/alert. The baseline is replaced
//! only through [`IntegrityMonitor::rebaseline`] with an explicit remote
//! approval, never automatically on mismatch: an attacker must not be able
//! to legitimize a swapped device by simply failing a check.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use custodia_audit::AuditLog;
use custodia_core::domain::{
    command::CommandSource,
    fingerprint::DeviceIdentifiers,
    mismatch::{IdentifierField, MismatchKind, MismatchRecord, MismatchSeverity},
    newtypes::DeviceId,
};
use custodia_core::ports::{IIdentitySource, IStateRepository, ITransport, MismatchAlert};
use custodia_sync::LockSynchronizer;

use crate::compare::{compare, ComparisonReport};
use crate::fingerprint::compute_fingerprint;

/// Classification summary for a failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchSummary {
    /// Classified tampering kind
    pub kind: MismatchKind,
    /// Classified severity
    pub severity: MismatchSeverity,
    /// The identifiers that drifted
    pub fields: Vec<IdentifierField>,
    /// Whether the response policy locked the device
    pub locked: bool,
    /// Whether the device was marked wipe-eligible
    pub wipe_eligible: bool,
}

/// Result of one verification pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// First run: the baseline was captured, nothing compared
    BaselineEstablished,
    /// All identifiers and the fingerprint matched
    Verified,
    /// Drift was detected and the response policy ran
    Mismatch(MismatchSummary),
    /// The check could not run (collection or storage unavailable)
    Skipped(String),
}

/// Drives integrity verification and the mismatch response policy
///
/// ## Dependencies
///
/// - `identity`: raw identifier collection (platform adapter)
/// - `state_repo`: baseline, mismatch history, wipe flag
/// - `synchronizer`: enforcement (lock on high/critical)
/// - `transport`: best-effort mismatch alerts
/// - `audit`: MISMATCH entries for every path
pub struct IntegrityMonitor {
    identity: Arc<dyn IIdentitySource>,
    state_repo: Arc<dyn IStateRepository>,
    synchronizer: Arc<LockSynchronizer>,
    transport: Arc<dyn ITransport>,
    audit: Arc<AuditLog>,
    device_id: DeviceId,
    /// Cap on retained mismatch records
    history_cap: u32,
}

impl IntegrityMonitor {
    /// Creates a new monitor
    pub fn new(
        identity: Arc<dyn IIdentitySource>,
        state_repo: Arc<dyn IStateRepository>,
        synchronizer: Arc<LockSynchronizer>,
        transport: Arc<dyn ITransport>,
        audit: Arc<AuditLog>,
        device_id: DeviceId,
        history_cap: u32,
    ) -> Self {
        Self {
            identity,
            state_repo,
            synchronizer,
            transport,
            audit,
            device_id,
            history_cap,
        }
    }

    /// Runs one verification pass (boot-time or periodic)
    pub async fn verify(&self) -> VerificationOutcome {
        let current = match self.identity.collect().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Identifier collection failed, skipping integrity check");
                return VerificationOutcome::Skipped(e.to_string());
            }
        };

        let current_fingerprint = match compute_fingerprint(&current) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(error = %e, "Fingerprint computation failed");
                return VerificationOutcome::Skipped(e.to_string());
            }
        };

        let baseline = match self.state_repo.load_baseline().await {
            Ok(baseline) => baseline,
            Err(e) => {
                warn!(error = %e, "Baseline unavailable, skipping integrity check");
                return VerificationOutcome::Skipped(e.to_string());
            }
        };

        let Some((baseline_ids, baseline_fingerprint)) = baseline else {
            // First run: capture the baseline, compare nothing yet.
            if let Err(e) = self
                .state_repo
                .save_baseline(&current, &current_fingerprint)
                .await
            {
                error!(error = %e, "Failed to store fingerprint baseline");
                return VerificationOutcome::Skipped(e.to_string());
            }
            info!(hash = %current_fingerprint.hash(), "Fingerprint baseline established");
            self.audit
                .baseline_established(current_fingerprint.hash().as_str())
                .await;
            return VerificationOutcome::BaselineEstablished;
        };

        let report = compare(&baseline_ids, &current);
        for warning in &report.warnings {
            warn!(warning, "Integrity check warning");
        }

        if report.is_clean() {
            debug!("Device integrity verified");
            self.audit.integrity_verified().await;
            return VerificationOutcome::Verified;
        }

        let fingerprints_match = baseline_fingerprint.matches(&current_fingerprint);
        let (kind, severity) = classify(&report, fingerprints_match);
        let summary = self.respond(kind, severity, &report).await;
        VerificationOutcome::Mismatch(summary)
    }

    /// Replaces the baseline with the current identifiers
    ///
    /// Permitted only through an explicit remote-approved flow; `approval`
    /// is the authority's approval reference and is audited alongside the
    /// new fingerprint. Never invoked automatically.
    pub async fn rebaseline(&self, approval: &str) -> anyhow::Result<DeviceIdentifiers> {
        let current = self.identity.collect().await?;
        let fingerprint = compute_fingerprint(&current)?;
        self.state_repo.save_baseline(&current, &fingerprint).await?;
        info!(
            hash = %fingerprint.hash(),
            approval,
            "Fingerprint baseline replaced"
        );
        self.audit
            .baseline_replaced(fingerprint.hash().as_str(), approval)
            .await;
        Ok(current)
    }

    /// Applies the response policy for a classified mismatch
    ///
    /// Every drifted field becomes a capped-history record and (from medium
    /// severity upward) a best-effort alert. High and critical lock the
    /// device; critical additionally marks it wipe-eligible. Nothing here
    /// propagates an error - failures are logged and the policy continues.
    async fn respond(
        &self,
        kind: MismatchKind,
        severity: MismatchSeverity,
        report: &ComparisonReport,
    ) -> MismatchSummary {
        let fields: Vec<IdentifierField> = report.drifted.iter().map(|d| d.field).collect();
        warn!(
            kind = %kind,
            severity = %severity,
            fields = ?fields,
            "Integrity mismatch classified"
        );

        for drift in &report.drifted {
            let record = MismatchRecord::new(
                kind,
                severity,
                drift.field,
                drift.stored.clone(),
                drift.current.clone(),
            );

            if let Err(e) = self.state_repo.save_mismatch(&record).await {
                warn!(error = %e, "Failed to persist mismatch record");
            } else if let Err(e) = self.state_repo.prune_mismatches(self.history_cap).await {
                warn!(error = %e, "Failed to prune mismatch history");
            }

            self.audit.mismatch_classified(&record).await;

            if severity >= MismatchSeverity::Medium {
                let alert = MismatchAlert {
                    device_id: self.device_id.clone(),
                    mismatch_type: kind,
                    severity,
                    stored_value: drift.stored.clone(),
                    current_value: drift.current.clone(),
                    timestamp: Utc::now(),
                };
                if let Err(e) = self.transport.send_mismatch_alert(&alert).await {
                    warn!(error = %e, "Failed to deliver mismatch alert");
                }
            }
        }

        let mut locked = false;
        let mut wipe_eligible = false;

        if severity >= MismatchSeverity::High {
            let reason = lock_reason(kind, &fields);
            match self
                .synchronizer
                .apply_lock(&reason, CommandSource::IntegrityMonitor)
                .await
            {
                Ok(_) => locked = true,
                Err(e) => {
                    // Terminal control failure; already audited by the
                    // synchronizer. The alert above still went out.
                    error!(error = %e, "Failed to lock after integrity mismatch");
                }
            }
        }

        if severity == MismatchSeverity::Critical {
            let reason = lock_reason(kind, &fields);
            match self.state_repo.mark_wipe_eligible(&reason).await {
                Ok(()) => wipe_eligible = true,
                Err(e) => warn!(error = %e, "Failed to mark device wipe-eligible"),
            }
        }

        MismatchSummary {
            kind,
            severity,
            fields,
            locked,
            wipe_eligible,
        }
    }
}

/// Count-based drift classification
///
/// A matching fingerprint over drifted fields means the fingerprint inputs
/// are being spoofed and always classifies as a critical clone.
fn classify(report: &ComparisonReport, fingerprints_match: bool) -> (MismatchKind, MismatchSeverity) {
    if fingerprints_match {
        return (MismatchKind::DeviceClone, MismatchSeverity::Critical);
    }
    match report.drifted.len() {
        0 | 1 => (MismatchKind::Drift, MismatchSeverity::Medium),
        2 => (MismatchKind::DeviceSwap, MismatchSeverity::High),
        _ => (MismatchKind::DeviceSwap, MismatchSeverity::Critical),
    }
}

/// Lock reason shown on the overlay; names the drifted fields, never values
fn lock_reason(kind: MismatchKind, fields: &[IdentifierField]) -> String {
    let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    format!(
        "Device security compromised ({}): {}",
        kind,
        names.join(", ")
    )
}
