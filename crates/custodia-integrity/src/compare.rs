//! Per-field baseline comparison with normalization
//!
//! Values are normalized before comparison to avoid false positives from
//! cosmetic reporting differences: case, surrounding whitespace, and spacing
//! inside storage-unit values ("16 GB" vs "16GB"). Two fields get special
//! treatment:
//!
//! - **SIM identifiers**: the current list must be a *subset* of the
//!   baseline. Removing a SIM is legitimate (matched with a warning, since
//!   it can also hide a SIM swap); reporting an identifier the baseline
//!   never had is a mismatch.
//! - **Installed memory**: the current value may be up to 1 GiB below the
//!   baseline to absorb reservation/OS overhead differences; anything lower
//!   reads as a hardware swap.

use custodia_core::domain::{
    fingerprint::DeviceIdentifiers,
    mismatch::IdentifierField,
};

/// One identifier that differs from the baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDrift {
    /// The drifted identifier
    pub field: IdentifierField,
    /// Baseline value, rendered for audit
    pub stored: String,
    /// Observed value, rendered for audit
    pub current: String,
}

/// Result of comparing a current identifier set against the baseline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonReport {
    /// Identifiers that differ after normalization
    pub drifted: Vec<FieldDrift>,
    /// Matched-with-warning observations (e.g. SIM count decreased)
    pub warnings: Vec<String>,
}

impl ComparisonReport {
    /// Returns true if every identifier matched
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }
}

/// Normalizes a value for comparison
///
/// Lowercases and trims; storage-unit values additionally lose their inner
/// spacing so "16 GB" and "16GB" compare equal.
fn normalize(value: &str) -> String {
    let trimmed = value.trim();
    let upper = trimmed.to_uppercase();
    if ["GB", "MB", "TB", "KB"].iter().any(|unit| upper.contains(unit)) {
        trimmed.replace(' ', "").to_lowercase()
    } else {
        trimmed.to_lowercase()
    }
}

/// Extracts a memory size in GiB from a value like "16 GB" or "15.79 GB"
fn parse_memory_gb(value: &str) -> Option<f64> {
    let normalized = normalize(value);
    let digits: String = normalized
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if !normalized.ends_with("gb") || digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Memory comparison with a 1 GiB downward tolerance
///
/// Returns true when the current value is acceptable. Unparseable values
/// skip the comparison rather than raising a false mismatch.
fn memory_within_tolerance(stored: &str, current: &str) -> bool {
    match (parse_memory_gb(stored), parse_memory_gb(current)) {
        (Some(stored_gb), Some(current_gb)) => current_gb >= stored_gb - 1.0,
        _ => normalize(stored) == normalize(current),
    }
}

/// SIM list comparison outcome
enum SimComparison {
    Matched,
    MatchedWithWarning(String),
    Mismatch,
}

/// Subset comparison for SIM identifier lists
///
/// Every currently reported identifier must exist in the baseline. A
/// shrink (SIM removed) matches with a warning; a new identifier is a
/// mismatch. Empty lists on either side skip the comparison.
fn compare_sim_lists(stored: &[String], current: &[String]) -> SimComparison {
    if stored.is_empty() || current.is_empty() {
        return SimComparison::Matched;
    }

    let stored_normalized: Vec<String> = stored.iter().map(|s| normalize(s)).collect();
    let current_normalized: Vec<String> = current.iter().map(|s| normalize(s)).collect();

    for sim in &current_normalized {
        if !stored_normalized.contains(sim) {
            return SimComparison::Mismatch;
        }
    }

    if current_normalized.len() < stored_normalized.len() {
        let missing = stored_normalized.len() - current_normalized.len();
        return SimComparison::MatchedWithWarning(format!(
            "SIM identifier count decreased from {} to {} ({} missing); \
             legitimate removal or an attempt to hide a SIM swap",
            stored_normalized.len(),
            current_normalized.len(),
            missing
        ));
    }

    SimComparison::Matched
}

fn render_sims(sims: &[String]) -> String {
    sims.join(",")
}

/// Compares a current identifier set against the baseline, field by field
pub fn compare(baseline: &DeviceIdentifiers, current: &DeviceIdentifiers) -> ComparisonReport {
    let mut report = ComparisonReport::default();

    let mut check_string = |field: IdentifierField, stored: &str, observed: &str| {
        if normalize(stored) != normalize(observed) {
            report.drifted.push(FieldDrift {
                field,
                stored: stored.to_string(),
                current: observed.to_string(),
            });
        }
    };

    check_string(
        IdentifierField::SerialNumber,
        &baseline.serial_number,
        &current.serial_number,
    );
    check_string(
        IdentifierField::HardwareId,
        &baseline.hardware_id,
        &current.hardware_id,
    );
    check_string(
        IdentifierField::OsBuild,
        &baseline.os_build,
        &current.os_build,
    );

    match compare_sim_lists(&baseline.sim_identifiers, &current.sim_identifiers) {
        SimComparison::Matched => {}
        SimComparison::MatchedWithWarning(warning) => report.warnings.push(warning),
        SimComparison::Mismatch => report.drifted.push(FieldDrift {
            field: IdentifierField::SimIdentifiers,
            stored: render_sims(&baseline.sim_identifiers),
            current: render_sims(&current.sim_identifiers),
        }),
    }

    if !memory_within_tolerance(&baseline.installed_memory, &current.installed_memory) {
        report.drifted.push(FieldDrift {
            field: IdentifierField::InstalledMemory,
            stored: baseline.installed_memory.clone(),
            current: current.installed_memory.clone(),
        });
    }

    let mut check_flag = |field: IdentifierField, stored: bool, observed: bool| {
        if stored != observed {
            report.drifted.push(FieldDrift {
                field,
                stored: stored.to_string(),
                current: observed.to_string(),
            });
        }
    };

    check_flag(IdentifierField::Rooted, baseline.rooted, current.rooted);
    check_flag(
        IdentifierField::UsbDebugging,
        baseline.usb_debugging,
        current.usb_debugging,
    );
    check_flag(
        IdentifierField::DeveloperMode,
        baseline.developer_mode,
        current.developer_mode,
    );
    check_flag(
        IdentifierField::BootloaderUnlocked,
        baseline.bootloader_unlocked,
        current.bootloader_unlocked,
    );
    check_flag(
        IdentifierField::CustomRom,
        baseline.custom_rom,
        current.custom_rom,
    );

    report
}
