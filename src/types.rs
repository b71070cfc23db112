//! Core types: validation outcomes and tracked-preference metadata
//!
//! The metadata table is the contract between this library and its
//! integrator: every preference that should be protected appears exactly once
//! with a stable reporting id. The table is normally built at startup from a
//! static list, but it can also be loaded from a JSON file (see
//! [`load_tracking_config`]), in which case duplicates are reported as errors
//! rather than asserted.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Outcome of checking one preference value against its stored hash
///
/// Exactly one state is produced per check. None of these are errors; they
/// are the expected vocabulary of the tamper-detection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueState {
    /// The stored hash matches the current value
    Unchanged,
    /// A hash exists but the value is gone
    Cleared,
    /// The value no longer matches its stored hash
    Changed,
    /// No hash exists for a present value, and the hash dictionary as a
    /// whole cannot be trusted (super MAC absent or invalid)
    UntrustedUnknownValue,
    /// No hash exists for a present value, but the hash dictionary as a
    /// whole is trusted (super MAC valid) - safe to seed a hash
    TrustedUnknownValue,
    /// No hash and no value - nothing to forge
    TrustedNullValue,
    /// The hash matches the deprecated-but-trusted legacy derivation;
    /// the caller should re-stamp with the current derivation
    SecureLegacy,
}

/// Whether a mismatch triggers a reset of the tracked value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    /// Report only; never reset
    NoEnforcement,
    /// Reset tampered values during the load-time validation pass
    EnforceOnLoad,
}

/// How a preference's value is hashed and reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefTrackingStrategy {
    /// Tracked and reset as a single indivisible value
    Atomic,
    /// A dictionary value whose top-level keys are tracked and reset
    /// independently
    Split,
}

/// Whether a preference's value may contain personal data
///
/// Purely a reporting flag; it never affects enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSensitivity {
    Impersonal,
    Personal,
}

/// Configuration for one tracked preference
///
/// Immutable once registered. Reporting ids must never be reused for a
/// different path once shipped - they are used for external observability
/// correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPreferenceMetadata {
    /// Dotted path of the preference inside the protected tree
    pub path: String,
    /// Stable id used in observability events
    pub reporting_id: u32,
    pub enforcement_level: EnforcementLevel,
    pub strategy: PrefTrackingStrategy,
    pub sensitivity: ValueSensitivity,
}

/// Validate a tracking configuration table
///
/// Every path and every reporting id must appear at most once.
pub fn validate_tracking_config(entries: &[TrackedPreferenceMetadata]) -> Result<()> {
    let mut paths = HashSet::new();
    let mut ids = HashSet::new();
    for entry in entries {
        if !paths.insert(entry.path.as_str()) {
            return Err(Error::DuplicateTrackedPath(entry.path.clone()));
        }
        if !ids.insert(entry.reporting_id) {
            return Err(Error::DuplicateReportingId(entry.reporting_id));
        }
    }
    Ok(())
}

/// Parse a tracking configuration table from a JSON string
///
/// The expected shape is a JSON array of metadata objects:
///
/// ```json
/// [
///   {
///     "path": "homepage",
///     "reporting_id": 0,
///     "enforcement_level": "enforce_on_load",
///     "strategy": "atomic",
///     "sensitivity": "impersonal"
///   }
/// ]
/// ```
pub fn parse_tracking_config(content: &str) -> Result<Vec<TrackedPreferenceMetadata>> {
    let entries: Vec<TrackedPreferenceMetadata> = serde_json::from_str(content)?;
    validate_tracking_config(&entries)?;
    Ok(entries)
}

/// Load and validate a tracking configuration table from a JSON file
pub fn load_tracking_config(path: &Path) -> Result<Vec<TrackedPreferenceMetadata>> {
    let content = std::fs::read_to_string(path)?;
    parse_tracking_config(&content)
}
