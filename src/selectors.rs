//! Compatibility gating.
//!
//! Some checks are only valid against target versions where a known defect
//! has been fixed. The [`CompatibilitySelector`] holds a static table of
//! defect identifiers and version predicates and decides whether a check
//! should be skipped for the target's reported version. The policy favors
//! skipping over running known-broken checks: coverage is traded for signal
//! quality.

use std::collections::HashMap;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors raised during compatibility lookups.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    /// The defect identifier is not in the rule table.
    ///
    /// Stale or mistyped references fail loud; there is no silent
    /// pass-through.
    #[error("unknown defect id '{0}'")]
    UnknownDefect(String),
}

/// Result type for selector operations.
pub type SelectorResult<T> = Result<T, SelectorError>;

/// Where a known defect stands relative to released versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectStatus {
    /// Fixed at or after this version; affected strictly below it.
    FixedIn(Version),
    /// Still open in every version seen so far.
    Open,
}

/// One compatibility rule: a defect and its version predicate.
///
/// Static, loaded once by the surrounding framework, never mutated during a
/// run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityRule {
    /// Defect identifier, e.g. an issue-tracker key.
    pub defect: String,
    /// The defect's version predicate.
    pub status: DefectStatus,
}

impl CompatibilityRule {
    /// Rule for a defect fixed at the given version.
    pub fn fixed_in(defect: impl Into<String>, version: Version) -> Self {
        Self {
            defect: defect.into(),
            status: DefectStatus::FixedIn(version),
        }
    }

    /// Rule for a defect still open in every version.
    pub fn open(defect: impl Into<String>) -> Self {
        Self {
            defect: defect.into(),
            status: DefectStatus::Open,
        }
    }
}

/// Version-gated check selector.
#[derive(Debug, Clone, Default)]
pub struct CompatibilitySelector {
    rules: HashMap<String, DefectStatus>,
}

impl CompatibilitySelector {
    /// Build a selector from a rule table.
    pub fn from_rules<I>(rules: I) -> Self
    where
        I: IntoIterator<Item = CompatibilityRule>,
    {
        Self {
            rules: rules
                .into_iter()
                .map(|rule| (rule.defect, rule.status))
                .collect(),
        }
    }

    /// Number of known defects.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decide whether a check gated on `defect_id` should be skipped for a
    /// target reporting `current_version`.
    ///
    /// Returns `false` (run normally) when the defect is fixed at or below
    /// the current version, `true` (skip) while the defect is still open for
    /// it. Unknown identifiers are a hard error.
    pub fn should_skip(
        &self,
        defect_id: &str,
        current_version: &Version,
    ) -> SelectorResult<bool> {
        let status = self
            .rules
            .get(defect_id)
            .ok_or_else(|| SelectorError::UnknownDefect(defect_id.to_string()))?;
        let skip = match status {
            DefectStatus::FixedIn(fixed) => current_version < fixed,
            DefectStatus::Open => true,
        };
        debug!(defect = %defect_id, version = %current_version, skip = %skip, "Compatibility gate");
        Ok(skip)
    }
}
