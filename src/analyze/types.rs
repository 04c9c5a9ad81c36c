//! Analysis result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RepoXfiConfig;

/// Severity of a rule failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Fatality,
    Error,
    Warning,
    /// A failure waived by an exemption; never counted toward the others
    Exempt,
}

impl Level {
    /// Map a rule event type to a level. Unknown types are warnings.
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "fatality" => Level::Fatality,
            "violation" | "error" => Level::Error,
            "warning" => Level::Warning,
            other => {
                tracing::warn!(event_type = other, "unknown event type; treating as warning");
                Level::Warning
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Fatality => "fatality",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Exempt => "exempt",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One rule that fired for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFailure {
    pub rule_failure: String,
    pub level: Level,
    /// Event params after fact substitution
    pub details: Value,
}

/// Failures for one file. Only files with failures produce one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub file_path: String,
    pub errors: Vec<RuleFailure>,
}

/// Failure counts by level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueCounts {
    pub fatality: usize,
    pub error: usize,
    pub warning: usize,
    pub exempt: usize,
}

impl IssueCounts {
    pub fn from_results(results: &[ScanResult]) -> Self {
        results
            .iter()
            .flat_map(|r| &r.errors)
            .fold(Self::default(), |mut counts, failure| {
                match failure.level {
                    Level::Fatality => counts.fatality += 1,
                    Level::Error => counts.error += 1,
                    Level::Warning => counts.warning += 1,
                    Level::Exempt => counts.exempt += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.fatality + self.error + self.warning + self.exempt
    }
}

/// Final output of an analysis run, wrapped under `XFI_RESULT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(rename = "XFI_RESULT")]
    pub xfi_result: XfiResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XfiResult {
    pub archetype: String,
    pub repo_path: String,
    pub repo_url: String,
    /// Real files analyzed; the repo-global entry is not counted
    pub file_count: usize,
    pub total_issues: usize,
    pub fatality_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub exempt_count: usize,
    pub issue_details: Vec<ScanResult>,
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub xfi_version: String,
    #[serde(rename = "repoXFIConfig")]
    pub repo_xfi_config: RepoXfiConfig,
}

impl ResultMetadata {
    pub fn has_fatalities(&self) -> bool {
        self.xfi_result.fatality_count > 0
    }
}
