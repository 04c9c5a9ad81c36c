//! Error taxonomy for the analysis pipeline.

use thiserror::Error;

/// Errors raised by configuration resolution, plugin loading, dependency
/// resolution and rule evaluation.
#[derive(Error, Debug)]
pub enum XfiError {
    /// No valid archetype source, remote retries exhausted, or the
    /// archetype failed validation.
    #[error("config resolution failed: {0}")]
    ConfigResolution(String),
    /// A requested plugin could not be found in any catalog tier, or it
    /// collided with an existing registration under the reject policy.
    #[error("plugin load failed: {0}")]
    PluginLoad(String),
    /// A single rule is malformed. Never fatal to a run.
    #[error("invalid rule {rule}: {reason}")]
    RuleValidation { rule: String, reason: String },
    /// No supported lockfile, or the listing command failed.
    #[error("dependency resolution failed: {0}")]
    DependencyResolution(String),
    /// A rule raised while being evaluated against one file.
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("Invalid GitHub URL format: {0}")]
    InvalidGitHubUrl(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl XfiError {
    pub fn rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        XfiError::RuleValidation {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Whether a remote fetch that failed with this error is worth another
    /// attempt. Client errors (4xx) and undecodable bodies are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            XfiError::Http(e) => match e.status() {
                Some(status) => status.is_server_error(),
                None => !e.is_decode(),
            },
            XfiError::Json(_) => false,
            _ => true,
        }
    }

    /// Whether this error aborts an analysis run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            XfiError::RuleValidation { .. } | XfiError::Evaluation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, XfiError>;
