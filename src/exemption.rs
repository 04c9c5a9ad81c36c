//! Time-bounded rule exemptions.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Result, XfiError};
use crate::telemetry::{Telemetry, TelemetryEvent};

static SSH_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^git@([^:/\s]+):([^/\s]+)/([^/\s]+?)(?:\.git)?/?$").expect("valid regex")
});
static HTTPS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:[^@/\s]+@)?([^/\s]+)/([^/\s]+)/([^/\s]+?)(?:\.git)?/?$")
        .expect("valid regex")
});
static BARE_REPO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?$").expect("valid regex")
});

/// A waiver of one rule for one repository until a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exemption {
    pub repo_url: String,
    pub rule: String,
    /// RFC 3339 timestamp or `YYYY-MM-DD` (midnight UTC)
    pub expiration_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Exemption {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        parse_expiration(&self.expiration_date)
    }
}

fn parse_expiration(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Canonicalize a repository URL to `git@host:org/repo.git`.
///
/// Accepts SSH (`git@host:org/repo[.git]`), HTTPS
/// (`https://host/org/repo[.git]`) and bare `org/repo`, which is taken to
/// live on github.com. The empty string is returned unchanged.
pub fn normalize_github_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(String::new());
    }

    let (host, org, repo) = if let Some(c) = SSH_URL.captures(url) {
        (c[1].to_string(), c[2].to_string(), c[3].to_string())
    } else if let Some(c) = HTTPS_URL.captures(url) {
        (c[1].to_string(), c[2].to_string(), c[3].to_string())
    } else if let Some(c) = BARE_REPO.captures(url) {
        ("github.com".to_string(), c[1].to_string(), c[2].to_string())
    } else {
        return Err(XfiError::InvalidGitHubUrl(url.to_string()));
    };

    Ok(format!("git@{}:{}/{}.git", host, org, repo))
}

/// The subject of an exemption check.
#[derive(Debug, Clone, Copy)]
pub struct ExemptionQuery<'a> {
    pub repo_url: &'a str,
    pub rule_name: &'a str,
    pub exemptions: &'a [Exemption],
    pub log_prefix: Option<&'a str>,
}

pub fn is_exempt(query: &ExemptionQuery<'_>, telemetry: &dyn Telemetry) -> bool {
    is_exempt_at(query, telemetry, Utc::now())
}

/// Whether an unexpired exemption covers the rule for the repository at
/// `now`. A match is logged at error level and reported to telemetry.
pub fn is_exempt_at(
    query: &ExemptionQuery<'_>,
    telemetry: &dyn Telemetry,
    now: DateTime<Utc>,
) -> bool {
    let prefix = query.log_prefix.unwrap_or_default();
    if query.exemptions.is_empty() {
        return false;
    }

    let subject = match normalize_github_url(query.repo_url) {
        Ok(url) if !url.is_empty() => url,
        Ok(_) => return false,
        Err(e) => {
            tracing::warn!(prefix, error = %e, "cannot normalize repository url for exemption check");
            return false;
        }
    };

    for exemption in query.exemptions {
        if exemption.rule != query.rule_name {
            continue;
        }
        match normalize_github_url(&exemption.repo_url) {
            Ok(url) if url == subject => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(prefix, rule = %exemption.rule, error = %e, "ignoring exemption");
                continue;
            }
        }
        let Some(expires) = exemption.expires_at() else {
            tracing::warn!(
                prefix,
                rule = %exemption.rule,
                expiration = %exemption.expiration_date,
                "ignoring exemption with unreadable expiration date"
            );
            continue;
        };
        if expires <= now {
            tracing::debug!(prefix, rule = %exemption.rule, "exemption expired");
            continue;
        }

        tracing::error!(
            prefix,
            repo = %subject,
            rule = %exemption.rule,
            expires = %expires,
            reason = exemption.reason.as_deref().unwrap_or(""),
            "exemption allowed"
        );
        telemetry.send(TelemetryEvent::new(
            "exemptionAllowed",
            json!({
                "repoUrl": subject,
                "rule": exemption.rule,
                "expirationDate": exemption.expiration_date,
                "reason": exemption.reason,
            }),
        ));
        return true;
    }

    false
}
