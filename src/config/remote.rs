//! Config server client.
//!
//! Endpoints:
//! - `GET {server}/archetypes/{name}`
//! - `GET {server}/archetypes/{name}/rules/{rule}`
//! - `GET {server}/archetypes/{name}/exemptions`

use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::archetype::{is_safe_name, Archetype};
use crate::error::{Result, XfiError};
use crate::exemption::Exemption;

/// Retry and timeout settings for config server requests.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct RemoteConfigClient {
    http: reqwest::Client,
    settings: RemoteSettings,
}

impl RemoteConfigClient {
    pub fn new(settings: RemoteSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("xfidelity/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    /// Fetch and validate an archetype. Transport failures are retried;
    /// a document that fails validation is not.
    pub async fn fetch_archetype(&self, server: &str, name: &str) -> Result<Archetype> {
        if !is_safe_name(name) {
            return Err(XfiError::ConfigResolution(format!(
                "invalid archetype name {:?}",
                name
            )));
        }

        let url = format!("{}/archetypes/{}", server.trim_end_matches('/'), name);
        let value = self
            .fetch_json(&url)
            .await
            .map_err(|e| XfiError::ConfigResolution(format!("failed to fetch {}: {}", url, e)))?;

        Archetype::from_value(value).map_err(|e| {
            XfiError::ConfigResolution(format!(
                "invalid remote archetype configuration: {}",
                e
            ))
        })
    }

    /// Fetch a rule document. Validation is left to the caller.
    pub async fn fetch_rule(&self, server: &str, archetype: &str, rule: &str) -> Result<Value> {
        if !is_safe_name(rule) {
            return Err(XfiError::rule(rule, "rule name contains unsupported characters"));
        }
        let url = format!(
            "{}/archetypes/{}/rules/{}",
            server.trim_end_matches('/'),
            archetype,
            rule
        );
        self.fetch_json(&url)
            .await
            .map_err(|e| XfiError::rule(rule, format!("failed to fetch {}: {}", url, e)))
    }

    pub async fn fetch_exemptions(&self, server: &str, archetype: &str) -> Result<Vec<Exemption>> {
        let url = format!(
            "{}/archetypes/{}/exemptions",
            server.trim_end_matches('/'),
            archetype
        );
        let value = self.fetch_json(&url).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET a JSON document with the configured retry policy.
    pub async fn fetch_json(&self, url: &str) -> Result<Value> {
        with_retries(&self.settings, url, move || async move {
            let response = self.http.get(url).send().await?.error_for_status()?;
            Ok(response.json::<Value>().await?)
        })
        .await
    }
}

/// Run `op` up to `settings.attempts` times, sleeping `retry_delay`
/// between attempts. Errors that are not [`XfiError::is_retryable`] are
/// returned at once; otherwise the last error is returned.
pub async fn with_retries<T, F, Fut>(settings: &RemoteSettings, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = settings.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                tracing::warn!(attempt, attempts, target_url = what, error = %e, "remote fetch failed; retrying");
                tokio::time::sleep(settings.retry_delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(attempt, attempts, target_url = what, error = %e, "remote fetch failed");
                return Err(e);
            }
        }
    }
}
