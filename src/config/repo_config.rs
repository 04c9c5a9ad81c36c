//! Repository override file `.xfi-config.json`.

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use super::remote::RemoteConfigClient;
use crate::error::{Result, XfiError};

pub const REPO_CONFIG_FILE: &str = ".xfi-config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoXfiConfig {
    /// Repository-relative paths never analyzed as files
    pub sensitive_file_false_positives: Vec<String>,
    pub additional_rules: Vec<AdditionalRule>,
    pub additional_facts: Vec<String>,
    pub additional_operators: Vec<String>,
    pub additional_plugins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Value>,
}

/// Where an extra rule comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalRule {
    Remote { url: String },
    /// Repository-relative file or glob
    Path { path: String },
    Inline(Value),
}

impl RepoXfiConfig {
    /// Load the override file from a repository root. A missing file gives
    /// the empty config; an unreadable one is logged and ignored.
    pub fn load(repo: &Path, prefix: &str) -> Self {
        let path = repo.join(REPO_CONFIG_FILE);
        if !path.is_file() {
            tracing::debug!(prefix, repo = %repo.display(), "no repository config");
            return Self::default();
        }

        match fs::read_to_string(&path)
            .map_err(XfiError::from)
            .and_then(|c| serde_json::from_str::<RepoXfiConfig>(&c).map_err(XfiError::from))
        {
            Ok(config) => {
                tracing::info!(
                    prefix,
                    additional_rules = config.additional_rules.len(),
                    additional_plugins = config.additional_plugins.len(),
                    "loaded repository config"
                );
                config
            }
            Err(e) => {
                tracing::warn!(prefix, file = %path.display(), error = %e, "ignoring invalid repository config");
                Self::default()
            }
        }
    }
}

/// Turn every additional rule into rule documents. Entries that cannot be
/// read are logged and skipped.
pub async fn expand_additional_rules(
    repo: &Path,
    rules: &[AdditionalRule],
    remote: &RemoteConfigClient,
    prefix: &str,
) -> Vec<Value> {
    let mut out = Vec::new();
    for rule in rules {
        let docs = match rule {
            AdditionalRule::Inline(value) => Ok(vec![value.clone()]),
            AdditionalRule::Remote { url } => remote.fetch_json(url).await.map(flatten),
            AdditionalRule::Path { path } => read_rule_files(repo, path),
        };
        match docs {
            Ok(docs) => out.extend(docs),
            Err(e) => tracing::warn!(prefix, source = ?rule, error = %e, "skipping additional rule"),
        }
    }
    out
}

/// A file may hold one rule or an array of rules.
fn flatten(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn read_rule_files(repo: &Path, pattern: &str) -> Result<Vec<Value>> {
    let relative = Path::new(pattern);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(XfiError::ConfigResolution(format!(
            "rule path {:?} must stay inside the repository",
            pattern
        )));
    }

    let files = if pattern.contains(['*', '?', '[', '{']) {
        glob_files(repo, pattern)?
    } else {
        vec![repo.join(relative)]
    };

    let mut docs = Vec::new();
    for file in files {
        let content = fs::read_to_string(&file)?;
        docs.extend(flatten(serde_json::from_str(&content)?));
    }
    Ok(docs)
}

fn glob_files(repo: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher: GlobMatcher = Glob::new(pattern)
        .map_err(|e| XfiError::ConfigResolution(format!("invalid rule glob {:?}: {}", pattern, e)))?
        .compile_matcher();

    let mut files: Vec<PathBuf> = WalkDir::new(repo)
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules" && e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(repo)
                .map(|rel| matcher.is_match(rel))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::remote::RemoteSettings;
    use serde_json::json;
    use tempfile::TempDir;

    fn client() -> RemoteConfigClient {
        RemoteConfigClient::new(RemoteSettings::default()).unwrap()
    }

    #[test]
    fn test_parse_all_rule_shapes() {
        let config: RepoXfiConfig = serde_json::from_value(json!({
            "sensitiveFileFalsePositives": ["src/config/keys.ts"],
            "additionalRules": [
                {"url": "https://rules.example.com/extra.json"},
                {"path": "xfi-rules/*.json"},
                {"name": "inline-iterative", "conditions": {"all": []}, "event": {"type": "warning"}}
            ],
            "additionalPlugins": ["xfiPluginSimpleExample"]
        }))
        .unwrap();

        assert!(matches!(config.additional_rules[0], AdditionalRule::Remote { .. }));
        assert!(matches!(config.additional_rules[1], AdditionalRule::Path { .. }));
        assert!(matches!(config.additional_rules[2], AdditionalRule::Inline(_)));
        assert!(config.additional_facts.is_empty());
    }

    #[test]
    fn test_load_invalid_file_gives_default() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(REPO_CONFIG_FILE), "{\"additionalPlugins\": 5}").unwrap();
        assert_eq!(RepoXfiConfig::load(dir.path(), ""), RepoXfiConfig::default());
    }

    #[tokio::test]
    async fn test_expand_path_and_glob_rules() {
        let dir = TempDir::new().unwrap();
        let rules_dir = dir.path().join("xfi-rules");
        fs::create_dir(&rules_dir).unwrap();
        fs::write(rules_dir.join("one.json"), r#"{"name": "one-iterative"}"#).unwrap();
        fs::write(
            rules_dir.join("many.json"),
            r#"[{"name": "two-iterative"}, {"name": "three-global"}]"#,
        )
        .unwrap();

        let rules = vec![
            AdditionalRule::Path { path: "xfi-rules/*.json".to_string() },
            AdditionalRule::Path { path: "xfi-rules/one.json".to_string() },
            AdditionalRule::Path { path: "../outside.json".to_string() },
            AdditionalRule::Path { path: "xfi-rules/missing.json".to_string() },
        ];
        let docs = expand_additional_rules(dir.path(), &rules, &client(), "").await;
        let names: Vec<&str> = docs.iter().filter_map(|d| d["name"].as_str()).collect();
        assert_eq!(names, vec!["two-iterative", "three-global", "one-iterative", "one-iterative"]);
    }
}
