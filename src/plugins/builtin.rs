//! Built-in facts and operators.
//!
//! Runtime facts (`fileData`, `dependencyData`, `standardStructure`,
//! `globalFileMetadata`) are supplied by the analysis runner for every
//! evaluation. The facts here are computed on demand from them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use super::{Fact, FnFact, FnOperator, Operator, XfiPlugin};
use crate::deps::semver_valid;
use crate::engine::{Almanac, Scope};
use crate::error::{Result, XfiError};

pub const CORE_PLUGIN_NAME: &str = "xfiCore";

/// The facts and operators every context starts with.
pub struct CorePlugin;

impl XfiPlugin for CorePlugin {
    fn name(&self) -> &str {
        CORE_PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn facts(&self) -> Vec<Arc<dyn Fact>> {
        vec![FnFact::new("repoDependencyAnalysis", repo_dependency_analysis)]
    }

    fn operators(&self) -> Vec<Arc<dyn Operator>> {
        vec![
            FnOperator::new("fileContains", file_contains),
            FnOperator::new("fileDoesNotContain", |content: &Value, patterns: &Value| {
                Ok(!file_contains(content, patterns)?)
            }),
            FnOperator::new("regexMatch", regex_match),
            FnOperator::new("outdatedFramework", outdated_framework),
            FnOperator::new(
                "nonStandardDirectoryStructure",
                non_standard_directory_structure,
            ),
        ]
    }
}

/// Dependencies whose installed version fails the archetype minimum.
///
/// Only computed for the repo-global pass; per-file evaluations get an
/// empty result.
fn repo_dependency_analysis(_params: &Value, almanac: &Almanac) -> Result<Value> {
    if almanac.scope() != Scope::RepoGlobal {
        return Ok(json!({"result": []}));
    }

    let data = almanac.fact_value_at(
        "dependencyData",
        None,
        Some("$.installedDependencyVersions"),
    )?;
    let mut failures = Vec::new();

    for entry in data.as_array().into_iter().flatten() {
        let dep = entry.get("dep").and_then(Value::as_str).unwrap_or("");
        let ver = entry.get("ver").and_then(Value::as_str).unwrap_or("");
        let min = entry.get("min").and_then(Value::as_str).unwrap_or("");
        if !semver_valid(ver, min) {
            failures.push(json!({
                "dependency": dep,
                "currentVersion": ver,
                "requiredVersion": min,
            }));
        }
    }

    Ok(json!({"result": failures}))
}

/// Compiled rule patterns, shared by every file and run in the process.
static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Compile `pattern` once; later calls clone the cached [`Regex`].
fn compile(pattern: &str) -> Result<Regex> {
    if let Some(re) = REGEX_CACHE.read().ok().and_then(|c| c.get(pattern).cloned()) {
        return Ok(re);
    }
    let re = Regex::new(pattern)
        .map_err(|e| XfiError::Evaluation(format!("invalid pattern {:?}: {}", pattern, e)))?;
    if let Ok(mut cache) = REGEX_CACHE.write() {
        cache.insert(pattern.to_string(), re.clone());
    }
    Ok(re)
}

/// True when any of the patterns matches the file content.
fn file_contains(content: &Value, patterns: &Value) -> Result<bool> {
    let Some(text) = content.as_str() else {
        return Ok(false);
    };
    let patterns: Vec<&str> = match patterns {
        Value::String(p) => vec![p.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(false),
    };
    for p in patterns {
        if compile(p)?.is_match(text) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn regex_match(value: &Value, pattern: &Value) -> Result<bool> {
    match (value.as_str(), pattern.as_str()) {
        (Some(v), Some(p)) => Ok(compile(p)?.is_match(v)),
        _ => Ok(false),
    }
}

/// True when the dependency analysis reported failures; the condition
/// value selects the expected outcome (defaults to `true`).
fn outdated_framework(analysis: &Value, expected: &Value) -> Result<bool> {
    let outdated = analysis
        .get("result")
        .and_then(Value::as_array)
        .map(|r| !r.is_empty())
        .unwrap_or(false);
    Ok(outdated == expected.as_bool().unwrap_or(true))
}

/// True when a directory named by the expected structure is absent from
/// the repository file list.
fn non_standard_directory_structure(files: &Value, structure: &Value) -> Result<bool> {
    let mut present = BTreeSet::new();
    for path in files.as_array().into_iter().flatten().filter_map(Value::as_str) {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        for depth in 1..parts.len() {
            present.insert(parts[..depth].join("/"));
        }
    }

    let mut expected = Vec::new();
    expected_dirs(structure, "", &mut expected);
    let missing: Vec<&String> = expected.iter().filter(|d| !present.contains(*d)).collect();
    if !missing.is_empty() {
        tracing::debug!(missing = ?missing, "directories missing from standard structure");
    }
    Ok(!missing.is_empty())
}

fn expected_dirs(structure: &Value, parent: &str, out: &mut Vec<String>) {
    if let Value::Object(map) = structure {
        for (name, children) in map {
            let path = if parent.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", parent, name)
            };
            out.push(path.clone());
            expected_dirs(children, &path, out);
        }
    }
}
