//! Config directory loader.
//!
//! Layout:
//!
//! ```text
//! {root}/{archetype}.json
//! {root}/rules/{rule}-rule.json
//! {root}/{archetype}-exemptions.json
//! {root}/{archetype}-exemptions/*.json
//! ```

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archetype::{is_safe_name, Archetype};
use crate::error::{Result, XfiError};

pub fn archetype_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{}.json", name))
}

pub fn rule_path(root: &Path, rule: &str) -> PathBuf {
    root.join("rules").join(format!("{}-rule.json", rule))
}

/// Read and validate `{root}/{name}.json`.
pub fn load_archetype(root: &Path, name: &str) -> Result<Archetype> {
    if !is_safe_name(name) {
        return Err(XfiError::ConfigResolution(format!(
            "invalid archetype name {:?}",
            name
        )));
    }

    let path = archetype_path(root, name);
    let content = fs::read_to_string(&path).map_err(|e| {
        XfiError::ConfigResolution(format!(
            "no valid configuration found at {}: {}",
            path.display(),
            e
        ))
    })?;

    serde_json::from_str::<Value>(&content)
        .map_err(XfiError::from)
        .and_then(Archetype::from_value)
        .map_err(|e| {
            XfiError::ConfigResolution(format!(
                "invalid local archetype configuration {}: {}",
                path.display(),
                e
            ))
        })
}

/// Read a rule document. Validation is left to the caller.
pub fn load_rule(root: &Path, rule: &str) -> Result<Value> {
    if !is_safe_name(rule) {
        return Err(XfiError::rule(rule, "rule name contains unsupported characters"));
    }
    let path = rule_path(root, rule);
    let content = fs::read_to_string(&path)
        .map_err(|e| XfiError::rule(rule, format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| XfiError::rule(rule, format!("{} is not valid JSON: {}", path.display(), e)))
}
