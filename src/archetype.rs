//! Archetype schema definitions.
//!
//! An archetype names the rules, facts, operators and plugins that apply to
//! a kind of repository, plus the configuration those rules read.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, XfiError};

/// Top-level archetype definition.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    pub name: String,
    pub rules: Vec<String>,
    pub operators: Vec<String>,
    pub facts: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    pub config: ArchetypeConfig,
}

/// Configuration block read by rules and by file collection.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypeConfig {
    /// Dependency name to npm-style version constraint
    pub minimum_dependency_versions: BTreeMap<String, String>,
    /// Nested directory expectation, e.g. `{"src": {"core": null}}`
    pub standard_structure: serde_json::Value,
    /// Regexes of paths excluded from analysis
    pub blacklist_patterns: Vec<String>,
    /// Regexes of paths included in analysis
    pub whitelist_patterns: Vec<String>,
}

impl Archetype {
    /// Parse an archetype from a JSON file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::parse_str(&content)
    }

    /// Parse an archetype from JSON text. Does not run [`validate`].
    pub fn parse_str(content: &str) -> Result<Self> {
        let archetype: Archetype = serde_json::from_str(content)?;
        Ok(archetype)
    }

    /// Parse and validate an already-decoded JSON document.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let archetype: Archetype = serde_json::from_value(value)?;
        validate(&archetype)?;
        Ok(archetype)
    }
}

impl ArchetypeConfig {
    /// Compile the blacklist and whitelist patterns.
    pub fn compiled_patterns(&self) -> Result<(Vec<Regex>, Vec<Regex>)> {
        Ok((
            compile_all(&self.blacklist_patterns)?,
            compile_all(&self.whitelist_patterns)?,
        ))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                XfiError::ConfigResolution(format!("invalid pattern {:?}: {}", p, e))
            })
        })
        .collect()
}

/// Whether a name is safe to use as a file stem under the config directory.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate an archetype for correctness.
pub fn validate(archetype: &Archetype) -> Result<()> {
    if !is_safe_name(&archetype.name) {
        return Err(XfiError::ConfigResolution(format!(
            "invalid archetype name {:?}",
            archetype.name
        )));
    }

    if let Some(bad) = archetype.rules.iter().find(|r| r.trim().is_empty()) {
        return Err(XfiError::ConfigResolution(format!(
            "invalid rule name {:?} in archetype {}",
            bad, archetype.name
        )));
    }

    if !archetype.config.standard_structure.is_object() {
        return Err(XfiError::ConfigResolution(format!(
            "standardStructure of archetype {} must be an object",
            archetype.name
        )));
    }

    archetype.config.compiled_patterns()?;

    Ok(())
}
