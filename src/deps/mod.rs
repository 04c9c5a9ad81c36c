//! Installed dependency versions.
//!
//! The package manager is detected from the lockfile in the repository
//! root, its listing command is run, and the resulting tree is searched
//! for the dependencies the archetype sets a minimum version for.

pub mod npm;
pub mod version;
pub mod yarn;

pub use version::{semver_valid, Range, Version};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::archetype::ArchetypeConfig;
use crate::error::{Result, XfiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Yarn,
    Npm,
}

impl PackageManager {
    /// `yarn.lock` wins over `package-lock.json` when both exist.
    pub fn detect(repo: &Path) -> Option<Self> {
        if repo.join("yarn.lock").is_file() {
            Some(PackageManager::Yarn)
        } else if repo.join("package-lock.json").is_file() {
            Some(PackageManager::Npm)
        } else {
            None
        }
    }

    pub fn command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            PackageManager::Yarn => ("yarn", &["list", "--json"]),
            PackageManager::Npm => ("npm", &["ls", "-a", "--json"]),
        }
    }
}

/// One node of the installed dependency tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDependencies {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<LocalDependencies>,
}

/// An installed dependency paired with the archetype's minimum for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionData {
    /// Path-qualified name, e.g. `react-dom/scheduler`.
    pub dep: String,
    pub ver: String,
    pub min: String,
}

/// Produces the raw listing output for a package manager.
pub trait DependencyLister: Send + Sync {
    fn list(&self, manager: PackageManager, repo: &Path) -> Result<String>;
}

/// Runs the package manager's listing command in the repository.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLister;

impl DependencyLister for CommandLister {
    fn list(&self, manager: PackageManager, repo: &Path) -> Result<String> {
        let (program, args) = manager.command();
        let output = Command::new(program)
            .args(args)
            .current_dir(repo)
            .output()
            .map_err(|e| {
                XfiError::DependencyResolution(format!("failed to run {}: {}", program, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        // npm ls exits non-zero on peer or extraneous problems but still
        // prints the full tree
        if manager == PackageManager::Npm && !stdout.trim().is_empty() {
            tracing::warn!(
                status = ?output.status.code(),
                "npm ls reported problems; using its output anyway"
            );
            return Ok(stdout);
        }

        Err(XfiError::DependencyResolution(format!(
            "{} exited with {:?}: {}",
            program,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

pub struct DependencyResolver {
    repo_path: PathBuf,
    lister: Arc<dyn DependencyLister>,
    log_prefix: String,
}

impl DependencyResolver {
    pub fn new(repo_path: impl Into<PathBuf>, lister: Arc<dyn DependencyLister>) -> Self {
        Self {
            repo_path: repo_path.into(),
            lister,
            log_prefix: String::new(),
        }
    }

    pub fn log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    /// The installed tree as reported by the detected package manager.
    pub fn installed(&self) -> Result<Vec<LocalDependencies>> {
        let manager = PackageManager::detect(&self.repo_path).ok_or_else(|| {
            XfiError::DependencyResolution(format!(
                "unsupported package manager: no yarn.lock or package-lock.json in {}",
                self.repo_path.display()
            ))
        })?;
        tracing::debug!(
            prefix = %self.log_prefix,
            manager = ?manager,
            repo = %self.repo_path.display(),
            "listing dependencies"
        );

        let output = self.lister.list(manager, &self.repo_path)?;
        match manager {
            PackageManager::Yarn => yarn::parse(&output),
            PackageManager::Npm => npm::parse(&output),
        }
    }

    /// Entries for every installed dependency the archetype constrains.
    ///
    /// An archetype without minimum versions needs no listing and yields
    /// an empty result.
    pub fn resolve(&self, config: &ArchetypeConfig) -> Result<Vec<VersionData>> {
        if config.minimum_dependency_versions.is_empty() {
            tracing::debug!(prefix = %self.log_prefix, "no minimum dependency versions configured");
            return Ok(Vec::new());
        }

        let tree = self.installed()?;
        let found = find_properties_in_tree(&tree, &config.minimum_dependency_versions);
        tracing::info!(
            prefix = %self.log_prefix,
            constrained = config.minimum_dependency_versions.len(),
            found = found.len(),
            "dependency versions resolved"
        );
        Ok(found)
    }
}

/// Walk the tree and emit one [`VersionData`] per node whose name, or name
/// without its `@scope/` prefix, has a minimum version.
///
/// The same package at different positions yields one entry per position.
pub fn find_properties_in_tree(
    deps: &[LocalDependencies],
    minimums: &BTreeMap<String, String>,
) -> Vec<VersionData> {
    let mut results = Vec::new();
    let mut visited = HashSet::new();
    walk(deps, "", minimums, &mut visited, &mut results);
    results
}

fn walk(
    deps: &[LocalDependencies],
    parent: &str,
    minimums: &BTreeMap<String, String>,
    visited: &mut HashSet<String>,
    results: &mut Vec<VersionData>,
) {
    for dep in deps {
        let full_path = if parent.is_empty() {
            dep.name.clone()
        } else {
            format!("{}/{}", parent, dep.name)
        };
        if !visited.insert(full_path.clone()) {
            continue;
        }

        if let Some(min) = minimums
            .get(&dep.name)
            .or_else(|| minimums.get(bare_name(&dep.name)))
        {
            results.push(VersionData {
                dep: full_path.clone(),
                ver: dep.version.clone(),
                min: min.clone(),
            });
        }

        walk(&dep.dependencies, &full_path, minimums, visited, results);
    }
}

/// `@scope/name` becomes `name`.
fn bare_name(name: &str) -> &str {
    match name.strip_prefix('@') {
        Some(rest) => rest.split_once('/').map(|(_, n)| n).unwrap_or(name),
        None => name,
    }
}
