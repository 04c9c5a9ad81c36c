//! Repository file collection.

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::archetype::ArchetypeConfig;
use crate::engine::Scope;
use crate::error::Result;

/// Name, path and content of the repo-global pseudo-file.
pub const REPO_GLOBAL_CHECK: &str = "REPO_GLOBAL_CHECK";

/// One file as seen by rules through the `fileData` fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_name: String,
    pub file_path: String,
    /// Path relative to the repository root, `/`-separated
    pub relative_path: String,
    pub file_content: String,
    #[serde(skip)]
    pub scope: Scope,
}

impl FileData {
    /// The pseudo-file evaluated once with repo-global rules.
    pub fn repo_global() -> Self {
        Self {
            file_name: REPO_GLOBAL_CHECK.to_string(),
            file_path: REPO_GLOBAL_CHECK.to_string(),
            relative_path: REPO_GLOBAL_CHECK.to_string(),
            file_content: REPO_GLOBAL_CHECK.to_string(),
            scope: Scope::RepoGlobal,
        }
    }

    pub fn is_repo_global(&self) -> bool {
        self.scope == Scope::RepoGlobal
    }
}

/// Path filter built from the archetype's blacklist and whitelist.
///
/// Patterns are matched against the repository-rooted path, e.g.
/// `/src/index.ts`. A file is kept when no blacklist pattern matches and,
/// if a whitelist is configured, some whitelist pattern matches.
pub struct PathFilter {
    blacklist: Vec<Regex>,
    whitelist: Vec<Regex>,
}

impl PathFilter {
    pub fn new(config: &ArchetypeConfig) -> Result<Self> {
        let (blacklist, whitelist) = config.compiled_patterns()?;
        Ok(Self {
            blacklist,
            whitelist,
        })
    }

    pub fn is_blacklisted(&self, rooted: &str) -> bool {
        self.blacklist.iter().any(|r| r.is_match(rooted))
    }

    pub fn accepts_file(&self, rooted: &str) -> bool {
        !self.is_blacklisted(rooted)
            && (self.whitelist.is_empty() || self.whitelist.iter().any(|r| r.is_match(rooted)))
    }
}

fn relative(repo: &Path, path: &Path) -> String {
    path.strip_prefix(repo)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Collect every analyzable file under `repo`, excluding the given
/// repository-relative false positives. Files that are not UTF-8 text are
/// skipped. `prefix` is attached to every log line.
pub fn collect_file_data(
    repo: &Path,
    config: &ArchetypeConfig,
    false_positives: &[String],
    prefix: &str,
) -> Result<Vec<FileData>> {
    let filter = PathFilter::new(config)?;
    let mut paths: Vec<(PathBuf, String)> = Vec::new();

    for entry in WalkDir::new(repo)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let rel = relative(repo, e.path());
            rel != ".git" && !filter.is_blacklisted(&format!("/{}/", rel))
        })
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative(repo, entry.path());
        if false_positives.iter().any(|fp| fp.trim_start_matches("./") == rel) {
            tracing::debug!(prefix, file = %rel, "excluded as sensitive-file false positive");
            continue;
        }
        if filter.accepts_file(&format!("/{}", rel)) {
            paths.push((entry.into_path(), rel));
        }
    }

    let mut files: Vec<FileData> = paths
        .into_par_iter()
        .filter_map(|(path, rel)| {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(prefix, file = %rel, error = %e, "cannot read file");
                    return None;
                }
            };
            let Ok(content) = String::from_utf8(bytes) else {
                tracing::debug!(prefix, file = %rel, "skipping non-text file");
                return None;
            };
            Some(FileData {
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                file_path: path.display().to_string(),
                relative_path: rel,
                file_content: content,
                scope: Scope::PerFile,
            })
        })
        .collect();

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    tracing::info!(prefix, repo = %repo.display(), files = files.len(), "collected files");
    Ok(files)
}
