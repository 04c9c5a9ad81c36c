//! Exemption sources.
//!
//! Locally, exemptions live in a legacy single file
//! `{root}/{archetype}-exemptions.json` and in a directory
//! `{root}/{archetype}-exemptions/` of JSON files, each holding an array.
//! Both are merged. A missing or unreadable source contributes nothing
//! and is logged.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::exemption::Exemption;

pub fn load_local(root: &Path, archetype: &str, prefix: &str) -> Vec<Exemption> {
    let legacy = root.join(format!("{}-exemptions.json", archetype));
    let dir = root.join(format!("{}-exemptions", archetype));
    let mut sources = Vec::new();

    if legacy.is_file() {
        match read_file(&legacy) {
            Ok(list) => sources.push(list),
            Err(e) => tracing::warn!(prefix, file = %legacy.display(), error = %e, "skipping exemption file"),
        }
    }

    if dir.is_dir() {
        let mut files: Vec<_> = fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        for file in files {
            match read_file(&file) {
                Ok(list) => sources.push(list),
                Err(e) => tracing::warn!(prefix, file = %file.display(), error = %e, "skipping exemption file"),
            }
        }
    }

    if sources.is_empty() {
        tracing::warn!(prefix, archetype, "no exemptions found; continuing without exemptions");
    }

    let merged = merge(sources);
    tracing::debug!(prefix, archetype, count = merged.len(), "exemptions loaded");
    merged
}

fn read_file(path: &Path) -> Result<Vec<Exemption>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Concatenate exemption lists, dropping exact duplicates.
pub fn merge(sources: Vec<Vec<Exemption>>) -> Vec<Exemption> {
    let mut merged: Vec<Exemption> = Vec::new();
    for exemption in sources.into_iter().flatten() {
        if !merged.contains(&exemption) {
            merged.push(exemption);
        }
    }
    merged
}
