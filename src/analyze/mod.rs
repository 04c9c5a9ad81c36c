//! Codebase analysis.
//!
//! [`analyze_codebase`] ties the pipeline together: resolve the archetype,
//! collect files, resolve dependency versions, build an engine, evaluate
//! every file plus the repo-global entry, and summarize.

pub mod files;
pub mod runner;
pub mod types;

pub use files::{collect_file_data, FileData, PathFilter, REPO_GLOBAL_CHECK};
pub use runner::{AnalysisRunner, CancellationFlag, ProcessFacts};
pub use types::{IssueCounts, Level, ResultMetadata, RuleFailure, ScanResult, XfiResult};

use chrono::Utc;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ResolveOptions;
use crate::context::XfiContext;
use crate::deps::DependencyResolver;
use crate::engine::EngineBuilder;
use crate::error::Result;
use crate::telemetry::TelemetryEvent;

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub repo_path: PathBuf,
    pub resolve: ResolveOptions,
    /// Overrides the origin URL read from `.git/config`
    pub repo_url: Option<String>,
    pub cancel: Option<CancellationFlag>,
}

/// Analyze a repository against an archetype.
///
/// Any error is reported to telemetry as `analysisError` before being
/// returned.
pub async fn analyze_codebase(ctx: &XfiContext, options: AnalyzeOptions) -> Result<ResultMetadata> {
    let archetype = options.resolve.archetype.clone();
    let repo = options.repo_path.display().to_string();
    let prefix = options.resolve.prefix().to_string();

    match run(ctx, options).await {
        Ok(result) => Ok(result),
        Err(e) => {
            tracing::error!(prefix = %prefix, archetype = %archetype, repo = %repo, error = %e, "analysis failed");
            ctx.telemetry.send(TelemetryEvent::new(
                "analysisError",
                json!({
                    "archetype": archetype,
                    "repoPath": repo,
                    "message": e.to_string(),
                    "fatal": e.is_fatal(),
                }),
            ));
            Err(e)
        }
    }
}

async fn run(ctx: &XfiContext, options: AnalyzeOptions) -> Result<ResultMetadata> {
    let start_time = Utc::now();
    let started = Instant::now();
    let repo = options.repo_path.as_path();
    let prefix = options.resolve.execution_log_prefix.clone();

    let mut resolve = options.resolve.clone();
    resolve.repo_path = Some(repo.to_path_buf());
    let config = ctx.resolver.resolve(&resolve).await?;
    let archetype = &config.archetype;

    let log_prefix = prefix.as_deref().unwrap_or_default();
    let installed = DependencyResolver::new(repo, Arc::clone(&ctx.lister))
        .log_prefix(log_prefix)
        .resolve(&archetype.config)?;

    let mut files = collect_file_data(
        repo,
        &archetype.config,
        &config.repo_config.sensitive_file_false_positives,
        log_prefix,
    )?;
    let file_count = files.len();
    files.push(FileData::repo_global());

    let engine = EngineBuilder::new(&ctx.registry)
        .features(resolve.features.clone())
        .telemetry(Arc::clone(&ctx.telemetry))
        .log_prefix(prefix.clone())
        .build(archetype, &config.rules);

    let facts = ProcessFacts::new(
        &installed,
        &archetype.config.minimum_dependency_versions,
        archetype.config.standard_structure.clone(),
        &files,
    );

    let repo_url = options
        .repo_url
        .clone()
        .or_else(|| read_origin_url(repo))
        .unwrap_or_default();

    let mut runner = AnalysisRunner::new(&engine)
        .exemptions(repo_url.clone(), &config.exemptions)
        .telemetry(Arc::clone(&ctx.telemetry))
        .log_prefix(prefix.clone());
    if let Some(flag) = options.cancel.clone() {
        runner = runner.cancellation(flag);
    }
    let issue_details = runner.run(&files, &facts)?;

    let counts = IssueCounts::from_results(&issue_details);
    let finish_time = Utc::now();
    tracing::info!(
        prefix = prefix.as_deref().unwrap_or_default(),
        archetype = %archetype.name,
        files = file_count,
        issues = counts.total(),
        fatalities = counts.fatality,
        "analysis complete"
    );

    Ok(ResultMetadata {
        xfi_result: XfiResult {
            archetype: archetype.name.clone(),
            repo_path: repo.display().to_string(),
            repo_url,
            file_count,
            total_issues: counts.total(),
            fatality_count: counts.fatality,
            error_count: counts.error,
            warning_count: counts.warning,
            exempt_count: counts.exempt,
            issue_details,
            start_time,
            finish_time,
            duration_seconds: started.elapsed().as_secs_f64(),
            xfi_version: env!("CARGO_PKG_VERSION").to_string(),
            repo_xfi_config: config.repo_config.clone(),
        },
    })
}

/// The `origin` remote URL from `.git/config`, if any.
pub fn read_origin_url(repo: &Path) -> Option<String> {
    let content = fs::read_to_string(repo.join(".git").join("config")).ok()?;
    let mut in_origin = false;

    for line in content.lines().map(str::trim) {
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if !in_origin {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "url" {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}
