//! End-to-end analysis tests against the `testdata/repos/node-app`
//! fixture.
//!
//! Dependency listings come from `testdata/listings` instead of running
//! npm or yarn.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tempfile::TempDir;

use xfidelity::analyze::REPO_GLOBAL_CHECK;
use xfidelity::config::ResolveOptions;
use xfidelity::deps::{DependencyLister, PackageManager};
use xfidelity::telemetry::MemoryTelemetry;
use xfidelity::{analyze_codebase, report, AnalyzeOptions, Level, XfiContext, XfiError};

fn testdata_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

/// Serves the canned listing for whichever manager was detected.
struct FixtureLister;

impl DependencyLister for FixtureLister {
    fn list(&self, manager: PackageManager, _repo: &Path) -> xfidelity::Result<String> {
        let file = match manager {
            PackageManager::Npm => "npm-ls.json",
            PackageManager::Yarn => "yarn-list.json",
        };
        Ok(fs::read_to_string(testdata_path().join("listings").join(file))?)
    }
}

fn context(telemetry: Arc<MemoryTelemetry>) -> XfiContext {
    XfiContext::builder()
        .telemetry(telemetry)
        .dependency_lister(Arc::new(FixtureLister))
        .build()
        .unwrap()
}

fn options(repo: &Path, config_dir: &Path) -> AnalyzeOptions {
    AnalyzeOptions {
        repo_path: repo.to_path_buf(),
        resolve: ResolveOptions {
            local_config_path: Some(config_dir.to_path_buf()),
            ..ResolveOptions::new("node-fullstack")
        },
        repo_url: Some("https://github.com/org/node-app".to_string()),
        cancel: None,
    }
}

fn fixture_repo() -> PathBuf {
    testdata_path().join("repos").join("node-app")
}

#[tokio::test]
async fn test_outdated_framework_reported_on_repo_global_entry() {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let ctx = context(Arc::clone(&telemetry));

    let result = analyze_codebase(&ctx, options(&fixture_repo(), &testdata_path().join("config")))
        .await
        .expect("analysis should succeed");
    let r = &result.xfi_result;

    // package.json, package-lock.json and the two sources
    assert_eq!(r.file_count, 4);
    assert_eq!(r.total_issues, 1);
    assert_eq!(r.fatality_count, 1);
    assert_eq!(r.exempt_count, 0);
    assert!(result.has_fatalities());

    assert_eq!(r.issue_details.len(), 1);
    let scan = &r.issue_details[0];
    assert_eq!(scan.file_path, REPO_GLOBAL_CHECK);
    assert_eq!(scan.errors.len(), 1);
    assert_eq!(scan.errors[0].rule_failure, "outdatedFramework-global");
    assert_eq!(scan.errors[0].level, Level::Fatality);

    // the details reference resolves to the failing dependencies only
    let details = scan.errors[0].details["details"].as_array().unwrap();
    let deps: Vec<&str> = details.iter().filter_map(|d| d["dependency"].as_str()).collect();
    assert!(deps.contains(&"react"));
    assert!(!deps.iter().any(|d| d.ends_with("loose-envify")));

    assert_eq!(telemetry.events_of("ruleFailure").len(), 1);
    assert!(telemetry.events_of("analysisError").is_empty());
}

#[tokio::test]
async fn test_exemption_downgrades_fatality() {
    let config = TempDir::new().unwrap();
    copy_dir(&testdata_path().join("config"), config.path());
    fs::write(
        config.path().join("node-fullstack-exemptions.json"),
        json!([{
            "repoUrl": "org/node-app",
            "rule": "outdatedFramework-global",
            "expirationDate": "2099-12-31",
            "reason": "upgrade scheduled"
        }])
        .to_string(),
    )
    .unwrap();

    let telemetry = Arc::new(MemoryTelemetry::new());
    let exempted = analyze_codebase(&context(Arc::clone(&telemetry)), options(&fixture_repo(), config.path()))
        .await
        .unwrap();
    assert_eq!(exempted.xfi_result.exempt_count, 1);
    assert_eq!(exempted.xfi_result.fatality_count, 0);
    assert_eq!(exempted.xfi_result.total_issues, 1);
    assert!(!exempted.has_fatalities());
    assert_eq!(
        exempted.xfi_result.issue_details[0].errors[0].level,
        Level::Exempt
    );
    assert_eq!(telemetry.events_of("exemptionAllowed").len(), 1);
    // the engine reports the failure before the exemption is applied
    assert_eq!(telemetry.events_of("ruleFailure").len(), 1);

    let baseline = analyze_codebase(
        &context(Arc::new(MemoryTelemetry::new())),
        options(&fixture_repo(), &testdata_path().join("config")),
    )
    .await
    .unwrap();
    assert_eq!(baseline.xfi_result.fatality_count, 1);
    assert_eq!(baseline.xfi_result.exempt_count, 0);
}

#[tokio::test]
async fn test_yarn_listing_is_used_when_yarn_lock_present() {
    let repo = TempDir::new().unwrap();
    copy_dir(&fixture_repo(), repo.path());
    fs::remove_file(repo.path().join("package-lock.json")).unwrap();
    fs::write(repo.path().join("yarn.lock"), "# yarn lockfile v1\n").unwrap();

    let result = analyze_codebase(
        &context(Arc::new(MemoryTelemetry::new())),
        options(repo.path(), &testdata_path().join("config")),
    )
    .await
    .unwrap();

    // yarn.lock is not whitelisted, package-lock.json is gone
    assert_eq!(result.xfi_result.file_count, 3);
    assert_eq!(result.xfi_result.fatality_count, 1);
}

#[tokio::test]
async fn test_sensitive_content_flags_file() {
    let repo = TempDir::new().unwrap();
    copy_dir(&fixture_repo(), repo.path());
    fs::write(
        repo.path().join("src").join("config.js"),
        "module.exports = { password: 'hunter2' };\n",
    )
    .unwrap();

    let result = analyze_codebase(
        &context(Arc::new(MemoryTelemetry::new())),
        options(repo.path(), &testdata_path().join("config")),
    )
    .await
    .unwrap();
    let r = &result.xfi_result;

    assert_eq!(r.file_count, 5);
    assert_eq!(r.warning_count, 1);
    assert_eq!(r.fatality_count, 1);
    assert_eq!(r.total_issues, 2);

    let flagged = r
        .issue_details
        .iter()
        .find(|s| s.file_path == "src/config.js")
        .expect("config.js should be flagged");
    assert_eq!(flagged.errors[0].rule_failure, "sensitiveLogging-iterative");
    assert_eq!(flagged.errors[0].level, Level::Warning);
    assert_eq!(flagged.errors[0].details["file"], json!("src/config.js"));
}

#[tokio::test]
async fn test_json_report_envelope() {
    let result = analyze_codebase(
        &context(Arc::new(MemoryTelemetry::new())),
        options(&fixture_repo(), &testdata_path().join("config")),
    )
    .await
    .unwrap();

    let mut out = Vec::new();
    report::write_json(&mut out, &result).unwrap();
    let value: Value = serde_json::from_slice(&out).unwrap();
    let r = &value["XFI_RESULT"];

    assert_eq!(r["archetype"], json!("node-fullstack"));
    assert_eq!(r["fileCount"], json!(4));
    assert_eq!(r["fatalityCount"], json!(1));
    assert_eq!(r["issueDetails"][0]["filePath"], json!(REPO_GLOBAL_CHECK));
    assert_eq!(r["issueDetails"][0]["errors"][0]["level"], json!("fatality"));
    assert_eq!(r["repoUrl"], json!("https://github.com/org/node-app"));
    assert!(r.get("repoXFIConfig").is_some());
    assert!(r.get("startTime").is_some());
}

#[tokio::test]
async fn test_missing_config_reports_analysis_error() {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let empty = TempDir::new().unwrap();

    let err = analyze_codebase(&context(Arc::clone(&telemetry)), options(&fixture_repo(), empty.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, XfiError::ConfigResolution(_)));

    let events = telemetry.events_of("analysisError");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].metadata["archetype"], json!("node-fullstack"));
    assert!(events[0].metadata["message"]
        .as_str()
        .unwrap()
        .contains("no valid configuration found"));
}

#[tokio::test]
async fn test_cancelled_analysis_fails() {
    let mut opts = options(&fixture_repo(), &testdata_path().join("config"));
    opts.cancel = Some(Arc::new(AtomicBool::new(true)));

    let err = analyze_codebase(&context(Arc::new(MemoryTelemetry::new())), opts)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("analysis cancelled"));
}
