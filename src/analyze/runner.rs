//! Per-file rule evaluation.

use rayon::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::files::FileData;
use super::types::{Level, RuleFailure, ScanResult};
use crate::deps::VersionData;
use crate::engine::{Engine, RuntimeFacts};
use crate::error::{Result, XfiError};
use crate::exemption::{is_exempt, Exemption, ExemptionQuery};
use crate::telemetry::{NoopTelemetry, Telemetry};

/// Set to `true` to stop an analysis between file evaluations.
pub type CancellationFlag = Arc<AtomicBool>;

/// Facts computed once per run and visible to every evaluation. Each
/// evaluation shares them by reference count.
#[derive(Debug, Clone, Default)]
pub struct ProcessFacts {
    pub dependency_data: Arc<Value>,
    pub standard_structure: Arc<Value>,
    pub global_file_metadata: Arc<Value>,
}

impl ProcessFacts {
    pub fn new(
        installed: &[VersionData],
        minimums: &BTreeMap<String, String>,
        standard_structure: Value,
        files: &[FileData],
    ) -> Self {
        let paths: Vec<&str> = files
            .iter()
            .filter(|f| !f.is_repo_global())
            .map(|f| f.relative_path.as_str())
            .collect();
        Self {
            dependency_data: Arc::new(json!({
                "installedDependencyVersions": installed,
                "minimumDependencyVersions": minimums,
            })),
            standard_structure: Arc::new(standard_structure),
            global_file_metadata: Arc::new(json!(paths)),
        }
    }

    fn runtime_facts(&self, file: &FileData) -> Result<RuntimeFacts> {
        let mut facts = RuntimeFacts::with_capacity(4);
        facts.insert("fileData".to_string(), Arc::new(serde_json::to_value(file)?));
        facts.insert("dependencyData".to_string(), Arc::clone(&self.dependency_data));
        facts.insert("standardStructure".to_string(), Arc::clone(&self.standard_structure));
        facts.insert(
            "globalFileMetadata".to_string(),
            Arc::clone(&self.global_file_metadata),
        );
        Ok(facts)
    }
}

pub struct AnalysisRunner<'a> {
    engine: &'a Engine,
    repo_url: String,
    exemptions: &'a [Exemption],
    telemetry: Arc<dyn Telemetry>,
    log_prefix: Option<String>,
    cancel: Option<CancellationFlag>,
}

impl<'a> AnalysisRunner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            repo_url: String::new(),
            exemptions: &[],
            telemetry: Arc::new(NoopTelemetry),
            log_prefix: None,
            cancel: None,
        }
    }

    pub fn exemptions(mut self, repo_url: impl Into<String>, exemptions: &'a [Exemption]) -> Self {
        self.repo_url = repo_url.into();
        self.exemptions = exemptions;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn log_prefix(mut self, prefix: Option<String>) -> Self {
        self.log_prefix = prefix;
        self
    }

    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Evaluate the engine once per file. Results keep the input order and
    /// include only files with at least one failure.
    pub fn run(&self, files: &[FileData], facts: &ProcessFacts) -> Result<Vec<ScanResult>> {
        let results: Vec<Option<ScanResult>> = files
            .par_iter()
            .map(|file| self.evaluate_file(file, facts))
            .collect::<Result<_>>()?;
        Ok(results.into_iter().flatten().collect())
    }

    fn evaluate_file(&self, file: &FileData, facts: &ProcessFacts) -> Result<Option<ScanResult>> {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return Err(XfiError::Evaluation("analysis cancelled".to_string()));
        }

        let prefix = self.log_prefix.as_deref().unwrap_or_default();
        let fired = self.engine.run(file.scope, facts.runtime_facts(file)?);
        if fired.is_empty() {
            return Ok(None);
        }

        let errors: Vec<RuleFailure> = fired
            .into_iter()
            .map(|event| {
                let query = ExemptionQuery {
                    repo_url: &self.repo_url,
                    rule_name: &event.rule,
                    exemptions: self.exemptions,
                    log_prefix: self.log_prefix.as_deref(),
                };
                let level = if is_exempt(&query, self.telemetry.as_ref()) {
                    Level::Exempt
                } else {
                    Level::from_event_type(&event.event_type)
                };
                tracing::debug!(prefix, file = %file.relative_path, rule = %event.rule, level = %level, "rule failed");
                RuleFailure {
                    rule_failure: event.rule,
                    level,
                    details: event.params,
                }
            })
            .collect();

        Ok(Some(ScanResult {
            file_path: file.relative_path.clone(),
            errors,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Rule, Scope};
    use crate::plugins::{CorePlugin, XfiPlugin};

    fn engine(rules: Vec<Value>) -> Engine {
        let mut engine = Engine::new();
        CorePlugin.operators().into_iter().for_each(|o| engine.add_operator(o));
        CorePlugin.facts().into_iter().for_each(|f| engine.add_fact(f));
        for r in rules {
            engine.add_rule(Rule::from_value(r).unwrap()).unwrap();
        }
        engine
    }

    fn file(rel: &str, content: &str) -> FileData {
        FileData {
            file_name: rel.rsplit('/').next().unwrap().to_string(),
            file_path: format!("/repo/{}", rel),
            relative_path: rel.to_string(),
            file_content: content.to_string(),
            scope: Scope::PerFile,
        }
    }

    fn logging_rule() -> Value {
        json!({
            "name": "sensitiveLogging-iterative",
            "conditions": {"all": [{"fact": "fileData", "path": "$.fileContent", "operator": "fileContains", "value": ["password"]}]},
            "event": {"type": "violation", "params": {"message": "password logged"}}
        })
    }

    #[test]
    fn test_only_failing_files_are_reported() {
        let engine = engine(vec![logging_rule()]);
        let files = vec![
            file("src/a.ts", "log(password)"),
            file("src/b.ts", "clean"),
            FileData::repo_global(),
        ];
        let facts = ProcessFacts::new(&[], &BTreeMap::new(), json!({}), &files);

        let results = AnalysisRunner::new(&engine).run(&files, &facts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "src/a.ts");
        assert_eq!(results[0].errors[0].level, Level::Error);
        assert_eq!(results[0].errors[0].details["message"], json!("password logged"));
    }

    #[test]
    fn test_global_metadata_excludes_sentinel() {
        let files = vec![file("src/a.ts", ""), FileData::repo_global()];
        let facts = ProcessFacts::new(&[], &BTreeMap::new(), json!({}), &files);
        assert_eq!(*facts.global_file_metadata, json!(["src/a.ts"]));
    }

    #[test]
    fn test_exempt_failures_change_level() {
        let engine = engine(vec![logging_rule()]);
        let files = vec![file("src/a.ts", "password")];
        let facts = ProcessFacts::new(&[], &BTreeMap::new(), json!({}), &files);
        let exemptions = vec![Exemption {
            repo_url: "https://github.com/org/repo".to_string(),
            rule: "sensitiveLogging-iterative".to_string(),
            expiration_date: "2999-01-01".to_string(),
            reason: None,
        }];

        let results = AnalysisRunner::new(&engine)
            .exemptions("git@github.com:org/repo.git", &exemptions)
            .run(&files, &facts)
            .unwrap();
        assert_eq!(results[0].errors[0].level, Level::Exempt);
    }

    #[test]
    fn test_cancelled_run_fails() {
        let engine = engine(vec![logging_rule()]);
        let files = vec![file("src/a.ts", "password")];
        let facts = ProcessFacts::new(&[], &BTreeMap::new(), json!({}), &files);
        let flag: CancellationFlag = Arc::new(AtomicBool::new(true));

        let err = AnalysisRunner::new(&engine)
            .cancellation(flag)
            .run(&files, &facts)
            .unwrap_err();
        assert!(err.to_string().contains("analysis cancelled"));
    }
}
