//! Rule evaluation engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Registry     │────▶│ EngineBuilder│────▶│ Engine       │
//! │ (facts, ops) │     └──────────────┘     │ (rules)      │
//! └──────────────┘             ▲            └──────┬───────┘
//!                              │                   │ per file
//!                        ExecutionConfig           ▼
//!                                           ┌──────────────┐
//!                                           │ Almanac      │
//!                                           │ (fact values)│
//!                                           └──────────────┘
//! ```
//!
//! An engine is immutable once built and holds no per-evaluation state, so
//! a single instance may evaluate many files concurrently.

mod almanac;
mod builder;
mod operators;
mod rule;

pub use almanac::{select_path, Almanac, RuntimeFacts};
pub use builder::EngineBuilder;
pub use operators::{default_operators, is_default_operator, DEFAULT_OPERATORS};
pub use rule::{validate_rule, Condition, FactCondition, Rule, RuleEvent, Scope};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, XfiError};
use crate::plugins::{Fact, Operator};

/// A rule whose conditions held for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredRule {
    pub rule: String,
    pub event_type: String,
    /// Event params with fact references replaced by their values
    pub params: Value,
}

impl FiredRule {
    /// Whether this failure must be reported to telemetry.
    pub fn is_reportable(&self) -> bool {
        matches!(self.event_type.as_str(), "violation" | "fatality")
    }
}

/// Callback invoked for every fired rule.
pub type EventHook = Arc<dyn Fn(&FiredRule) + Send + Sync>;

pub struct Engine {
    rules: Vec<Rule>,
    facts: HashMap<String, Arc<dyn Fact>>,
    operators: HashMap<String, Arc<dyn Operator>>,
    hooks: Vec<EventHook>,
    allow_undefined_facts: bool,
    log_prefix: String,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine holding only the default operators.
    pub fn new() -> Self {
        let mut engine = Self {
            rules: Vec::new(),
            facts: HashMap::new(),
            operators: HashMap::new(),
            hooks: Vec::new(),
            allow_undefined_facts: true,
            log_prefix: String::new(),
        };
        for op in default_operators() {
            engine.add_operator(op);
        }
        engine
    }

    /// Whether unknown facts resolve to null (default) or fail the rule.
    pub fn allow_undefined_facts(mut self, allow: bool) -> Self {
        self.allow_undefined_facts = allow;
        self
    }

    /// Prefix attached to evaluation log lines.
    pub fn log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    pub fn add_operator(&mut self, operator: Arc<dyn Operator>) {
        self.operators.insert(operator.name().to_string(), operator);
    }

    pub fn add_fact(&mut self, fact: Arc<dyn Fact>) {
        self.facts.insert(fact.name().to_string(), fact);
    }

    /// Add a rule, rejecting it if malformed or if it names an unknown operator.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        validate_rule(&rule)?;
        if let Some(op) = rule
            .operators()
            .into_iter()
            .find(|op| !self.operators.contains_key(*op))
        {
            return Err(XfiError::rule(
                &rule.name,
                format!("unknown operator {}", op),
            ));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn on_success(&mut self, hook: EventHook) {
        self.hooks.push(hook);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn has_fact(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Evaluate every rule of `scope` against one set of runtime facts.
    ///
    /// A rule that errors is logged and treated as not fired.
    pub fn run(&self, scope: Scope, runtime_facts: RuntimeFacts) -> Vec<FiredRule> {
        let almanac = Almanac::new(scope, &self.facts, runtime_facts, self.allow_undefined_facts);
        let mut fired = Vec::new();

        for rule in self.rules.iter().filter(|r| r.scope() == scope) {
            match self.evaluate_rule(rule, &almanac) {
                Ok(Some(event)) => {
                    for hook in &self.hooks {
                        hook(&event);
                    }
                    fired.push(event);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        prefix = %self.log_prefix,
                        rule = %rule.name,
                        error = %e,
                        "rule evaluation failed"
                    );
                }
            }
        }

        fired
    }

    fn evaluate_rule(&self, rule: &Rule, almanac: &Almanac) -> Result<Option<FiredRule>> {
        if !self.evaluate(&rule.conditions, almanac)? {
            return Ok(None);
        }
        let params = replace_fact_params(&rule.event.params, almanac)?;
        Ok(Some(FiredRule {
            rule: rule.name.clone(),
            event_type: rule.event.event_type.clone(),
            params,
        }))
    }

    fn evaluate(&self, condition: &Condition, almanac: &Almanac) -> Result<bool> {
        match condition {
            Condition::All { all } => {
                for c in all {
                    if !self.evaluate(c, almanac)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { any } => {
                for c in any {
                    if self.evaluate(c, almanac)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { not } => Ok(!self.evaluate(not, almanac)?),
            Condition::Leaf(leaf) => {
                let operator = self.operators.get(&leaf.operator).ok_or_else(|| {
                    XfiError::Evaluation(format!("unknown operator {}", leaf.operator))
                })?;
                let fact_value =
                    almanac.fact_value_at(&leaf.fact, leaf.params.as_ref(), leaf.path.as_deref())?;
                let compare_to = almanac.resolve_value(&leaf.value)?;
                operator.evaluate(&fact_value, &compare_to)
            }
        }
    }
}

fn replace_fact_params(params: &Value, almanac: &Almanac) -> Result<Value> {
    match params {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), almanac.resolve_value(v)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{FnFact, FnOperator};
    use serde_json::json;
    use std::sync::Mutex;

    fn rule(value: Value) -> Rule {
        Rule::from_value(value).unwrap()
    }

    fn file_facts(name: &str, content: &str) -> RuntimeFacts {
        let mut facts = RuntimeFacts::new();
        facts.insert(
            "fileData".to_string(),
            Arc::new(json!({"fileName": name, "fileContent": content})),
        );
        facts
    }

    #[test]
    fn test_fires_matching_rule() {
        let mut engine = Engine::new();
        engine
            .add_rule(rule(json!({
                "name": "indexOnly-iterative",
                "conditions": {"all": [
                    {"fact": "fileData", "path": "$.fileName", "operator": "equal", "value": "index.ts"}
                ]},
                "event": {"type": "warning", "params": {"message": "index file", "file": {"fact": "fileData", "path": "$.fileName"}}}
            })))
            .unwrap();

        let fired = engine.run(Scope::PerFile, file_facts("index.ts", ""));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].params["file"], json!("index.ts"));
        assert!(engine.run(Scope::PerFile, file_facts("other.ts", "")).is_empty());
    }

    #[test]
    fn test_scope_filters_rules() {
        let mut engine = Engine::new();
        engine
            .add_rule(rule(json!({
                "name": "always-global",
                "conditions": {"all": [{"fact": "fileData", "path": "$.fileName", "operator": "notEqual", "value": ""}]},
                "event": {"type": "fatality"}
            })))
            .unwrap();

        assert!(engine.run(Scope::PerFile, file_facts("a.ts", "")).is_empty());
        assert_eq!(
            engine
                .run(Scope::RepoGlobal, file_facts("REPO_GLOBAL_CHECK", ""))
                .len(),
            1
        );
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let mut engine = Engine::new();
        let err = engine
            .add_rule(rule(json!({
                "name": "bad-iterative",
                "conditions": {"all": [{"fact": "fileData", "operator": "noSuchOp", "value": 1}]},
                "event": {"type": "warning"}
            })))
            .unwrap_err();
        assert!(matches!(err, XfiError::RuleValidation { .. }));
        assert!(engine.rules().is_empty());
    }

    #[test]
    fn test_erroring_rule_does_not_stop_others() {
        let mut engine = Engine::new();
        engine.add_operator(FnOperator::new("explode", |_: &Value, _: &Value| {
            Err(XfiError::Evaluation("kaboom".to_string()))
        }));
        engine
            .add_rule(rule(json!({
                "name": "explodes-iterative",
                "conditions": {"all": [{"fact": "fileData", "operator": "explode", "value": 1}]},
                "event": {"type": "fatality"}
            })))
            .unwrap();
        engine
            .add_rule(rule(json!({
                "name": "fine-iterative",
                "conditions": {"any": [{"fact": "fileData", "path": "$.fileName", "operator": "equal", "value": "a.ts"}]},
                "event": {"type": "warning"}
            })))
            .unwrap();

        let fired = engine.run(Scope::PerFile, file_facts("a.ts", ""));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule, "fine-iterative");
    }

    #[test]
    fn test_log_prefix_is_carried() {
        assert_eq!(Engine::new().log_prefix, "");
        assert_eq!(Engine::new().log_prefix("run-7").log_prefix, "run-7");
    }

    #[test]
    fn test_reportable_failures() {
        let fired = |t: &str| FiredRule {
            rule: "r".to_string(),
            event_type: t.to_string(),
            params: Value::Null,
        };
        assert!(fired("violation").is_reportable());
        assert!(fired("fatality").is_reportable());
        assert!(!fired("warning").is_reportable());
        assert!(!fired("error").is_reportable());
    }

    #[test]
    fn test_hooks_and_dynamic_facts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut engine = Engine::new();
        engine.add_fact(FnFact::new("lineCount", |_: &Value, almanac: &Almanac| {
            let content = almanac.fact_value_at("fileData", None, Some("$.fileContent"))?;
            Ok(json!(content.as_str().unwrap_or("").lines().count()))
        }));
        engine.on_success(Arc::new(move |e: &FiredRule| {
            sink.lock().unwrap().push(e.rule.clone());
        }));
        engine
            .add_rule(rule(json!({
                "name": "long-iterative",
                "conditions": {"all": [{"fact": "lineCount", "operator": "greaterThan", "value": 2}]},
                "event": {"type": "violation"}
            })))
            .unwrap();

        engine.run(Scope::PerFile, file_facts("a.ts", "1\n2\n3\n"));
        engine.run(Scope::PerFile, file_facts("b.ts", "1\n"));
        assert_eq!(*seen.lock().unwrap(), vec!["long-iterative".to_string()]);
    }
}
