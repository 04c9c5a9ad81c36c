//! Declarative rule model.
//!
//! A rule pairs a condition tree with an event:
//!
//! ```json
//! {
//!   "name": "sensitiveLogging-iterative",
//!   "conditions": {"all": [{"fact": "fileData", "path": "$.fileContent",
//!                           "operator": "fileContains", "value": ["password"]}]},
//!   "event": {"type": "warning", "params": {"message": "sensitive data logged"}}
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, XfiError};

/// Which evaluation pass a rule or file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    /// Evaluated once for every collected file
    #[serde(alias = "iterative")]
    PerFile,
    /// Evaluated once for the whole repository
    #[serde(alias = "global")]
    RepoGlobal,
}

impl Scope {
    /// Infer a scope from the rule naming convention (`*-global`).
    pub fn from_rule_name(name: &str) -> Self {
        if name.ends_with("-global") {
            Scope::RepoGlobal
        } else {
            Scope::PerFile
        }
    }
}

/// A condition tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
    Leaf(FactCondition),
}

/// A `{fact, operator, value}` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCondition {
    pub fact: String,
    pub operator: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// JSONPath-style selector into the fact value, e.g. `$.fileContent`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The event a rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub params: Value,
}

/// A named condition/event pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub conditions: Condition,
    pub event: RuleEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl Rule {
    /// Decode and validate a rule document.
    pub fn from_value(value: Value) -> Result<Self> {
        let label = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        let rule: Rule =
            serde_json::from_value(value).map_err(|e| XfiError::rule(&label, e.to_string()))?;
        validate_rule(&rule)?;
        Ok(rule)
    }

    /// The declared scope, or the one implied by the rule name.
    pub fn scope(&self) -> Scope {
        self.scope
            .unwrap_or_else(|| Scope::from_rule_name(&self.name))
    }

    /// Every operator name used in the condition tree.
    pub fn operators(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_operators(&self.conditions, &mut out);
        out
    }
}

fn collect_operators<'a>(condition: &'a Condition, out: &mut Vec<&'a str>) {
    match condition {
        Condition::All { all: children } | Condition::Any { any: children } => {
            for c in children {
                collect_operators(c, out);
            }
        }
        Condition::Not { not } => collect_operators(not, out),
        Condition::Leaf(leaf) => out.push(leaf.operator.as_str()),
    }
}

/// Structural validation of a decoded rule.
pub fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(XfiError::rule("<unnamed>", "rule name is empty"));
    }
    if matches!(rule.conditions, Condition::Leaf(_)) {
        return Err(XfiError::rule(
            &rule.name,
            "top-level conditions must be an all, any or not block",
        ));
    }
    if rule.event.event_type.trim().is_empty() {
        return Err(XfiError::rule(&rule.name, "event type is empty"));
    }
    validate_condition(&rule.name, &rule.conditions)
}

fn validate_condition(rule: &str, condition: &Condition) -> Result<()> {
    match condition {
        Condition::All { all: children } | Condition::Any { any: children } => {
            if children.is_empty() {
                return Err(XfiError::rule(rule, "empty all/any block"));
            }
            children.iter().try_for_each(|c| validate_condition(rule, c))
        }
        Condition::Not { not } => validate_condition(rule, not),
        Condition::Leaf(leaf) => {
            if leaf.fact.is_empty() || leaf.operator.is_empty() {
                return Err(XfiError::rule(rule, "condition needs a fact and an operator"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "name": "noDatabases-iterative",
            "conditions": {
                "any": [
                    {"fact": "fileData", "path": "$.fileContent", "operator": "fileContains", "value": "oracle"},
                    {"not": {"fact": "fileData", "path": "$.fileName", "operator": "equal", "value": "README.md"}}
                ]
            },
            "event": {"type": "warning", "params": {"message": "database usage"}}
        })
    }

    #[test]
    fn test_parse_nested_conditions() {
        let rule = Rule::from_value(sample()).unwrap();
        assert_eq!(rule.scope(), Scope::PerFile);
        assert_eq!(rule.operators(), vec!["fileContains", "equal"]);
        match &rule.conditions {
            Condition::Any { any } => {
                assert!(matches!(any[0], Condition::Leaf(_)));
                assert!(matches!(any[1], Condition::Not { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scope_inference_and_override() {
        let mut value = sample();
        value["name"] = json!("outdatedFramework-global");
        assert_eq!(Rule::from_value(value.clone()).unwrap().scope(), Scope::RepoGlobal);

        value["scope"] = json!("perFile");
        assert_eq!(Rule::from_value(value.clone()).unwrap().scope(), Scope::PerFile);

        value["scope"] = json!("global");
        assert_eq!(Rule::from_value(value).unwrap().scope(), Scope::RepoGlobal);
    }

    #[test]
    fn test_rejects_empty_block() {
        let value = json!({
            "name": "broken",
            "conditions": {"all": []},
            "event": {"type": "warning"}
        });
        let err = Rule::from_value(value).unwrap_err();
        assert!(matches!(err, XfiError::RuleValidation { ref rule, .. } if rule == "broken"));
    }

    #[test]
    fn test_rejects_leaf_at_top_level() {
        let value = json!({
            "name": "bare-leaf",
            "conditions": {"fact": "fileData", "operator": "equal", "value": 1},
            "event": {"type": "warning"}
        });
        assert!(Rule::from_value(value).is_err());
    }

    #[test]
    fn test_rejects_missing_event() {
        let value = json!({"name": "no-event", "conditions": {"all": []}});
        let err = Rule::from_value(value).unwrap_err();
        assert!(err.to_string().contains("no-event"));
    }
}
