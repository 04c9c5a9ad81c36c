//! Bundled example plugin.

use serde_json::{json, Value};
use std::sync::Arc;

use super::{Fact, FnFact, FnOperator, Operator, XfiPlugin};

/// Counts lines in the active file and flags files above a threshold.
pub struct SimpleExamplePlugin;

impl SimpleExamplePlugin {
    pub const NAME: &'static str = "xfiPluginSimpleExample";
}

impl XfiPlugin for SimpleExamplePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn facts(&self) -> Vec<Arc<dyn Fact>> {
        vec![FnFact::new("customFact", |_: &Value, almanac| {
            let content = almanac.fact_value_at("fileData", None, Some("$.fileContent"))?;
            let lines = content.as_str().map(|c| c.lines().count()).unwrap_or(0);
            Ok(json!({"lineCount": lines}))
        })]
    }

    fn operators(&self) -> Vec<Arc<dyn Operator>> {
        vec![FnOperator::new(
            "customOperator",
            |fact: &Value, threshold: &Value| {
                let lines = fact.get("lineCount").and_then(Value::as_u64).unwrap_or(0);
                Ok(threshold.as_u64().map(|t| lines > t).unwrap_or(false))
            },
        )]
    }

    fn sample_rules(&self) -> Vec<Value> {
        vec![json!({
            "name": "customRule-iterative",
            "conditions": {
                "all": [
                    {"fact": "customFact", "operator": "customOperator", "value": 500}
                ]
            },
            "event": {
                "type": "warning",
                "params": {"message": "file exceeds 500 lines", "details": {"fact": "customFact"}}
            }
        })]
    }
}
