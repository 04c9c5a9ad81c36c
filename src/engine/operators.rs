//! Comparison operators every engine starts with.

use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::plugins::{FnOperator, Operator};

/// Names of the default operators.
pub const DEFAULT_OPERATORS: &[&str] = &[
    "equal",
    "notEqual",
    "in",
    "notIn",
    "contains",
    "doesNotContain",
    "lessThan",
    "lessThanInclusive",
    "greaterThan",
    "greaterThanInclusive",
];

pub fn is_default_operator(name: &str) -> bool {
    DEFAULT_OPERATORS.contains(&name)
}

/// Build the default operator set.
pub fn default_operators() -> Vec<Arc<dyn Operator>> {
    vec![
        FnOperator::new("equal", |a: &Value, b: &Value| Ok(a == b)),
        FnOperator::new("notEqual", |a: &Value, b: &Value| Ok(a != b)),
        FnOperator::new("in", |a: &Value, b: &Value| Ok(member_of(a, b))),
        FnOperator::new("notIn", |a: &Value, b: &Value| Ok(!member_of(a, b))),
        FnOperator::new("contains", |a: &Value, b: &Value| Ok(contains(a, b))),
        FnOperator::new("doesNotContain", |a: &Value, b: &Value| Ok(!contains(a, b))),
        numeric("lessThan", |a, b| a < b),
        numeric("lessThanInclusive", |a, b| a <= b),
        numeric("greaterThan", |a, b| a > b),
        numeric("greaterThanInclusive", |a, b| a >= b),
    ]
}

fn member_of(needle: &Value, haystack: &Value) -> bool {
    haystack
        .as_array()
        .map(|items| items.contains(needle))
        .unwrap_or(false)
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), _) => items.contains(needle),
        (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
        _ => false,
    }
}

fn numeric(name: &'static str, cmp: fn(f64, f64) -> bool) -> Arc<dyn Operator> {
    FnOperator::new(name, move |a: &Value, b: &Value| -> Result<bool> {
        Ok(match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(name: &str, a: Value, b: Value) -> bool {
        default_operators()
            .into_iter()
            .find(|o| o.name() == name)
            .unwrap()
            .evaluate(&a, &b)
            .unwrap()
    }

    #[test]
    fn test_equality() {
        assert!(eval("equal", json!("REPO_GLOBAL_CHECK"), json!("REPO_GLOBAL_CHECK")));
        assert!(eval("notEqual", json!(1), json!(2)));
    }

    #[test]
    fn test_membership() {
        assert!(eval("in", json!("b"), json!(["a", "b"])));
        assert!(eval("notIn", json!("c"), json!(["a", "b"])));
        assert!(!eval("in", json!("a"), json!("a")));
        assert!(eval("contains", json!(["x", "y"]), json!("y")));
        assert!(eval("contains", json!("hello world"), json!("world")));
        assert!(eval("doesNotContain", json!(["x"]), json!("y")));
    }

    #[test]
    fn test_numeric() {
        assert!(eval("lessThan", json!(1), json!(2)));
        assert!(eval("lessThanInclusive", json!(2), json!(2)));
        assert!(eval("greaterThan", json!(2.5), json!(2)));
        assert!(eval("greaterThanInclusive", json!(2), json!(2)));
        assert!(!eval("greaterThan", json!("3"), json!(2)));
    }

    #[test]
    fn test_names_match_table() {
        let names: Vec<String> = default_operators()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        assert_eq!(names, DEFAULT_OPERATORS);
    }
}
