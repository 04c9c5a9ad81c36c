//! Per-evaluation fact store.
//!
//! An almanac lives for exactly one (file, engine) evaluation. Runtime facts
//! are supplied up front and shared between evaluations; registered facts
//! are computed on first use and memoized by `(name, params)`.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use super::Scope;
use crate::error::{Result, XfiError};
use crate::plugins::Fact;

/// Facts supplied by the caller for one evaluation.
pub type RuntimeFacts = HashMap<String, Arc<Value>>;

pub struct Almanac<'e> {
    scope: Scope,
    facts: &'e HashMap<String, Arc<dyn Fact>>,
    runtime: RuntimeFacts,
    cache: RefCell<HashMap<String, Arc<Value>>>,
    allow_undefined: bool,
}

impl<'e> Almanac<'e> {
    pub fn new(
        scope: Scope,
        facts: &'e HashMap<String, Arc<dyn Fact>>,
        runtime: RuntimeFacts,
        allow_undefined: bool,
    ) -> Self {
        Self {
            scope,
            facts,
            runtime,
            cache: RefCell::new(HashMap::new()),
            allow_undefined,
        }
    }

    /// Scope of the file being evaluated.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Resolve a fact value.
    pub fn fact_value(&self, name: &str, params: Option<&Value>) -> Result<Value> {
        Ok(self.shared_value(name, params)?.as_ref().clone())
    }

    fn shared_value(&self, name: &str, params: Option<&Value>) -> Result<Arc<Value>> {
        if let Some(v) = self.runtime.get(name) {
            return Ok(Arc::clone(v));
        }

        let params = params.cloned().unwrap_or(Value::Null);
        let key = format!("{}|{}", name, params);
        if let Some(v) = self.cache.borrow().get(&key) {
            return Ok(Arc::clone(v));
        }

        let fact = match self.facts.get(name) {
            Some(f) => Arc::clone(f),
            None if self.allow_undefined => {
                tracing::debug!(fact = name, "undefined fact resolved to null");
                return Ok(Arc::new(Value::Null));
            }
            None => return Err(XfiError::Evaluation(format!("undefined fact: {}", name))),
        };

        // compute outside the borrow: facts may read other facts
        let value = Arc::new(fact.compute(&params, self)?);
        self.cache.borrow_mut().insert(key, Arc::clone(&value));
        Ok(value)
    }

    /// Resolve a fact value and select into it with a path. Only the
    /// selected part is copied.
    pub fn fact_value_at(
        &self,
        name: &str,
        params: Option<&Value>,
        path: Option<&str>,
    ) -> Result<Value> {
        let value = self.shared_value(name, params)?;
        match path {
            Some(p) => Ok(select_path(&value, p).cloned().unwrap_or(Value::Null)),
            None => Ok(value.as_ref().clone()),
        }
    }

    /// Resolve `{"fact": ..., "params"?: ..., "path"?: ...}` references;
    /// any other value is returned unchanged.
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        match fact_reference(value) {
            Some((name, params, path)) => self.fact_value_at(name, params, path),
            None => Ok(value.clone()),
        }
    }
}

fn fact_reference(value: &Value) -> Option<(&str, Option<&Value>, Option<&str>)> {
    let obj = value.as_object()?;
    let name = obj.get("fact")?.as_str()?;
    if obj.keys().any(|k| k != "fact" && k != "params" && k != "path") {
        return None;
    }
    Some((
        name,
        obj.get("params"),
        obj.get("path").and_then(Value::as_str),
    ))
}

/// Select into a JSON value with a `$.a.b[0]` style path.
pub fn select_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let path = path.trim();
    let rest = path.strip_prefix('$').unwrap_or(path);
    let mut current = value;

    for segment in split_path(rest) {
        current = match segment {
            PathSegment::Key(k) => current.get(k.as_str())?,
            PathSegment::Index(i) => current.get(i)?,
        };
    }
    Some(current)
}

enum PathSegment {
    Key(String),
    Index(usize),
}

fn split_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                let inner = inner.trim();
                let quoted = inner.trim_matches(|c| c == '\'' || c == '"');
                match inner.parse::<usize>() {
                    Ok(i) => segments.push(PathSegment::Index(i)),
                    Err(_) => segments.push(PathSegment::Key(quoted.to_string())),
                }
            }
            _ => key.push(c),
        }
    }
    if !key.is_empty() {
        segments.push(PathSegment::Key(key));
    }
    segments
}
