//! Core traits for facts, operators and plugins.

use serde_json::Value;
use std::sync::Arc;

use crate::engine::Almanac;
use crate::error::Result;

/// A named value provider consumed by rule conditions.
///
/// Facts are computed lazily through the [`Almanac`] of the current
/// evaluation, so a fact may depend on other facts.
pub trait Fact: Send + Sync {
    /// Name used by rule conditions (e.g., "repoDependencyAnalysis").
    fn name(&self) -> &str;

    /// Compute the fact value for one evaluation.
    fn compute(&self, params: &Value, almanac: &Almanac) -> Result<Value>;
}

/// A named comparison used by condition leaves.
pub trait Operator: Send + Sync {
    /// Name used by rule conditions (e.g., "fileContains").
    fn name(&self) -> &str;

    /// Compare the resolved fact value against the condition's value.
    fn evaluate(&self, fact_value: &Value, compare_to: &Value) -> Result<bool>;
}

/// The single registration entry point every plugin implements.
pub trait XfiPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn facts(&self) -> Vec<Arc<dyn Fact>> {
        Vec::new()
    }

    fn operators(&self) -> Vec<Arc<dyn Operator>> {
        Vec::new()
    }

    /// Example rule documents shipped with the plugin.
    fn sample_rules(&self) -> Vec<Value> {
        Vec::new()
    }
}

type FactFn = dyn Fn(&Value, &Almanac) -> Result<Value> + Send + Sync;
type OperatorFn = dyn Fn(&Value, &Value) -> Result<bool> + Send + Sync;

/// A fact backed by a closure.
pub struct FnFact {
    name: String,
    f: Box<FactFn>,
}

impl FnFact {
    pub fn new<F>(name: impl Into<String>, f: F) -> Arc<dyn Fact>
    where
        F: Fn(&Value, &Almanac) -> Result<Value> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            f: Box::new(f),
        })
    }
}

impl Fact for FnFact {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, params: &Value, almanac: &Almanac) -> Result<Value> {
        (self.f)(params, almanac)
    }
}

/// An operator backed by a closure.
pub struct FnOperator {
    name: String,
    f: Box<OperatorFn>,
}

impl FnOperator {
    pub fn new<F>(name: impl Into<String>, f: F) -> Arc<dyn Operator>
    where
        F: Fn(&Value, &Value) -> Result<bool> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            f: Box::new(f),
        })
    }
}

impl Operator for FnOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, fact_value: &Value, compare_to: &Value) -> Result<bool> {
        (self.f)(fact_value, compare_to)
    }
}
