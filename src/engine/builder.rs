//! Assembles a fresh engine for one analysis run.

use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Engine, FiredRule, Rule};
use crate::archetype::Archetype;
use crate::plugins::{FeatureFlags, PluginRegistry};
use crate::telemetry::{Telemetry, TelemetryEvent};

pub struct EngineBuilder<'a> {
    registry: &'a PluginRegistry,
    features: FeatureFlags,
    telemetry: Option<Arc<dyn Telemetry>>,
    archetype_name: String,
    log_prefix: Option<String>,
}

impl<'a> EngineBuilder<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self {
            registry,
            features: FeatureFlags::default(),
            telemetry: None,
            archetype_name: String::new(),
            log_prefix: None,
        }
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn log_prefix(mut self, prefix: Option<String>) -> Self {
        self.log_prefix = prefix;
        self
    }

    /// Build an engine with the archetype's operators and facts, every
    /// plugin-contributed operator and fact, and the given rules.
    ///
    /// Rules the engine rejects are logged and skipped.
    pub fn build(mut self, archetype: &Archetype, rules: &[Rule]) -> Engine {
        self.archetype_name = archetype.name.clone();
        let prefix = self.log_prefix.clone().unwrap_or_default();
        let mut engine = Engine::new().log_prefix(prefix.clone());

        let operator_names: BTreeSet<String> = archetype
            .operators
            .iter()
            .cloned()
            .chain(self.registry.plugin_operator_names())
            .collect();
        for name in &operator_names {
            if !self.features.allows(name) {
                tracing::info!(prefix = %prefix, operator = %name, "operator disabled by feature flags");
                continue;
            }
            match self.registry.operator(name) {
                Some(op) => engine.add_operator(op),
                None if engine.has_operator(name) => {}
                None => tracing::warn!(prefix = %prefix, operator = %name, "operator not registered"),
            }
        }

        let fact_names: BTreeSet<String> = archetype
            .facts
            .iter()
            .cloned()
            .chain(self.registry.plugin_fact_names())
            .collect();
        for name in &fact_names {
            if !self.features.allows(name) {
                tracing::info!(prefix = %prefix, fact = %name, "fact disabled by feature flags");
                continue;
            }
            match self.registry.fact(name) {
                Some(fact) => engine.add_fact(fact),
                None => tracing::warn!(prefix = %prefix, fact = %name, "fact not registered"),
            }
        }

        for rule in rules {
            let name = rule.name.clone();
            if let Err(e) = engine.add_rule(rule.clone()) {
                tracing::error!(prefix = %prefix, rule = %name, error = %e, "rule rejected by engine");
            }
        }

        if let Some(telemetry) = self.telemetry.take() {
            let archetype_name = self.archetype_name.clone();
            engine.on_success(Arc::new(move |event: &FiredRule| {
                if event.is_reportable() {
                    telemetry.send(TelemetryEvent::new(
                        "ruleFailure",
                        json!({
                            "archetype": archetype_name,
                            "rule": event.rule,
                            "type": event.event_type,
                            "params": event.params,
                        }),
                    ));
                }
            }));
        }

        tracing::debug!(
            prefix = %prefix,
            archetype = %archetype.name,
            rules = engine.rules().len(),
            "engine assembled"
        );
        engine
    }
}
