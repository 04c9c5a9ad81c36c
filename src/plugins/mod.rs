//! Plugin registry for facts and operators.
//!
//! Facts and operators come from two places:
//! - the built-in core plugin (`builtin`), registered when a context is created
//! - plugins located through the [`PluginCatalog`] during config resolution
//!
//! The registry is append-only during a run. Name collisions follow the
//! configured [`DuplicatePolicy`].

mod builtin;
mod catalog;
mod sample;
mod traits;

pub use builtin::{CorePlugin, CORE_PLUGIN_NAME};
pub use catalog::{CatalogTier, PluginCatalog, PluginFactory};
pub use sample::SimpleExamplePlugin;
pub use traits::{Fact, FnFact, FnOperator, Operator, XfiPlugin};

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Result, XfiError};

/// Name prefix reserved for AI-assisted facts and operators.
pub const OPENAI_PREFIX: &str = "openai";

/// What happens when a plugin registers a fact or operator name that is
/// already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Last registration wins
    #[default]
    Override,
    /// Registration fails with a plugin load error
    Reject,
}

/// Feature toggles that gate reserved-prefix facts and operators.
#[derive(Debug, Clone, Default)]
pub struct FeatureFlags {
    pub openai_enabled: bool,
    pub openai_api_key: Option<String>,
}

impl FeatureFlags {
    /// Whether a fact or operator with this name may be added to an engine.
    pub fn allows(&self, name: &str) -> bool {
        if !name.starts_with(OPENAI_PREFIX) {
            return true;
        }
        self.openai_enabled
            && self
                .openai_api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false)
    }
}

/// Name and version of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
}

struct Registered<T: ?Sized> {
    origin: String,
    item: Arc<T>,
}

impl<T: ?Sized> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin.clone(),
            item: Arc::clone(&self.item),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    plugins: Vec<PluginInfo>,
    facts: BTreeMap<String, Registered<dyn Fact>>,
    operators: BTreeMap<String, Registered<dyn Operator>>,
}

/// Process-wide store of facts and operators.
pub struct PluginRegistry {
    policy: DuplicatePolicy,
    state: RwLock<RegistryState>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

impl PluginRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Create a registry that already holds the core plugin.
    pub fn with_core(policy: DuplicatePolicy) -> Result<Self> {
        let registry = Self::new(policy);
        registry.register(&CorePlugin)?;
        Ok(registry)
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Register every fact and operator a plugin exports.
    ///
    /// Registering a plugin whose name is already present is a no-op. Under
    /// [`DuplicatePolicy::Reject`] nothing is registered if any name collides.
    pub fn register(&self, plugin: &dyn XfiPlugin) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| XfiError::PluginLoad("plugin registry lock poisoned".to_string()))?;

        if state.plugins.iter().any(|p| p.name == plugin.name()) {
            tracing::debug!(plugin = plugin.name(), "plugin already registered");
            return Ok(());
        }

        let facts = plugin.facts();
        let operators = plugin.operators();

        if self.policy == DuplicatePolicy::Reject {
            if let Some(f) = facts.iter().find(|f| state.facts.contains_key(f.name())) {
                return Err(XfiError::PluginLoad(format!(
                    "plugin {} redefines fact {} from {}",
                    plugin.name(),
                    f.name(),
                    state.facts[f.name()].origin
                )));
            }
            if let Some(o) = operators
                .iter()
                .find(|o| state.operators.contains_key(o.name()))
            {
                return Err(XfiError::PluginLoad(format!(
                    "plugin {} redefines operator {} from {}",
                    plugin.name(),
                    o.name(),
                    state.operators[o.name()].origin
                )));
            }
        }

        for fact in facts {
            let name = fact.name().to_string();
            if let Some(prev) = state.facts.get(&name) {
                tracing::warn!(
                    fact = %name,
                    previous = %prev.origin,
                    plugin = plugin.name(),
                    "fact overridden by later registration"
                );
            }
            state.facts.insert(
                name,
                Registered {
                    origin: plugin.name().to_string(),
                    item: fact,
                },
            );
        }

        for operator in operators {
            let name = operator.name().to_string();
            if let Some(prev) = state.operators.get(&name) {
                tracing::warn!(
                    operator = %name,
                    previous = %prev.origin,
                    plugin = plugin.name(),
                    "operator overridden by later registration"
                );
            }
            state.operators.insert(
                name,
                Registered {
                    origin: plugin.name().to_string(),
                    item: operator,
                },
            );
        }

        state.plugins.push(PluginInfo {
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
        });
        tracing::info!(
            plugin = plugin.name(),
            version = plugin.version(),
            "registered plugin"
        );

        Ok(())
    }

    /// All registered facts, ordered by name.
    pub fn facts_of(&self) -> Vec<Arc<dyn Fact>> {
        self.read()
            .map(|s| s.facts.values().map(|r| Arc::clone(&r.item)).collect())
            .unwrap_or_default()
    }

    /// All registered operators, ordered by name.
    pub fn operators_of(&self) -> Vec<Arc<dyn Operator>> {
        self.read()
            .map(|s| s.operators.values().map(|r| Arc::clone(&r.item)).collect())
            .unwrap_or_default()
    }

    pub fn fact(&self, name: &str) -> Option<Arc<dyn Fact>> {
        self.read()?.facts.get(name).map(|r| Arc::clone(&r.item))
    }

    pub fn operator(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.read()?.operators.get(name).map(|r| Arc::clone(&r.item))
    }

    /// Name of the plugin that supplied a fact.
    pub fn fact_origin(&self, name: &str) -> Option<String> {
        self.read()?.facts.get(name).map(|r| r.origin.clone())
    }

    /// Name of the plugin that supplied an operator.
    pub fn operator_origin(&self, name: &str) -> Option<String> {
        self.read()?.operators.get(name).map(|r| r.origin.clone())
    }

    /// Facts contributed by plugins other than the core plugin.
    pub fn plugin_fact_names(&self) -> Vec<String> {
        self.read()
            .map(|s| {
                s.facts
                    .iter()
                    .filter(|(_, r)| r.origin != CORE_PLUGIN_NAME)
                    .map(|(n, _)| n.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Operators contributed by plugins other than the core plugin.
    pub fn plugin_operator_names(&self) -> Vec<String> {
        self.read()
            .map(|s| {
                s.operators
                    .iter()
                    .filter(|(_, r)| r.origin != CORE_PLUGIN_NAME)
                    .map(|(n, _)| n.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.read().map(|s| s.plugins.clone()).unwrap_or_default()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.read()
            .map(|s| s.plugins.iter().any(|p| p.name == name))
            .unwrap_or(false)
    }

    fn read(&self) -> Option<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state.read().ok()
    }
}
