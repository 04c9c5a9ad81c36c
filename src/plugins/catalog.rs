//! Plugin lookup cascade.
//!
//! Plugins are compiled in and located by name through three tiers,
//! searched in order; the first tier that knows the name wins:
//!
//! 1. `Global` - plugins the host binary installs for every repository
//! 2. `Local` - plugins supplied for the repository being analyzed
//! 3. `Bundled` - sample plugins shipped with this crate

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{SimpleExamplePlugin, XfiPlugin};
use crate::error::{Result, XfiError};

/// Constructor for a plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn XfiPlugin> + Send + Sync>;

/// Where a plugin was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CatalogTier {
    Global,
    Local,
    Bundled,
}

impl CatalogTier {
    pub const SEARCH_ORDER: [CatalogTier; 3] =
        [CatalogTier::Global, CatalogTier::Local, CatalogTier::Bundled];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogTier::Global => "global",
            CatalogTier::Local => "local",
            CatalogTier::Bundled => "bundled",
        }
    }
}

impl std::fmt::Display for CatalogTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name-keyed plugin factories grouped by tier.
#[derive(Clone)]
pub struct PluginCatalog {
    tiers: BTreeMap<CatalogTier, BTreeMap<String, PluginFactory>>,
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginCatalog {
    /// Create a catalog holding only the bundled sample plugins.
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        catalog.install(
            CatalogTier::Bundled,
            SimpleExamplePlugin::NAME,
            Arc::new(|| Arc::new(SimpleExamplePlugin) as Arc<dyn XfiPlugin>),
        );
        catalog
    }

    /// Create a catalog with no plugins in any tier.
    pub fn empty() -> Self {
        Self {
            tiers: BTreeMap::new(),
        }
    }

    /// Make a plugin available under `name` in the given tier.
    pub fn install(&mut self, tier: CatalogTier, name: impl Into<String>, factory: PluginFactory) {
        self.tiers
            .entry(tier)
            .or_default()
            .insert(name.into(), factory);
    }

    /// Builder-style variant of [`install`](Self::install).
    pub fn with_plugin(
        mut self,
        tier: CatalogTier,
        name: impl Into<String>,
        factory: PluginFactory,
    ) -> Self {
        self.install(tier, name, factory);
        self
    }

    /// Locate a plugin by walking the tiers in search order.
    pub fn load(&self, name: &str) -> Result<(CatalogTier, Arc<dyn XfiPlugin>)> {
        for tier in CatalogTier::SEARCH_ORDER {
            match self.tiers.get(&tier).and_then(|t| t.get(name)) {
                Some(factory) => {
                    tracing::debug!(plugin = name, tier = tier.as_str(), "plugin located");
                    return Ok((tier, factory()));
                }
                None => {
                    tracing::debug!(plugin = name, tier = tier.as_str(), "plugin not in tier");
                }
            }
        }

        Err(XfiError::PluginLoad(format!(
            "plugin {} not found in global, local or bundled plugins",
            name
        )))
    }

    /// Names available in a tier.
    pub fn names(&self, tier: CatalogTier) -> Vec<String> {
        self.tiers
            .get(&tier)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    impl XfiPlugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn version(&self) -> &str {
            self.1
        }
    }

    fn factory(name: &'static str, version: &'static str) -> PluginFactory {
        Arc::new(move || Arc::new(Named(name, version)) as Arc<dyn XfiPlugin>)
    }

    #[test]
    fn test_bundled_sample_is_available() {
        let catalog = PluginCatalog::new();
        let (tier, plugin) = catalog.load(SimpleExamplePlugin::NAME).unwrap();
        assert_eq!(tier, CatalogTier::Bundled);
        assert_eq!(plugin.name(), SimpleExamplePlugin::NAME);
    }

    #[test]
    fn test_global_tier_wins() {
        let catalog = PluginCatalog::new()
            .with_plugin(CatalogTier::Local, "dup", factory("dup", "local"))
            .with_plugin(CatalogTier::Global, "dup", factory("dup", "global"));
        let (tier, plugin) = catalog.load("dup").unwrap();
        assert_eq!(tier, CatalogTier::Global);
        assert_eq!(plugin.version(), "global");
    }

    #[test]
    fn test_local_before_bundled() {
        let catalog = PluginCatalog::new().with_plugin(
            CatalogTier::Local,
            SimpleExamplePlugin::NAME,
            factory(SimpleExamplePlugin::NAME, "9.9.9"),
        );
        let (tier, plugin) = catalog.load(SimpleExamplePlugin::NAME).unwrap();
        assert_eq!(tier, CatalogTier::Local);
        assert_eq!(plugin.version(), "9.9.9");
    }

    #[test]
    fn test_missing_plugin_fails() {
        let catalog = PluginCatalog::new();
        let err = catalog.load("xfiPluginMissing").err().unwrap();
        assert!(matches!(err, XfiError::PluginLoad(_)));
    }
}
