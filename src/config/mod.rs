//! Configuration resolution.
//!
//! [`ConfigResolver::resolve`] turns [`ResolveOptions`] into an
//! [`ExecutionConfig`]:
//!
//! 1. The archetype is fetched from the config server if one is set, else
//!    read from the local config directory.
//! 2. The repository override `.xfi-config.json` is read and its extra
//!    facts and operators are merged into the archetype.
//! 3. Plugins are located and registered: caller plugins, then archetype
//!    plugins, then repository plugins.
//! 4. Rules are loaded and validated one by one; invalid rules are dropped.
//! 5. Exemptions are loaded; missing sources give an empty list.
//!
//! Resolved configs are cached for the lifetime of the resolver.

pub mod exemptions;
pub mod local;
pub mod remote;
pub mod repo_config;

pub use remote::{RemoteConfigClient, RemoteSettings};
pub use repo_config::{AdditionalRule, RepoXfiConfig, REPO_CONFIG_FILE};

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use crate::archetype::Archetype;
use crate::engine::{is_default_operator, Rule};
use crate::error::{Result, XfiError};
use crate::exemption::Exemption;
use crate::plugins::{FeatureFlags, PluginCatalog, PluginRegistry};

/// Caller-supplied parameters for one resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub archetype: String,
    pub config_server: Option<String>,
    pub local_config_path: Option<PathBuf>,
    pub execution_log_prefix: Option<String>,
    /// Plugins loaded before any the archetype declares
    pub plugins: Vec<String>,
    /// Repository whose `.xfi-config.json` participates
    pub repo_path: Option<PathBuf>,
    pub features: FeatureFlags,
}

impl ResolveOptions {
    pub fn new(archetype: impl Into<String>) -> Self {
        Self {
            archetype: archetype.into(),
            ..Default::default()
        }
    }

    pub fn prefix(&self) -> &str {
        self.execution_log_prefix.as_deref().unwrap_or_default()
    }

    fn cache_key(&self) -> String {
        match &self.repo_path {
            Some(repo) => format!("{}|{}", self.archetype, repo.display()),
            None => self.archetype.clone(),
        }
    }
}

/// Everything an analysis run needs, fully resolved.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub archetype: Archetype,
    pub rules: Vec<Rule>,
    pub exemptions: Vec<Exemption>,
    pub cli_options: ResolveOptions,
    pub repo_config: RepoXfiConfig,
}

type CacheSlot = Arc<OnceCell<Arc<ExecutionConfig>>>;

/// Where the archetype, its rules and its exemptions are read from. A
/// config server takes precedence over a local directory.
#[derive(Clone, Copy)]
enum Source<'o> {
    Remote(&'o str),
    Local(&'o Path),
}

impl<'o> Source<'o> {
    fn of(options: &'o ResolveOptions) -> Result<Self> {
        match (&options.config_server, &options.local_config_path) {
            (Some(server), _) => Ok(Source::Remote(server)),
            (None, Some(root)) => Ok(Source::Local(root)),
            (None, None) => Err(XfiError::ConfigResolution(format!(
                "no valid configuration found for archetype {}",
                options.archetype
            ))),
        }
    }
}

pub struct ConfigResolver {
    registry: Arc<PluginRegistry>,
    catalog: Arc<PluginCatalog>,
    remote: RemoteConfigClient,
    cache: Mutex<HashMap<String, CacheSlot>>,
}

impl ConfigResolver {
    pub fn new(
        registry: Arc<PluginRegistry>,
        catalog: Arc<PluginCatalog>,
        remote: RemoteConfigClient,
    ) -> Self {
        Self {
            registry,
            catalog,
            remote,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Resolve an archetype, returning the cached instance when the same
    /// archetype (and repository) was resolved before.
    ///
    /// Concurrent calls for the same key wait for a single load; a failed
    /// load is not cached.
    pub async fn resolve(&self, options: &ResolveOptions) -> Result<Arc<ExecutionConfig>> {
        let slot = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| XfiError::ConfigResolution("config cache lock poisoned".to_string()))?;
            Arc::clone(cache.entry(options.cache_key()).or_default())
        };

        if let Some(config) = slot.get() {
            tracing::debug!(prefix = options.prefix(), archetype = %options.archetype, "using cached config");
            return Ok(Arc::clone(config));
        }

        let config = slot.get_or_try_init(|| self.load(options)).await?;
        Ok(Arc::clone(config))
    }

    /// Forget every cached config.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    async fn load(&self, options: &ResolveOptions) -> Result<Arc<ExecutionConfig>> {
        let prefix = options.prefix();
        let name = options.archetype.as_str();

        let source = Source::of(options)?;
        let mut archetype = match source {
            Source::Remote(server) => {
                tracing::info!(prefix, archetype = name, server, "fetching remote archetype");
                self.remote.fetch_archetype(server, name).await?
            }
            Source::Local(root) => {
                tracing::info!(prefix, archetype = name, dir = %root.display(), "reading local archetype");
                local::load_archetype(root, name)?
            }
        };

        let repo_config = options
            .repo_path
            .as_deref()
            .map(|repo| RepoXfiConfig::load(repo, prefix))
            .unwrap_or_default();
        merge_names(&mut archetype.facts, &repo_config.additional_facts);
        merge_names(&mut archetype.operators, &repo_config.additional_operators);

        let plugin_rules = self.load_plugins(
            options
                .plugins
                .iter()
                .chain(&archetype.plugins)
                .chain(&repo_config.additional_plugins),
            prefix,
        )?;

        let mut documents = Vec::new();
        for rule_name in &archetype.rules {
            let fetched = match plugin_rules.get(rule_name) {
                Some(doc) => Ok(doc.clone()),
                None => match source {
                    Source::Remote(server) => self.remote.fetch_rule(server, name, rule_name).await,
                    Source::Local(root) => local::load_rule(root, rule_name),
                },
            };
            match fetched {
                Ok(doc) => documents.push(doc),
                Err(e) => tracing::warn!(prefix, rule = %rule_name, error = %e, "dropping rule"),
            }
        }
        if let Some(repo) = options.repo_path.as_deref() {
            documents.extend(
                repo_config::expand_additional_rules(
                    repo,
                    &repo_config.additional_rules,
                    &self.remote,
                    prefix,
                )
                .await,
            );
        }
        let requested = documents.len();
        let rules = self.validate_rules(documents, prefix);

        let exemptions = match source {
            Source::Remote(server) => match self.remote.fetch_exemptions(server, name).await {
                Ok(list) => list,
                Err(e) => {
                    tracing::warn!(prefix, archetype = name, error = %e, "no remote exemptions; continuing without exemptions");
                    Vec::new()
                }
            },
            Source::Local(root) => exemptions::load_local(root, name, prefix),
        };

        tracing::info!(
            prefix,
            archetype = name,
            rules = rules.len(),
            dropped = requested - rules.len(),
            exemptions = exemptions.len(),
            "configuration resolved"
        );

        Ok(Arc::new(ExecutionConfig {
            archetype,
            rules,
            exemptions,
            cli_options: options.clone(),
            repo_config,
        }))
    }

    /// Locate and register plugins in order, returning the rules they ship
    /// keyed by rule name.
    fn load_plugins<'n>(
        &self,
        names: impl Iterator<Item = &'n String>,
        prefix: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let mut seen: Vec<&str> = Vec::new();
        let mut shipped = BTreeMap::new();

        for name in names {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);

            let (tier, plugin) = self.catalog.load(name)?;
            self.registry.register(plugin.as_ref())?;
            tracing::info!(prefix, plugin = %name, tier = tier.as_str(), "plugin loaded");

            for doc in plugin.sample_rules() {
                if let Some(rule_name) = doc.get("name").and_then(Value::as_str) {
                    shipped.insert(rule_name.to_string(), doc.clone());
                }
            }
        }

        Ok(shipped)
    }

    /// Keep the documents that decode into valid rules using only known
    /// operators.
    fn validate_rules(&self, documents: Vec<Value>, prefix: &str) -> Vec<Rule> {
        let mut rules = Vec::new();
        for doc in documents {
            let rule = Rule::from_value(doc).and_then(|rule| {
                let unknown = rule
                    .operators()
                    .into_iter()
                    .find(|op| !is_default_operator(op) && self.registry.operator(op).is_none())
                    .map(str::to_string);
                match unknown {
                    Some(op) => Err(XfiError::rule(&rule.name, format!("unknown operator {}", op))),
                    None => Ok(rule),
                }
            });
            match rule {
                Ok(rule) if rules.iter().any(|r: &Rule| r.name == rule.name) => {
                    tracing::warn!(prefix, rule = %rule.name, "duplicate rule name; keeping the first");
                }
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!(prefix, error = %e, "dropping invalid rule"),
            }
        }
        rules
    }
}

fn merge_names(target: &mut Vec<String>, extra: &[String]) {
    for name in extra {
        if !target.contains(name) {
            target.push(name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{DuplicatePolicy, SimpleExamplePlugin};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn resolver() -> ConfigResolver {
        ConfigResolver::new(
            Arc::new(PluginRegistry::with_core(DuplicatePolicy::Override).unwrap()),
            Arc::new(PluginCatalog::new()),
            RemoteConfigClient::new(RemoteSettings::default()).unwrap(),
        )
    }

    fn write_config(dir: &std::path::Path, rules: &[&str], plugins: &[&str]) {
        let archetype = json!({
            "name": "node-fullstack",
            "rules": rules,
            "operators": ["fileContains"],
            "facts": [],
            "plugins": plugins,
            "config": {
                "minimumDependencyVersions": {},
                "standardStructure": {},
                "blacklistPatterns": [],
                "whitelistPatterns": []
            }
        });
        fs::write(dir.join("node-fullstack.json"), archetype.to_string()).unwrap();
        fs::create_dir_all(dir.join("rules")).unwrap();
    }

    fn write_rule(dir: &std::path::Path, name: &str, body: Value) {
        fs::write(dir.join("rules").join(format!("{}-rule.json", name)), body.to_string()).unwrap();
    }

    fn options(dir: &std::path::Path) -> ResolveOptions {
        ResolveOptions {
            local_config_path: Some(dir.to_path_buf()),
            ..ResolveOptions::new("node-fullstack")
        }
    }

    #[tokio::test]
    async fn test_no_source_fails() {
        let err = resolver()
            .resolve(&ResolveOptions::new("node-fullstack"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no valid configuration found"));
    }

    #[tokio::test]
    async fn test_plugin_rules_and_unknown_operators() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            &["customRule-iterative", "usesAiOp-iterative"],
            &[SimpleExamplePlugin::NAME],
        );
        write_rule(
            dir.path(),
            "usesAiOp-iterative",
            json!({
                "name": "usesAiOp-iterative",
                "conditions": {"all": [{"fact": "fileData", "operator": "openaiAnalysisHighSeverity", "value": true}]},
                "event": {"type": "warning"}
            }),
        );

        let resolver = resolver();
        let config = resolver.resolve(&options(dir.path())).await.unwrap();
        let names: Vec<&str> = config.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["customRule-iterative"]);
        assert!(resolver.registry().has_plugin(SimpleExamplePlugin::NAME));
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), &[], &["xfiPluginMissing"]);

        let err = resolver().resolve(&options(dir.path())).await.unwrap_err();
        assert!(matches!(err, XfiError::PluginLoad(_)));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver();
        assert!(resolver.resolve(&options(dir.path())).await.is_err());

        write_config(dir.path(), &[], &[]);
        assert!(resolver.resolve(&options(dir.path())).await.is_ok());
    }

    #[tokio::test]
    async fn test_repo_config_merges_facts_and_operators() {
        let config_dir = TempDir::new().unwrap();
        write_config(config_dir.path(), &[], &[]);
        let repo = TempDir::new().unwrap();
        fs::write(
            repo.path().join(REPO_CONFIG_FILE),
            json!({
                "additionalOperators": ["regexMatch", "fileContains"],
                "additionalFacts": ["customFact"],
                "additionalRules": [{
                    "name": "noTodo-iterative",
                    "conditions": {"all": [{"fact": "fileData", "path": "$.fileContent", "operator": "regexMatch", "value": "TODO"}]},
                    "event": {"type": "warning"}
                }]
            })
            .to_string(),
        )
        .unwrap();

        let options = ResolveOptions {
            repo_path: Some(repo.path().to_path_buf()),
            ..options(config_dir.path())
        };
        let config = resolver().resolve(&options).await.unwrap();
        assert_eq!(config.archetype.operators, vec!["fileContains", "regexMatch"]);
        assert_eq!(config.archetype.facts, vec!["customFact"]);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].name, "noTodo-iterative");
    }
}
