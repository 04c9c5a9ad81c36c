//! Process-wide collaborators, created once and passed by reference.

use std::sync::Arc;

use crate::config::{ConfigResolver, RemoteConfigClient, RemoteSettings};
use crate::deps::{CommandLister, DependencyLister};
use crate::error::Result;
use crate::plugins::{DuplicatePolicy, PluginCatalog, PluginRegistry};
use crate::telemetry::{Telemetry, TracingTelemetry};

pub struct XfiContext {
    pub registry: Arc<PluginRegistry>,
    pub resolver: ConfigResolver,
    pub telemetry: Arc<dyn Telemetry>,
    pub lister: Arc<dyn DependencyLister>,
}

impl XfiContext {
    pub fn builder() -> XfiContextBuilder {
        XfiContextBuilder::default()
    }

    /// Context with the bundled catalog, tracing telemetry and real
    /// package-manager commands.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }
}

#[derive(Default)]
pub struct XfiContextBuilder {
    policy: DuplicatePolicy,
    catalog: Option<PluginCatalog>,
    telemetry: Option<Arc<dyn Telemetry>>,
    remote: Option<RemoteSettings>,
    lister: Option<Arc<dyn DependencyLister>>,
}

impl XfiContextBuilder {
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn remote_settings(mut self, settings: RemoteSettings) -> Self {
        self.remote = Some(settings);
        self
    }

    pub fn dependency_lister(mut self, lister: Arc<dyn DependencyLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn build(self) -> Result<XfiContext> {
        let registry = Arc::new(PluginRegistry::with_core(self.policy)?);
        let catalog = Arc::new(self.catalog.unwrap_or_default());
        let remote = RemoteConfigClient::new(self.remote.unwrap_or_default())?;

        Ok(XfiContext {
            resolver: ConfigResolver::new(Arc::clone(&registry), catalog, remote),
            registry,
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(TracingTelemetry)),
            lister: self.lister.unwrap_or_else(|| Arc::new(CommandLister)),
        })
    }
}
