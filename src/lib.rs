//! xfidelity - archetype-driven repository checks.
//!
//! An archetype names the rules, facts, operators and plugins that apply to
//! a kind of repository. Analysis resolves the archetype, evaluates its
//! rules against every file plus one repo-global pass, applies exemptions
//! and summarizes the failures.
//!
//! # Architecture
//!
//! - `config`: archetype, rule and exemption resolution with caching
//! - `plugins`: fact/operator registry and plugin catalog
//! - `engine`: rule model, almanac and evaluation
//! - `deps`: installed dependency versions and npm-style version ranges
//! - `exemption`: repository URL normalization and exemption matching
//! - `analyze`: file collection, per-file evaluation and result metadata
//! - `report`: output formatting (pretty, JSON)
//!
//! # Adding a Plugin
//!
//! Implement [`plugins::XfiPlugin`] and install a factory for it in a
//! [`plugins::PluginCatalog`] tier, then pass the catalog to
//! [`XfiContext::builder`].

pub mod analyze;
pub mod archetype;
pub mod cli;
pub mod config;
pub mod context;
pub mod deps;
pub mod engine;
pub mod error;
pub mod exemption;
pub mod plugins;
pub mod report;
pub mod telemetry;

pub use analyze::{analyze_codebase, AnalyzeOptions, Level, ResultMetadata, ScanResult};
pub use archetype::Archetype;
pub use config::{ConfigResolver, ExecutionConfig, ResolveOptions};
pub use context::XfiContext;
pub use deps::semver_valid;
pub use engine::{Engine, EngineBuilder, Rule, Scope};
pub use error::{Result, XfiError};
pub use exemption::{is_exempt, normalize_github_url, Exemption};
pub use plugins::{PluginCatalog, PluginRegistry, XfiPlugin};
