//! Command-line interface for xfidelity.

use clap::{Parser, ValueEnum};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analyze::{analyze_codebase, AnalyzeOptions};
use crate::config::ResolveOptions;
use crate::context::XfiContext;
use crate::plugins::FeatureFlags;
use crate::report;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "XFI_LOG";

/// Check a repository against an archetype's rules.
#[derive(Parser, Debug)]
#[command(name = "xfidelity")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Repository to analyze
    #[arg(default_value = ".")]
    pub repo: PathBuf,

    /// Archetype to apply
    #[arg(short, long, default_value = "node-fullstack")]
    pub archetype: String,

    /// Config server base URL (takes precedence over --local-config-path)
    #[arg(short = 'c', long)]
    pub config_server: Option<String>,

    /// Directory holding archetype, rule and exemption files
    #[arg(short, long)]
    pub local_config_path: Option<PathBuf>,

    /// Prefix attached to every log line of this run
    #[arg(long)]
    pub log_prefix: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Pretty)]
    pub format: Format,

    /// Extra plugin to load (repeatable)
    #[arg(short, long = "plugin")]
    pub plugins: Vec<String>,

    /// Enable AI-assisted facts and operators (needs OPENAI_API_KEY)
    #[arg(long)]
    pub openai_enabled: bool,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Pretty,
    Json,
}

/// Install the stderr log subscriber. `XFI_LOG` sets the filter unless
/// `verbose` forces debug.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

impl Cli {
    pub fn analyze_options(&self) -> AnalyzeOptions {
        let features = FeatureFlags {
            openai_enabled: self.openai_enabled,
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
        };
        AnalyzeOptions {
            repo_path: self.repo.clone(),
            resolve: ResolveOptions {
                archetype: self.archetype.clone(),
                config_server: self.config_server.clone(),
                local_config_path: self.local_config_path.clone(),
                execution_log_prefix: self.log_prefix.clone(),
                plugins: self.plugins.clone(),
                repo_path: Some(self.repo.clone()),
                features,
            },
            repo_url: None,
            cancel: None,
        }
    }
}

/// Run one analysis and print the report. Returns the exit code.
pub async fn run(cli: &Cli) -> anyhow::Result<i32> {
    if !cli.repo.is_dir() {
        anyhow::bail!("repository path {} is not a directory", cli.repo.display());
    }

    let ctx = XfiContext::new()?;
    let result = analyze_codebase(&ctx, cli.analyze_options()).await?;

    let mut stdout = io::stdout().lock();
    match cli.format {
        Format::Json => report::write_json(&mut stdout, &result)?,
        Format::Pretty => report::write_pretty(&mut stdout, &result)?,
    }

    Ok(if result.has_fatalities() {
        EXIT_FAILED
    } else {
        EXIT_SUCCESS
    })
}
