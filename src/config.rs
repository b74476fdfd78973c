//! Command line and environment configuration for stlfetch

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser};
use url::Url;

use crate::registry::ThingId;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// How the automated browser is launched and how long it may take
#[derive(Args, Debug, Clone)]
pub struct BrowserOptions {
    /// Path to a Chrome/Chromium executable, auto-detected when unset
    #[clap(long, env = "STLFETCH_CHROME")]
    pub chrome: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[clap(long, env = "STLFETCH_HEADFUL", default_value = "false")]
    pub headful: bool,

    /// Seconds to wait for page loads and for the archive download
    #[clap(long = "timeout", env = "STLFETCH_TIMEOUT", default_value = "120")]
    pub timeout_secs: u64,

    #[clap(long, env = "STLFETCH_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Base URL of the model site
    #[clap(long, env = "STLFETCH_SITE_URL", default_value = crate::fetch::DEFAULT_SITE_URL)]
    pub site_url: Url,
}

impl BrowserOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Download one STL file from Thingiverse
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "stlfetch",
    version,
    after_help = "Examples:\n  stlfetch --thing 182114 --stl Cow_t.stl --output ./stl\n  stlfetch -t 2772812 -s techtris_airplane.stl -o ./stl"
)]
pub struct SingleConfig {
    /// Thingiverse thing ID (e.g. 182114)
    #[clap(short = 't', long = "thing")]
    pub thing_id: ThingId,

    /// STL filename to extract (e.g. Cow_t.stl)
    #[clap(short = 's', long = "stl")]
    pub stl: String,

    /// Output directory for the STL file
    #[clap(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Force re-download even if the file exists
    #[clap(short = 'f', long)]
    pub force: bool,

    #[clap(flatten)]
    pub browser: BrowserOptions,
}

/// Download every STL file required by the FluidX3D examples
#[derive(Parser, Debug, Clone)]
#[clap(name = "stlfetch-all", version)]
pub struct BatchConfig {
    /// Force re-download even if files exist
    #[clap(short = 'f', long)]
    pub force: bool,

    /// Directory the STL files are written to
    #[clap(
        short = 'o',
        long = "output",
        env = "STLFETCH_OUTPUT_DIR",
        default_value = "resources"
    )]
    pub output: PathBuf,

    /// JSON file replacing the built-in registry
    #[clap(long, env = "STLFETCH_REGISTRY")]
    pub registry: Option<PathBuf>,

    #[clap(flatten)]
    pub browser: BrowserOptions,
}
