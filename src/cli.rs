//! Command-line flag definitions, kept dependency-light so `build.rs` can
//! include this module directly for man-page generation.

use clap::Parser;

/// Command-line flags. Kept as a pure, env-free `clap` derive: environment
/// fallback is handled explicitly by [`crate::config::EnvConfig`] so the
/// four sources stay independently inspectable rather than letting `clap`
/// silently fold two of them together.
#[derive(Clone, Debug, Parser)]
#[command(name = "loadctl", about = "Distributed load-test controller")]
pub struct Flags {
    /// System under test base URL.
    #[arg(long = "url")]
    pub url: Option<String>,
    /// Optional path to a JSON configuration file.
    #[arg(long = "config")]
    pub config: Option<String>,
    /// Mongo URI for dump restore.
    #[arg(long = "dbUri")]
    pub db_uri: Option<String>,
    /// Skip DB restore.
    #[arg(long = "noReset")]
    pub no_reset: bool,
    /// The curve, e.g. `10,20,40,80`.
    #[arg(long = "loadLevels")]
    pub load_levels: Option<String>,
    /// Time per step (`"15m"`, `"90s"`).
    #[arg(long = "stepSize")]
    pub step_size: Option<String>,
    /// Pupils per classroom.
    #[arg(long = "classSize")]
    pub class_size: Option<u32>,
    /// Portion of pre-created classrooms, in `[0, 1]`.
    #[arg(long = "preparedPortion")]
    pub prepared_portion: Option<f64>,
    /// Use the local worker instead of remote.
    #[arg(long = "local")]
    pub local: bool,
    /// Chunking factor for remote workers.
    #[arg(long = "classesPerRunner")]
    pub classes_per_runner: Option<usize>,
    /// DigitalOcean API token.
    #[arg(long = "doApiKey")]
    pub do_api_key: Option<String>,
    /// Datadog API key.
    #[arg(long = "ddApiKey")]
    pub dd_api_key: Option<String>,
    /// DigitalOcean region slug.
    #[arg(long = "doRegion")]
    pub do_region: Option<String>,
    /// DigitalOcean size slug.
    #[arg(long = "doSize")]
    pub do_size: Option<String>,
}
