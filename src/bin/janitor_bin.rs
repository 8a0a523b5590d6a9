//! Standalone janitor binary: sweeps DigitalOcean droplets tagged with a
//! given run ID and fails loudly if any survive.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use loadctl::janitor::{Janitor, JanitorConfig};

#[derive(Debug, Parser)]
#[command(name = "loadctl-janitor", about = "Sweep stray DigitalOcean droplets by run tag")]
struct Args {
    /// DigitalOcean API token.
    #[arg(long = "doApiKey", env = "DO_API_KEY")]
    do_api_key: String,
    /// Run ID tag to sweep.
    #[arg(long = "tag")]
    tag: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match JanitorConfig::new(args.do_api_key, args.tag) {
        Ok(config) => config,
        Err(err) => {
            report_error(&err);
            return ExitCode::FAILURE;
        }
    };

    let janitor = Janitor::new(config);
    match janitor.sweep().await {
        Ok(summary) => {
            tracing::info!(deleted = summary.deleted, "sweep complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &impl std::fmt::Display) {
    let _ = writeln!(io::stderr(), "{err}");
}
