//! Binary entry point for `loadctl`.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use loadctl::digitalocean::DigitalOceanBackend;
use loadctl::fixtures::{self, DEFAULT_FIXTURE_PATH};
use loadctl::fleet::{FleetController, WorkerFactory};
use loadctl::run::{self, OrchestratorError};
use loadctl::{ConfigError, EnvConfig, FileConfig, FixtureError, Flags};

/// Static DigitalOcean SSH key IDs injected into every provisioned droplet.
const SSH_KEY_IDS: [u64; 2] = [22_074_350, 26_570_780];

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("fixture error: {0}")]
    Fixture(#[from] FixtureError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run_main().await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run_main() -> Result<i32, CliError> {
    let flags = Flags::parse();

    let file_config = match &flags.config {
        Some(path) => FileConfig::load(Utf8Path::new(path))?,
        None => FileConfig::default(),
    };
    let env_config = EnvConfig::from_env()?;
    let config = loadctl::RunConfig::merge(&file_config, &env_config, &flags)?;

    let loaded_fixtures = fixtures::read_fixtures(Utf8Path::new(DEFAULT_FIXTURE_PATH)).await?;
    let load_curve = config.load_curve()?;
    fixtures::ensure_sufficient(&loaded_fixtures, &load_curve)?;

    let run_id = run::generate_run_id();
    tracing::info!(run_id = %run_id, "starting run");

    let worker_factory = if config.local {
        WorkerFactory::Local
    } else {
        let backend = Arc::new(DigitalOceanBackend::new(config.do_api_key.clone(), SSH_KEY_IDS.to_vec()));
        WorkerFactory::Remote {
            backend,
            do_size: config.do_size.clone(),
            do_region: config.do_region.clone(),
            dd_api_key: config.dd_api_key.clone(),
        }
    };
    let classes_per_runner = if config.local {
        None
    } else {
        Some(config.classes_per_runner)
    };

    let fleet = FleetController::new(run_id, classes_per_runner, worker_factory);

    let outcome = run::execute(
        &fleet,
        load_curve,
        loaded_fixtures,
        config.url.clone(),
        config.no_reset,
        config.db_uri.as_deref(),
    )
    .await;

    if let run::Outcome::Failed(OrchestratorError::Run(ref err)) = outcome {
        tracing::error!(error = %err, "run failed");
    }

    Ok(outcome.exit_code())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    let _ = writeln!(target, "{err}");
}
