//! Run orchestrator: wires configuration, fixtures and the fleet
//! controller, and owns the run-wide deadline and signal handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::backend::Backend;
use crate::fixtures::{self, Classroom, FixtureError};
use crate::fleet::{FleetController, RunError, RunParameters};

const RUN_ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RUN_ID_LEN: usize = 6;

/// Errors that can end a run before or after the fleet controller hands
/// back control.
#[derive(Debug, Error)]
pub enum OrchestratorError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Fixture loading, validation, or DB restore failed.
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    /// The fleet controller reported an unrecoverable error.
    #[error(transparent)]
    Run(#[from] RunError<E>),
}

/// How a run ended, distinguishing the two causes of cancellation so the
/// caller can select an exit code.
#[derive(Debug)]
pub enum Outcome<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The curve completed naturally.
    Completed,
    /// The run was cancelled by an external signal (SIGINT).
    Cancelled,
    /// The run-wide deadline elapsed before the curve completed.
    DeadlineExceeded,
    /// The run ended with an unrecoverable error.
    Failed(OrchestratorError<E>),
}

impl<E> Outcome<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Maps this outcome to the process exit code per the external
    /// interface contract: 0 on normal completion or explicit cancel, 1 on
    /// deadline exceeded, 1 on any other error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Completed | Self::Cancelled => 0,
            Self::DeadlineExceeded | Self::Failed(_) => 1,
        }
    }
}

/// Generates a process-unique 6-character `[0-9a-z]` run identifier.
#[must_use]
pub fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    (0..RUN_ID_LEN)
        .map(|_| char::from(*RUN_ID_CHARSET.choose(&mut rng).unwrap_or(&b'0')))
        .collect()
}

/// Drives one complete run: shuffles fixtures, optionally restores the
/// database, installs signal and deadline handling, then runs the fleet
/// controller to completion.
///
/// `fixtures` must already have been validated against the curve's peak
/// concurrency via [`fixtures::ensure_sufficient`].
#[instrument(skip_all, fields(levels = ?fleet_params_levels(&load_curve)))]
pub async fn execute<B: Backend + 'static>(
    fleet: &FleetController<B>,
    load_curve: crate::load_curve::LoadCurve,
    mut fixtures: Vec<Classroom>,
    url: String,
    no_reset: bool,
    db_uri: Option<&str>,
) -> Outcome<B::Error> {
    fixtures::shuffle(&mut fixtures);

    if !no_reset {
        let Some(uri) = db_uri else {
            return Outcome::Failed(OrchestratorError::Fixture(FixtureError::Restore {
                message: String::from("db_uri is required unless no_reset is set"),
            }));
        };
        if let Err(err) = fixtures::restore_dump(uri, fixtures::DEFAULT_DUMP_ARCHIVE_PATH).await {
            return Outcome::Failed(OrchestratorError::Fixture(err));
        }
    }

    let root_token = CancellationToken::new();
    let deadline_fired = Arc::new(AtomicBool::new(false));

    let signal_token = root_token.clone();
    let signal_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, cancelling run");
            signal_token.cancel();
        }
    });

    let deadline = load_curve.deadline();
    let deadline_token = root_token.clone();
    let deadline_flag = Arc::clone(&deadline_fired);
    let deadline_handle = tokio::spawn(async move {
        sleep(deadline).await;
        deadline_flag.store(true, Ordering::SeqCst);
        deadline_token.cancel();
    });

    let params = RunParameters {
        url,
        load_curve,
        fixtures,
    };
    let result = fleet.run(&params, &root_token).await;

    signal_handle.abort();
    deadline_handle.abort();

    match result {
        Ok(()) => Outcome::Completed,
        Err(RunError::Cancelled) if deadline_fired.load(Ordering::SeqCst) => Outcome::DeadlineExceeded,
        Err(RunError::Cancelled) => Outcome::Cancelled,
        Err(other) => {
            warn!(error = %other, "run ended with an error");
            Outcome::Failed(OrchestratorError::Run(other))
        }
    }
}

fn fleet_params_levels(curve: &crate::load_curve::LoadCurve) -> Vec<u32> {
    curve.levels().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_run_id_has_expected_shape() {
        let id = generate_run_id();
        assert_eq!(id.len(), RUN_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn exit_code_maps_completed_and_cancelled_to_zero() {
        assert_eq!(Outcome::<std::io::Error>::Completed.exit_code(), 0);
        assert_eq!(Outcome::<std::io::Error>::Cancelled.exit_code(), 0);
    }

    #[test]
    fn exit_code_maps_deadline_and_failure_to_one() {
        assert_eq!(Outcome::<std::io::Error>::DeadlineExceeded.exit_code(), 1);
    }
}
