//! Fleet controller: partitions load into workers, tracks the active set,
//! and guarantees tear-down under partial failure or cancellation.
//!
//! The step loop must not block on [`FleetController::next_step`] because a
//! worker's end-to-end start latency (provision + deploy + warm-up) commonly
//! exceeds one step interval. Running it concurrently preserves the
//! wall-clock cadence of the curve; errors still short-circuit the loop on
//! its next `select!` via the error channel.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::fixtures::Classroom;
use crate::load_curve::LoadCurve;
use crate::worker::{Step, Worker, WorkerError};

/// Errors raised by [`FleetController::run`].
#[derive(Debug, Error)]
pub enum RunError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The load curve decreased between two consecutive levels. A
    /// non-recoverable programmer error, not a user input error.
    #[error("load level {level} at index {index} is lower than the previous level {previous}")]
    MonotoneViolation {
        /// Index of the offending level.
        index: usize,
        /// The offending (lower) level.
        level: u32,
        /// The level it regressed from.
        previous: u32,
    },
    /// A worker failed to start and its error propagated past sibling
    /// cancellation.
    #[error("worker start failed: {0}")]
    Worker(#[source] WorkerError<E>),
    /// The run was cancelled (interrupt or caller-triggered).
    #[error("run cancelled")]
    Cancelled,
}

/// Produces not-yet-started workers for a fleet. Kept separate from
/// [`FleetController`] so the controller stays cheap to clone into spawned
/// tasks.
pub enum WorkerFactory<B: Backend> {
    /// Produces [`Worker::Remote`] instances bound to the given backend and
    /// instance parameters.
    Remote {
        /// Provisioner used to create and destroy instances.
        backend: Arc<B>,
        /// DigitalOcean droplet size slug.
        do_size: String,
        /// DigitalOcean region slug.
        do_region: String,
        /// Datadog API key injected into the telemetry agent container.
        dd_api_key: String,
    },
    /// Produces [`Worker::Local`] instances.
    Local,
}

// Manual impl for the same reason as `FleetController`'s: `Arc<B>::clone`
// never needs `B: Clone`.
impl<B: Backend> Clone for WorkerFactory<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Remote {
                backend,
                do_size,
                do_region,
                dd_api_key,
            } => Self::Remote {
                backend: Arc::clone(backend),
                do_size: do_size.clone(),
                do_region: do_region.clone(),
                dd_api_key: dd_api_key.clone(),
            },
            Self::Local => Self::Local,
        }
    }
}

impl<B: Backend> WorkerFactory<B> {
    fn spawn(&self) -> Worker<B> {
        match self {
            Self::Remote {
                backend,
                do_size,
                do_region,
                dd_api_key,
            } => Worker::remote(Arc::clone(backend), do_size.clone(), do_region.clone(), dd_api_key.clone()),
            Self::Local => Worker::local(),
        }
    }
}

/// Parameters for one fleet run.
#[derive(Clone, Debug)]
pub struct RunParameters {
    /// Base URL of the system under test.
    pub url: String,
    /// The load curve to drive.
    pub load_curve: LoadCurve,
    /// The shuffled fixture pool, at least `load_curve.max_level()` long.
    pub fixtures: Vec<Classroom>,
}

/// Owns the active runner set and drives the step loop.
pub struct FleetController<B: Backend> {
    run_id: String,
    /// Chunking factor for remote workers. `None` means one worker handles
    /// an entire step's batch (the local variant's "infinite" chunking).
    classes_per_runner: Option<usize>,
    worker_factory: WorkerFactory<B>,
    active: Arc<Mutex<Vec<Worker<B>>>>,
}

// Manual impl: cloning only duplicates the Arc handles and owned scalars,
// never requiring `B: Clone` (the derive macro would add that bound).
impl<B: Backend> Clone for FleetController<B> {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id.clone(),
            classes_per_runner: self.classes_per_runner,
            worker_factory: self.worker_factory.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<B: Backend + 'static> FleetController<B> {
    /// Creates a controller for `run_id`, spawning workers through
    /// `worker_factory` in chunks of `classes_per_runner` (`None` for the
    /// local, single-worker-per-step variant).
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        classes_per_runner: Option<usize>,
        worker_factory: WorkerFactory<B>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            classes_per_runner,
            worker_factory,
            active: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Drives the load curve to completion, cancellation, or the first
    /// unrecoverable worker error. Cleanup always runs before returning,
    /// regardless of which of those three ends the loop.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::MonotoneViolation`] if the curve decreases,
    /// [`RunError::Worker`] if a worker's start error survives sibling
    /// cancellation, or [`RunError::Cancelled`] on cancellation.
    pub async fn run(
        &self,
        params: &RunParameters,
        cancellation: &CancellationToken,
    ) -> Result<(), RunError<B::Error>> {
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();

        let mut current_load: u32 = 0;
        let mut account_idx: usize = 0;
        let mut loop_result = Ok(());

        for (index, &level) in params.load_curve.levels().iter().enumerate() {
            if level < current_load {
                loop_result = Err(RunError::MonotoneViolation {
                    index,
                    level,
                    previous: current_load,
                });
                break;
            }

            let delta = (level - current_load) as usize;
            if delta > 0 {
                let batch = params
                    .fixtures
                    .get(account_idx..account_idx + delta)
                    .map(<[Classroom]>::to_vec)
                    .unwrap_or_default();
                account_idx += delta;

                let controller = self.clone();
                let step = Step {
                    run_id: self.run_id.clone(),
                    url: params.url.clone(),
                    fixtures: batch,
                };
                let step_cancellation = cancellation.clone();
                let error_tx = error_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = controller.next_step(step, &step_cancellation).await {
                        let _ = error_tx.send(err);
                    }
                });
            }
            current_load = level;

            tokio::select! {
                () = sleep(params.load_curve.step_size()) => {}
                () = cancellation.cancelled() => {
                    loop_result = Err(RunError::Cancelled);
                    break;
                }
                Some(err) = error_rx.recv() => {
                    loop_result = Err(err);
                    break;
                }
            }
        }

        self.cleanup().await;
        loop_result
    }

    /// Partitions `step`'s fixtures into chunks of at most
    /// `classes_per_runner`, starts one worker per chunk, and on success
    /// appends the started workers to the active set.
    async fn next_step(
        &self,
        step: Step,
        cancellation: &CancellationToken,
    ) -> Result<(), RunError<B::Error>> {
        let chunk_size = self.classes_per_runner.unwrap_or_else(|| step.fixtures.len().max(1));
        let chunks = partition_batch(&step.fixtures, chunk_size);

        let started = self.start_runners(&step, chunks, cancellation).await?;
        let mut active = self.active.lock().await;
        active.extend(started);
        Ok(())
    }

    /// Starts one worker per chunk concurrently. On the first
    /// non-cancellation error, cancels a child token to abort sibling
    /// starts, then destroys every worker that had already succeeded before
    /// returning the error — none of them are exposed to the active set.
    async fn start_runners(
        &self,
        step: &Step,
        chunks: Vec<Vec<Classroom>>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<Worker<B>>, RunError<B::Error>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let child_token = cancellation.child_token();
        let (tx, mut rx) = mpsc::channel(chunks.len());

        for fixtures in chunks {
            let mut worker = self.worker_factory.spawn();
            let step = Step {
                run_id: step.run_id.clone(),
                url: step.url.clone(),
                fixtures,
            };
            let token = child_token.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = worker.start(&step, &token).await;
                let _ = tx.send(result.map(|()| worker)).await;
            });
        }
        drop(tx);

        let mut succeeded = Vec::new();
        let mut remembered_error = None;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(worker) => succeeded.push(worker),
                Err(WorkerError::Cancelled) => {}
                Err(err) if remembered_error.is_none() => {
                    remembered_error = Some(err);
                    child_token.cancel();
                }
                Err(_) => {}
            }
        }

        if let Some(err) = remembered_error {
            for mut worker in succeeded {
                if let Err(stop_err) = worker.stop().await {
                    tracing::warn!(error = %stop_err, "failed to destroy sibling worker after a start failure");
                }
            }
            return Err(RunError::Worker(err));
        }

        Ok(succeeded)
    }

    /// Stops every worker in the active set. Best-effort: the process is
    /// exiting, so each `Stop` failure is logged rather than propagated.
    /// Not cancellable — runs to completion even after the run's own
    /// cancellation token has already fired.
    async fn cleanup(&self) {
        let mut active = self.active.lock().await;
        let workers = std::mem::take(&mut *active);
        drop(active);

        let stops = workers.into_iter().map(|mut worker| async move {
            if let Err(err) = worker.stop().await {
                tracing::warn!(
                    error = %err,
                    "worker cleanup failed; destroy any stray instances manually by run tag"
                );
            }
        });
        futures_join_all(stops).await;
    }
}

/// Minimal join-all helper to avoid pulling in `futures` for one call site.
async fn futures_join_all<F: std::future::Future<Output = ()> + Send + 'static>(tasks: impl IntoIterator<Item = F>) {
    let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
    for handle in handles {
        let _ = handle.await;
    }
}

/// Splits `batch` into chunks of at most `chunk_size`, never producing an
/// empty chunk.
fn partition_batch(batch: &[Classroom], chunk_size: usize) -> Vec<Vec<Classroom>> {
    if batch.is_empty() {
        return Vec::new();
    }
    batch.chunks(chunk_size.max(1)).map(<[Classroom]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_classroom(name: &str) -> Classroom {
        Classroom {
            prepared: false,
            name: name.to_owned(),
            teacher: crate::fixtures::Teacher {
                email: format!("{name}@load-test.com"),
                password: String::from("Passwort123!"),
            },
            pupils: vec![],
        }
    }

    #[rstest]
    #[case(10, 3, 4)]
    #[case(9, 3, 3)]
    #[case(1, 5, 1)]
    fn partition_batch_produces_ceil_div_chunks(
        #[case] len: usize,
        #[case] chunk_size: usize,
        #[case] expected_chunks: usize,
    ) {
        let batch: Vec<Classroom> = (0..len).map(|i| sample_classroom(&format!("r{i}"))).collect();
        let chunks = partition_batch(&batch, chunk_size);
        assert_eq!(chunks.len(), expected_chunks);
        let total: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(total, len);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= chunk_size);
        }
    }

    #[test]
    fn partition_batch_empty_input_produces_no_chunks() {
        assert!(partition_batch(&[], 4).is_empty());
    }
}
