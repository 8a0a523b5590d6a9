//! Lifecycle of one load-generation worker: provision, deploy, stop.
//!
//! A worker is a two-variant capability rather than a trait object — there
//! are exactly two deployment targets (a cloud instance or a local process)
//! and no third is expected, so a tagged enum avoids paying for dynamic
//! dispatch on the hot `Start`/`Stop` path.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, InstanceHandle, InstanceNetworking, InstanceRequest};
use crate::fixtures::Classroom;
use crate::ssh_exec::{RemoteExecutor, SshError};

/// Counter backing the `<runID>-<counter>` instance tag. Monotonic across
/// runs within a process; RunID namespacing makes that harmless.
static RUNNER_COUNTER: AtomicU64 = AtomicU64::new(0);

const WARM_UP: Duration = Duration::from_secs(60);
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(300);
const DOCKER_NETWORK: &str = "load-tests";
const GENERATOR_IMAGE: &str = "jsteinmann/load-tests-runner:latest";
const AGENT_IMAGE: &str = "datadog/agent:latest";

/// The batch of work assigned to one worker.
#[derive(Clone, Debug)]
pub struct Step {
    /// Process-wide run identifier, used for telemetry tagging and the
    /// generator's `RUN_ID` env var.
    pub run_id: String,
    /// Base URL of the system under test.
    pub url: String,
    /// Classrooms this worker drives.
    pub fixtures: Vec<Classroom>,
}

/// Errors raised by [`Worker::start`] and [`Worker::stop`].
#[derive(Debug, Error)]
pub enum WorkerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Provisioning the backing instance failed.
    #[error("provisioning failed: {0}")]
    Provision(#[source] E),
    /// Destroying the backing instance failed.
    #[error("instance destroy failed: {0}")]
    Destroy(#[source] E),
    /// A remote deployment command failed.
    #[error("remote deployment command failed: {0}")]
    Remote(#[source] SshError),
    /// The fixture batch could not be serialised for the `ACCOUNTS` env var.
    #[error("failed to serialize fixtures: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The local generator process could not be spawned or signalled.
    #[error("local worker process error: {0}")]
    Process(#[source] std::io::Error),
    /// The worker was cancelled before it finished starting.
    #[error("worker start cancelled")]
    Cancelled,
}

/// One load-generation worker: either a remote cloud instance or a local
/// process. `B` is the provisioner backend used by the remote variant.
pub enum Worker<B: Backend> {
    /// Drives classrooms through a containerised generator on a cloud
    /// instance reached over SSH.
    Remote(RemoteWorker<B>),
    /// Drives classrooms through a locally spawned generator process.
    Local(LocalWorker),
}

impl<B: Backend> Worker<B> {
    /// Creates a not-yet-started remote worker bound to `backend`.
    #[must_use]
    pub fn remote(
        backend: Arc<B>,
        do_size: impl Into<String>,
        do_region: impl Into<String>,
        dd_api_key: impl Into<String>,
    ) -> Self {
        Self::Remote(RemoteWorker {
            backend,
            do_size: do_size.into(),
            do_region: do_region.into(),
            dd_api_key: dd_api_key.into(),
            executor: RemoteExecutor::new(),
            instance: None,
            networking: None,
        })
    }

    /// Creates a not-yet-started local worker.
    #[must_use]
    pub fn local() -> Self {
        Self::Local(LocalWorker { child: None })
    }

    /// Starts the worker against `step`, checking `cancellation` before each
    /// stage. Any failure leaves no provisioned resources behind.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkerError`] variant matching the stage that failed.
    pub async fn start(
        &mut self,
        step: &Step,
        cancellation: &CancellationToken,
    ) -> Result<(), WorkerError<B::Error>> {
        match self {
            Self::Remote(worker) => worker.start(step, cancellation).await,
            Self::Local(worker) => worker.start(step).await,
        }
    }

    /// Stops the worker. Best-effort: failures are surfaced to the caller so
    /// they can be logged, but callers performing cleanup should not let a
    /// `Stop` failure prevent stopping siblings.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkerError`] variant matching the stage that failed.
    pub async fn stop(&mut self) -> Result<(), WorkerError<B::Error>> {
        match self {
            Self::Remote(worker) => worker.stop().await,
            Self::Local(worker) => worker.stop().await,
        }
    }
}

/// Remote worker state: a provisioned instance plus its network details,
/// populated once `start` completes.
pub struct RemoteWorker<B: Backend> {
    backend: Arc<B>,
    do_size: String,
    do_region: String,
    dd_api_key: String,
    executor: RemoteExecutor,
    instance: Option<InstanceHandle>,
    networking: Option<InstanceNetworking>,
}

impl<B: Backend> RemoteWorker<B> {
    async fn start(
        &mut self,
        step: &Step,
        cancellation: &CancellationToken,
    ) -> Result<(), WorkerError<B::Error>> {
        if cancellation.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let counter = RUNNER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tag = format!("{}-{counter}", step.run_id);
        let request = InstanceRequest::new(tag, self.do_size.clone(), self.do_region.clone());

        let instance = self
            .backend
            .create(&request)
            .await
            .map_err(WorkerError::Provision)?;

        let networking = match self.backend.wait_for_ready(&instance, cancellation).await {
            Ok(networking) => networking,
            // The backend is responsible for destroying a half-created
            // instance before returning an error from wait_for_ready.
            Err(source) => return Err(WorkerError::Provision(source)),
        };

        self.instance = Some(instance);
        self.networking = Some(networking.clone());

        if let Err(err) = self.deploy(step, &networking, cancellation).await {
            self.rollback().await;
            return Err(err);
        }

        Ok(())
    }

    async fn deploy(
        &self,
        step: &Step,
        networking: &InstanceNetworking,
        cancellation: &CancellationToken,
    ) -> Result<(), WorkerError<B::Error>> {
        if cancellation.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        self.run_remote(networking, &format!("docker network create {DOCKER_NETWORK}"), cancellation)
            .await?;

        if cancellation.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        self.run_remote(networking, &agent_start_command(&self.dd_api_key, &step.run_id), cancellation)
            .await?;

        tokio::select! {
            () = sleep(WARM_UP) => {}
            () = cancellation.cancelled() => return Err(WorkerError::Cancelled),
        }

        // Best-effort: a failure here does not fail the deploy, only the
        // error-artefact volume is lost.
        let _ = self
            .run_remote(
                networking,
                "mkdir -p /root/errors && chmod 777 /root/errors",
                cancellation,
            )
            .await;

        if cancellation.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        let accounts_json = serde_json::to_string(&step.fixtures).map_err(WorkerError::Serialize)?;
        self.run_remote(
            networking,
            &generator_start_command(&step.run_id, &step.url, &accounts_json),
            cancellation,
        )
        .await
    }

    async fn run_remote(
        &self,
        networking: &InstanceNetworking,
        command: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), WorkerError<B::Error>> {
        self.executor
            .run(networking, command, cancellation)
            .await
            .map_err(|source| match source {
                SshError::Cancelled => WorkerError::Cancelled,
                other => WorkerError::Remote(other),
            })
    }

    /// Destroys a partially deployed instance. Logged, never propagated —
    /// the caller has already decided to fail the start.
    async fn rollback(&mut self) {
        if let Some(instance) = self.instance.take() {
            if let Err(err) = self.backend.destroy(instance).await {
                tracing::warn!(error = %err, "failed to destroy instance during rollback");
            }
        }
        self.networking = None;
    }

    async fn stop(&mut self) -> Result<(), WorkerError<B::Error>> {
        if let Some(networking) = self.networking.clone() {
            let cancellation = CancellationToken::new();
            let stop_command = format!("docker stop --time {} runner", GRACEFUL_STOP_TIMEOUT.as_secs());
            if let Err(err) = self.executor.run(&networking, &stop_command, &cancellation).await {
                tracing::warn!(error = %err, "graceful runner stop failed, destroying instance anyway");
            }
        }

        if let Some(instance) = self.instance.take() {
            self.backend
                .destroy(instance)
                .await
                .map_err(WorkerError::Destroy)?;
        }
        self.networking = None;
        Ok(())
    }
}

/// Local worker state: the spawned generator process, if started.
pub struct LocalWorker {
    child: Option<Child>,
}

impl LocalWorker {
    async fn start<E>(&mut self, step: &Step) -> Result<(), WorkerError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let accounts_json = serde_json::to_string(&step.fixtures).map_err(WorkerError::Serialize)?;

        let child = Command::new("node")
            .arg("loadrunner/built/main.js")
            .arg("local-run")
            .arg(&step.url)
            .arg(&accounts_json)
            .env("NODE_OPTIONS", "--max-old-space-size=4096")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(WorkerError::Process)?;

        self.child = Some(child);
        Ok(())
    }

    async fn stop<E>(&mut self) -> Result<(), WorkerError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            // SAFETY: `pid` is a valid, still-tracked child process id; `kill`
            // with a real signal on a real pid has no memory-safety concerns.
            #[expect(unsafe_code, reason = "sending SIGINT has no safe std equivalent")]
            unsafe {
                libc::kill(i32::try_from(pid).unwrap_or(0), libc::SIGINT);
            }
        }

        child.wait().await.map_err(WorkerError::Process)?;
        Ok(())
    }
}

fn agent_start_command(dd_api_key: &str, run_id: &str) -> String {
    format!(
        "docker run -d --name dd-agent --network {DOCKER_NETWORK} \
         -e DD_API_KEY={dd_api_key} -e DD_TAGS=runId:{run_id} \
         -e DD_DOGSTATSD_NON_LOCAL_TRAFFIC=true -p 8125:8125/udp {AGENT_IMAGE}"
    )
}

fn generator_start_command(run_id: &str, url: &str, accounts_json: &str) -> String {
    let escaped_accounts = shell_escape::escape(accounts_json.into());
    format!(
        "docker run -d --name runner --network {DOCKER_NETWORK} --ipc=host --memory=4g \
         -e RUN_ID={run_id} -e URL={url} -e ACCOUNTS={escaped_accounts} \
         -e DD_AGENT_HOST=dd-agent -e NODE_OPTIONS=--max-old-space-size=4096 \
         -v /root/errors:/home/pwuser/runner/errors {GENERATOR_IMAGE}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_command_shell_escapes_accounts_json() {
        let command = generator_start_command("abc123", "https://example.test", r#"[{"name":"a b"}]"#);
        assert!(command.contains("ACCOUNTS='[{\"name\":\"a b\"}]'"));
    }

    #[test]
    fn agent_command_includes_run_tag() {
        let command = agent_start_command("dd-key", "abc123");
        assert!(command.contains("DD_TAGS=runId:abc123"));
        assert!(command.contains("DD_API_KEY=dd-key"));
    }
}
