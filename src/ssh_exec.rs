//! Single-shot remote command execution over SSH, with cancellation.
//!
//! Opens one SSH session per command (no connection reuse — the deployment
//! protocol in [`crate::worker`] issues a handful of commands per instance,
//! so the overhead of a fresh TCP+SSH handshake each time is immaterial
//! next to the warm-up sleep). Authentication goes through the local
//! ssh-agent (`SSH_AUTH_SOCK`, inherited from the process environment); host
//! key verification is disabled since instances are short-lived and never
//! seen twice.
//!
//! The command runs on a background task. Its result is delivered through a
//! single-use [`tokio::sync::oneshot`] channel, and the outer `select!` races
//! that channel against the caller's [`CancellationToken`]. On cancellation
//! the spawned task is aborted, which drops its `Child` and — because the
//! command is built with `kill_on_drop(true)` — sends the remote process a
//! kill signal without waiting for the TCP connection to notice.

use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::backend::InstanceNetworking;

/// Remote user used for all SSH sessions.
const SSH_USER: &str = "root";

/// Errors raised by [`RemoteExecutor::run`].
#[derive(Debug, Error)]
pub enum SshError {
    /// Raised when the local `ssh` client could not be spawned.
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[source] std::io::Error),
    /// Raised when the remote command exits with a non-zero status.
    #[error("remote command exited with {status}")]
    NonZeroExit {
        /// The exit status reported by the local `ssh` client.
        status: std::process::ExitStatus,
    },
    /// Raised when the command is cancelled while in flight. The remote
    /// process may continue running until it observes the dropped
    /// connection.
    #[error("remote command cancelled")]
    Cancelled,
}

/// Executes commands on a remote instance over SSH.
#[derive(Clone, Debug, Default)]
pub struct RemoteExecutor;

impl RemoteExecutor {
    /// Creates a new executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs `command` on the instance described by `networking`, returning
    /// once the remote process exits (non-zero exit becomes an error), or
    /// immediately with [`SshError::Cancelled`] if `cancellation` fires
    /// while the command is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Spawn`] if the local `ssh` client cannot start,
    /// [`SshError::NonZeroExit`] if the remote command fails, or
    /// [`SshError::Cancelled`] on cancellation.
    pub async fn run(
        &self,
        networking: &InstanceNetworking,
        command: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), SshError> {
        let mut ssh = build_ssh_command(networking, command);
        ssh.kill_on_drop(true);

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let result = ssh.status().await;
            let _ = tx.send(result);
        });

        tokio::select! {
            received = rx => {
                match received {
                    Ok(Ok(status)) if status.success() => Ok(()),
                    Ok(Ok(status)) => Err(SshError::NonZeroExit { status }),
                    Ok(Err(source)) => Err(SshError::Spawn(source)),
                    Err(_) => Err(SshError::Cancelled),
                }
            }
            () = cancellation.cancelled() => {
                handle.abort();
                Err(SshError::Cancelled)
            }
        }
    }
}

fn build_ssh_command(networking: &InstanceNetworking, command: &str) -> Command {
    let mut ssh = Command::new("ssh");
    ssh.arg("-p")
        .arg(networking.ssh_port.to_string())
        .arg("-o")
        .arg("BatchMode=yes")
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg("-o")
        .arg("UserKnownHostsFile=/dev/null")
        .arg(format!("{SSH_USER}@{}", networking.public_ip))
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    ssh
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn networking() -> InstanceNetworking {
        InstanceNetworking {
            public_ip: Ipv4Addr::new(127, 0, 0, 1),
            ssh_port: 22,
        }
    }

    #[tokio::test]
    async fn cancellation_before_completion_returns_cancelled() {
        let executor = RemoteExecutor::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = executor
            .run(&networking(), "ls", &token)
            .await
            .expect_err("pre-cancelled token should short-circuit");
        assert!(matches!(err, SshError::Cancelled));
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_spawn_error() {
        let mut ssh = Command::new("definitely-not-a-real-ssh-binary-xyz");
        ssh.kill_on_drop(true);
        let result = ssh.status().await;
        assert!(result.is_err());
        let _ = Duration::from_secs(0);
    }
}
