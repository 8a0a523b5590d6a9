//! Error types for the DigitalOcean backend.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors raised by the DigitalOcean backend.
#[derive(Debug, Error)]
pub enum DigitalOceanError {
    /// Raised when a request is missing a required field.
    #[error("invalid instance request: {0}")]
    Validation(String),
    /// Raised when the HTTP client fails to reach the API.
    #[error("failed to reach DigitalOcean API: {0}")]
    Transport(#[source] reqwest::Error),
    /// Raised when the API responds with a non-2xx status.
    #[error("DigitalOcean API error ({status}): {message}")]
    Api {
        /// HTTP status code returned.
        status: u16,
        /// Error message from the response body, if any.
        message: String,
    },
    /// Raised when an asynchronous operation exceeds the timeout.
    #[error("timeout waiting for {action} on droplet {droplet_id}")]
    Timeout {
        /// Action being waited on (`active` or `ssh-reachable`).
        action: &'static str,
        /// Provider droplet identifier.
        droplet_id: String,
    },
    /// Raised when the droplet never exposes a public IPv4 address.
    #[error("droplet {droplet_id} has no public IPv4 address")]
    MissingPublicIp {
        /// Provider droplet identifier.
        droplet_id: String,
    },
    /// Raised when the droplet's public IP is not a valid IPv4 literal.
    #[error("droplet {droplet_id} reported an invalid IPv4 address: {address}")]
    InvalidPublicIp {
        /// Provider droplet identifier.
        droplet_id: String,
        /// The unparseable address string.
        address: String,
    },
    /// Raised when the run-wide cancellation token fires mid-provision.
    #[error("provisioning cancelled")]
    Cancelled,
    /// Raised when all SSH reachability probes fail after exhausting the
    /// backoff schedule. The instance has already been destroyed.
    #[error("droplet {droplet_id} never became reachable over SSH: {source}")]
    Unreachable {
        /// Provider droplet identifier.
        droplet_id: String,
        /// The last SSH error observed.
        #[source]
        source: crate::ssh_exec::SshError,
    },
}

impl From<BackendError> for DigitalOceanError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Validation(field) => Self::Validation(field),
        }
    }
}
