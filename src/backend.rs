//! Backend abstraction for provisioning disposable compute instances.
//!
//! Mirrors the "thin provider library" framing from the specification: the
//! core depends only on this trait's semantic contract, never on a
//! particular cloud SDK.

use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;

use thiserror::Error;

/// Parameters required to create a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Tag applied to the created instance (the `<runID>-<counter>` value).
    pub tag: String,
    /// Commercial size/flavour to request (for example `s-2vcpu-8gb`).
    pub size: String,
    /// Target region (for example `fra1`).
    pub region: String,
}

impl InstanceRequest {
    /// Creates a new request, trimming inputs to avoid accidental whitespace.
    #[must_use]
    pub fn new(tag: impl Into<String>, size: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            tag: tag.into().trim().to_owned(),
            size: size.into().trim().to_owned(),
            region: region.into().trim().to_owned(),
        }
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when any string field is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.tag.is_empty() {
            return Err(BackendError::Validation("tag".to_owned()));
        }
        if self.size.is_empty() {
            return Err(BackendError::Validation("size".to_owned()));
        }
        if self.region.is_empty() {
            return Err(BackendError::Validation("region".to_owned()));
        }
        Ok(())
    }
}

/// Handle returned by a backend once an instance has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider-specific identifier for the instance.
    pub id: String,
    /// Human-readable name assigned at creation time.
    pub name: String,
}

/// Connection details for reaching an instance once it is ready.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceNetworking {
    /// Public IPv4 address assigned by the provider.
    pub public_ip: Ipv4Addr,
    /// TCP port for SSH (22 on DigitalOcean).
    pub ssh_port: u16,
}

/// Errors raised by backends independent of provider specifics.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by cloud backends: create, wait for SSH
/// reachability, destroy. Implementations must destroy any half-created
/// instance on a failed or cancelled `create`/`wait_for_ready`.
pub trait Backend: Send + Sync {
    /// Provider-specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a new instance and returns a handle used for subsequent calls.
    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error>;

    /// Blocks until the instance is reachable over SSH, using the provided
    /// cancellation token to abort early. On failure or cancellation the
    /// instance must already have been destroyed before the error returns.
    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a InstanceHandle,
        cancellation: &'a tokio_util::sync::CancellationToken,
    ) -> BackendFuture<'a, InstanceNetworking, Self::Error>;

    /// Destroys the instance. Idempotent at the caller's discretion: callers
    /// may invoke this after a failed `create`.
    fn destroy(&self, handle: InstanceHandle) -> BackendFuture<'_, (), Self::Error>;
}
