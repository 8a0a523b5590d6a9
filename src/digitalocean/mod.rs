//! DigitalOcean backend implementation of the instance lifecycle.
//!
//! A thin `reqwest` wrapper over the droplets API: the cloud provider API is
//! treated as an out-of-scope "thin library" the core depends on only
//! through [`crate::backend::Backend`]'s semantic contract, so this module
//! stays deliberately narrow rather than growing into a general DigitalOcean
//! SDK.

mod error;
mod types;

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendFuture, InstanceHandle, InstanceNetworking, InstanceRequest};
use crate::ssh_exec::RemoteExecutor;
use types::{ApiErrorBody, Droplet, DropletCreateRequest, DropletCreateResponse, DropletGetResponse};

pub use error::DigitalOceanError;

const API_BASE: &str = "https://api.digitalocean.com/v2";
const BASE_IMAGE: &str = "docker-20-04";
const DEFAULT_SSH_PORT: u16 = 22;
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ACTIVE_POLL_TIMEOUT: Duration = Duration::from_secs(180);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff delays applied before each of the five SSH reachability probes,
/// chosen to stay clear of common `ufw` SSH rate-limit defaults
/// (6 attempts / 30s).
const SSH_BACKOFF: [Duration; 4] = [
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(40),
    Duration::from_secs(80),
];

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Backend that provisions instances through the DigitalOcean droplets API.
#[derive(Clone, Debug)]
pub struct DigitalOceanBackend {
    api_token: String,
    ssh_key_ids: Vec<u64>,
    executor: RemoteExecutor,
}

impl DigitalOceanBackend {
    /// Constructs a new backend using the given API token and the static
    /// list of SSH key IDs injected into every droplet.
    #[must_use]
    pub fn new(api_token: impl Into<String>, ssh_key_ids: Vec<u64>) -> Self {
        Self {
            api_token: api_token.into(),
            ssh_key_ids,
            executor: RemoteExecutor::new(),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_token)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DigitalOceanError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(DigitalOceanError::Transport);
        }

        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_default();
        Err(DigitalOceanError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_droplet(&self, id: u64) -> Result<Droplet, DigitalOceanError> {
        let url = format!("{API_BASE}/droplets/{id}");
        let response = self
            .authed(HTTP_CLIENT.get(&url))
            .send()
            .await
            .map_err(DigitalOceanError::Transport)?;
        Self::parse_response::<DropletGetResponse>(response)
            .await
            .map(|body| body.droplet)
    }

    async fn delete_droplet(&self, id: u64) -> Result<(), DigitalOceanError> {
        let url = format!("{API_BASE}/droplets/{id}");
        let response = self
            .authed(HTTP_CLIENT.delete(&url))
            .send()
            .await
            .map_err(DigitalOceanError::Transport)?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }

        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_default();
        Err(DigitalOceanError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn wait_until_active(
        &self,
        droplet_id: u64,
        cancellation: &CancellationToken,
    ) -> Result<Droplet, DigitalOceanError> {
        let deadline = tokio::time::Instant::now() + ACTIVE_POLL_TIMEOUT;
        loop {
            let droplet = self.get_droplet(droplet_id).await?;
            if droplet.status == "active" {
                return Ok(droplet);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(DigitalOceanError::Timeout {
                    action: "active",
                    droplet_id: droplet_id.to_string(),
                });
            }

            tokio::select! {
                () = sleep(ACTIVE_POLL_INTERVAL) => {}
                () = cancellation.cancelled() => return Err(DigitalOceanError::Cancelled),
            }
        }
    }

    fn extract_public_ip(droplet: &Droplet) -> Result<Ipv4Addr, DigitalOceanError> {
        let address = droplet
            .networks
            .v4
            .iter()
            .find(|network| network.kind == "public")
            .map(|network| network.ip_address.as_str())
            .ok_or_else(|| DigitalOceanError::MissingPublicIp {
                droplet_id: droplet.id.to_string(),
            })?;

        Ipv4Addr::from_str(address).map_err(|_| DigitalOceanError::InvalidPublicIp {
            droplet_id: droplet.id.to_string(),
            address: address.to_owned(),
        })
    }

    async fn probe_ssh_with_backoff(
        &self,
        networking: &InstanceNetworking,
        droplet_id: u64,
        cancellation: &CancellationToken,
    ) -> Result<(), DigitalOceanError> {
        let mut last_error = None;
        for (attempt, delay) in std::iter::once(Duration::ZERO)
            .chain(SSH_BACKOFF.iter().copied())
            .take(SSH_BACKOFF.len() + 1)
            .enumerate()
        {
            if attempt > 0 {
                tokio::select! {
                    () = sleep(delay) => {}
                    () = cancellation.cancelled() => return Err(DigitalOceanError::Cancelled),
                }
            }

            match self.executor.run(networking, "ls", cancellation).await {
                Ok(()) => return Ok(()),
                Err(crate::ssh_exec::SshError::Cancelled) => {
                    return Err(DigitalOceanError::Cancelled);
                }
                Err(source) => last_error = Some(source),
            }
        }

        Err(DigitalOceanError::Unreachable {
            droplet_id: droplet_id.to_string(),
            source: last_error.unwrap_or(crate::ssh_exec::SshError::Cancelled),
        })
    }
}

impl Backend for DigitalOceanBackend {
    type Error = DigitalOceanError;

    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> BackendFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            request.validate()?;

            let name = format!("do-{}-{}-{}", request.size, request.region, request.tag);
            let body = DropletCreateRequest {
                name: name.clone(),
                region: request.region.clone(),
                size: request.size.clone(),
                image: BASE_IMAGE,
                ssh_keys: self.ssh_key_ids.clone(),
                tags: vec![request.tag.clone()],
                monitoring: true,
            };

            let response = self
                .authed(HTTP_CLIENT.post(format!("{API_BASE}/droplets")))
                .json(&body)
                .send()
                .await
                .map_err(DigitalOceanError::Transport)?;

            let created = Self::parse_response::<DropletCreateResponse>(response).await?;

            Ok(InstanceHandle {
                id: created.droplet.id.to_string(),
                name,
            })
        })
    }

    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a InstanceHandle,
        cancellation: &'a CancellationToken,
    ) -> BackendFuture<'a, InstanceNetworking, Self::Error> {
        Box::pin(async move {
            let droplet_id: u64 = handle.id.parse().unwrap_or(0);

            let result = async {
                let droplet = self.wait_until_active(droplet_id, cancellation).await?;
                let public_ip = Self::extract_public_ip(&droplet)?;
                let networking = InstanceNetworking {
                    public_ip,
                    ssh_port: DEFAULT_SSH_PORT,
                };
                self.probe_ssh_with_backoff(&networking, droplet_id, cancellation)
                    .await?;
                Ok(networking)
            }
            .await;

            match result {
                Ok(networking) => Ok(networking),
                Err(err) => {
                    let _ = self.delete_droplet(droplet_id).await;
                    Err(err)
                }
            }
        })
    }

    fn destroy(&self, handle: InstanceHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let droplet_id: u64 = handle.id.parse().unwrap_or(0);
            self.delete_droplet(droplet_id).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_public_ip_prefers_public_network() {
        let droplet = Droplet {
            id: 1,
            name: String::from("do-test"),
            status: String::from("active"),
            networks: types::DropletNetworks {
                v4: vec![
                    types::DropletNetworkV4 {
                        ip_address: String::from("10.0.0.5"),
                        kind: String::from("private"),
                    },
                    types::DropletNetworkV4 {
                        ip_address: String::from("203.0.113.9"),
                        kind: String::from("public"),
                    },
                ],
            },
        };

        let ip = DigitalOceanBackend::extract_public_ip(&droplet).expect("should find public ip");
        assert_eq!(ip, Ipv4Addr::new(203, 0, 113, 9));
    }

    #[test]
    fn extract_public_ip_errors_without_public_network() {
        let droplet = Droplet {
            id: 2,
            name: String::from("do-test"),
            status: String::from("active"),
            networks: types::DropletNetworks { v4: vec![] },
        };

        let err = DigitalOceanBackend::extract_public_ip(&droplet)
            .expect_err("should fail without a public network");
        assert!(matches!(err, DigitalOceanError::MissingPublicIp { .. }));
    }
}
