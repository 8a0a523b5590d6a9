//! Wire types for the slice of the DigitalOcean API this crate uses.

use serde::{Deserialize, Serialize};

/// Body for `POST /v2/droplets`.
#[derive(Clone, Debug, Serialize)]
pub(super) struct DropletCreateRequest {
    pub(super) name: String,
    pub(super) region: String,
    pub(super) size: String,
    pub(super) image: &'static str,
    pub(super) ssh_keys: Vec<u64>,
    pub(super) tags: Vec<String>,
    pub(super) monitoring: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct DropletCreateResponse {
    pub(super) droplet: Droplet,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct DropletGetResponse {
    pub(super) droplet: Droplet,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct Droplet {
    pub(super) id: u64,
    pub(super) name: String,
    pub(super) status: String,
    pub(super) networks: DropletNetworks,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct DropletNetworks {
    #[serde(default)]
    pub(super) v4: Vec<DropletNetworkV4>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct DropletNetworkV4 {
    pub(super) ip_address: String,
    #[serde(rename = "type")]
    pub(super) kind: String,
}

/// Body returned by the API on an error response.
#[derive(Clone, Debug, Deserialize)]
pub(super) struct ApiErrorBody {
    #[serde(default)]
    pub(super) id: String,
    #[serde(default)]
    pub(super) message: String,
}
