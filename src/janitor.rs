//! DigitalOcean droplet janitor.
//!
//! Operationalizes the error-handling guidance that cleanup failures are
//! "logged only" and the operator is told to destroy stray instances
//! manually by tag: this is that manual tool, usable both as a standalone
//! binary and from integration tests asserting a test run left nothing
//! behind.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;

const API_BASE: &str = "https://api.digitalocean.com/v2";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const VERIFY_POLL_INTERVAL: Duration = Duration::from_secs(3);
const VERIFY_ATTEMPTS: u32 = 5;

/// Configuration for a janitor sweep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JanitorConfig {
    /// DigitalOcean API token.
    pub api_token: String,
    /// Tag shared by every droplet belonging to the run being swept
    /// (the RunID, per the provisioner's tagging convention).
    pub tag: String,
}

impl JanitorConfig {
    /// Constructs a config, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::InvalidConfig`] when either field is blank.
    pub fn new(api_token: impl Into<String>, tag: impl Into<String>) -> Result<Self, JanitorError> {
        let api_token = api_token.into().trim().to_owned();
        let tag = tag.into().trim().to_owned();
        if api_token.is_empty() {
            return Err(JanitorError::InvalidConfig { field: String::from("api_token") });
        }
        if tag.is_empty() {
            return Err(JanitorError::InvalidConfig { field: String::from("tag") });
        }
        Ok(Self { api_token, tag })
    }
}

/// Summary of a completed sweep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of droplets deleted during the sweep.
    pub deleted: usize,
}

/// Errors returned by the janitor.
#[derive(Debug, Error)]
pub enum JanitorError {
    /// Raised when configuration is missing a required value.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
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
    /// Raised when droplets remain tagged after the sweep completes.
    #[error("{count} droplet(s) remain tagged {tag} after sweep: destroy them manually")]
    NotClean {
        /// Number of droplets still present.
        count: usize,
        /// The tag swept.
        tag: String,
    },
}

#[derive(Debug, Deserialize)]
struct DropletListResponse {
    droplets: Vec<DropletSummary>,
}

#[derive(Debug, Deserialize)]
struct DropletSummary {
    id: u64,
}

#[derive(Debug, Deserialize, Default)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Sweeps DigitalOcean droplets tagged with a given run ID.
#[derive(Clone, Debug)]
pub struct Janitor {
    config: JanitorConfig,
    client: reqwest::Client,
}

impl Janitor {
    /// Creates a new janitor for `config`.
    #[must_use]
    pub fn new(config: JanitorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    /// Lists every droplet currently tagged with this sweep's tag.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::Transport`] or [`JanitorError::Api`] on
    /// failure.
    pub async fn list_tagged(&self) -> Result<Vec<u64>, JanitorError> {
        let url = format!("{API_BASE}/droplets?tag_name={}", self.config.tag);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(JanitorError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|body| body.message)
                .unwrap_or_default();
            return Err(JanitorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<DropletListResponse>()
            .await
            .map_err(JanitorError::Transport)?;
        Ok(body.droplets.into_iter().map(|d| d.id).collect())
    }

    /// Deletes every droplet tagged with this sweep's tag, then polls until
    /// none remain, failing loudly if any survive.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::NotClean`] if droplets remain after the
    /// verification attempts are exhausted, or a transport/API error if a
    /// request fails outright.
    pub async fn sweep(&self) -> Result<SweepSummary, JanitorError> {
        let tagged = self.list_tagged().await?;
        let deleted = tagged.len();
        for id in tagged {
            self.delete(id).await?;
        }

        for attempt in 0..VERIFY_ATTEMPTS {
            let remaining = self.list_tagged().await?;
            if remaining.is_empty() {
                return Ok(SweepSummary { deleted });
            }
            if attempt + 1 < VERIFY_ATTEMPTS {
                sleep(VERIFY_POLL_INTERVAL).await;
            }
        }

        let remaining = self.list_tagged().await?;
        Err(JanitorError::NotClean {
            count: remaining.len(),
            tag: self.config.tag.clone(),
        })
    }

    async fn delete(&self, id: u64) -> Result<(), JanitorError> {
        let url = format!("{API_BASE}/droplets/{id}");
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(JanitorError::Transport)?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }

        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_default();
        Err(JanitorError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_blank_api_token() {
        let err = JanitorConfig::new("", "abc123").expect_err("should reject blank token");
        assert!(matches!(err, JanitorError::InvalidConfig { field } if field == "api_token"));
    }

    #[test]
    fn config_rejects_blank_tag() {
        let err = JanitorConfig::new("token", "  ").expect_err("should reject blank tag");
        assert!(matches!(err, JanitorError::InvalidConfig { field } if field == "tag"));
    }

    #[test]
    fn config_trims_whitespace() {
        let config = JanitorConfig::new(" token ", " abc123 ").expect("should accept");
        assert_eq!(config.api_token, "token");
        assert_eq!(config.tag, "abc123");
    }
}
