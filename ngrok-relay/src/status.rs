//! ngrok local status API client.
//!
//! The running ngrok binary serves `GET /api/tunnels` on its `web_addr`
//! port. Only the fields needed to pick a tunnel and read its public URL are
//! modelled; everything else in the payload is ignored.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::{sleep, timeout_at, Instant};

use crate::config::{PollPolicy, TunnelSelector};
use crate::error::DiscoveryError;

/// Response of `GET /api/tunnels`.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelStatus {
    pub tunnels: Vec<TunnelDescriptor>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// One active tunnel.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelDescriptor {
    #[serde(default)]
    pub name: String,
    pub public_url: String,
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub config: Option<TunnelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    pub addr: String,
    #[serde(default)]
    pub inspect: bool,
}

impl TunnelDescriptor {
    fn matches(&self, selector: &TunnelSelector) -> bool {
        selector.name.as_ref().is_none_or(|name| *name == self.name)
            && selector.proto.as_ref().is_none_or(|proto| *proto == self.proto)
    }
}

impl TunnelStatus {
    /// Pick the first tunnel matching `selector`.
    pub fn select(&self, selector: &TunnelSelector) -> Result<&TunnelDescriptor, DiscoveryError> {
        if self.tunnels.is_empty() {
            return Err(DiscoveryError::NoTunnel);
        }

        self.tunnels
            .iter()
            .find(|t| t.matches(selector))
            .ok_or_else(|| DiscoveryError::NoMatchingTunnel {
                selector: selector.to_string(),
                available: self.tunnels.len(),
            })
    }
}

/// HTTP client for the local status API.
#[derive(Debug, Clone)]
pub struct StatusClient {
    client: reqwest::Client,
    url: String,
}

impl StatusClient {
    /// Client for the status API on `127.0.0.1:<port>`.
    pub fn new(port: u16, request_timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("http://127.0.0.1:{port}/api/tunnels"),
        })
    }

    /// Issue a single request and decode the payload.
    pub async fn fetch(&self) -> Result<TunnelStatus, DiscoveryError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DiscoveryError::Transport(format!(
                "status API returned {}",
                resp.status()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| DiscoveryError::Decode(e.to_string()))
    }

    /// Wait for the service to report a tunnel and return its public URL.
    ///
    /// Sleeps for the warm-up delay, then polls with exponential backoff
    /// until a matching tunnel appears, a non-retryable error occurs, or the
    /// attempt/time ceiling is reached. At the ceiling the last error is
    /// returned.
    pub async fn discover_public_address(
        &self,
        selector: &TunnelSelector,
        policy: &PollPolicy,
    ) -> Result<String, DiscoveryError> {
        let deadline = Instant::now() + policy.total_timeout;

        sleep(policy.warmup.min(policy.total_timeout)).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(attempt, url = %self.url, "querying status API");

            let result = match timeout_at(deadline, self.fetch()).await {
                Ok(status) => status.and_then(|s| {
                    tracing::trace!(uri = ?s.uri, tunnels = s.tunnels.len(), "status API answered");
                    s.select(selector).cloned()
                }),
                Err(_) => Err(DiscoveryError::Transport(format!(
                    "no answer from {} within {:?}",
                    self.url, policy.total_timeout
                ))),
            };

            let err = match result {
                Ok(tunnel) => {
                    tracing::info!(
                        attempt,
                        name = %tunnel.name,
                        proto = %tunnel.proto,
                        local = ?tunnel.config.as_ref().map(|c| (&c.addr, c.inspect)),
                        url = %tunnel.public_url,
                        "discovered public address"
                    );
                    return Ok(tunnel.public_url);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            let delay = policy.backoff_for(attempt);
            if attempt >= policy.max_attempts || Instant::now() + delay >= deadline {
                tracing::warn!(attempt, "giving up on status API: {err}");
                return Err(err);
            }

            tracing::warn!(attempt, ?delay, "status API not ready: {err}");
            sleep(delay).await;
        }
    }
}
