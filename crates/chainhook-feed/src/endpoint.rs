//! Streaming endpoint discovery.
//!
//! Each network's API serves `GET {api}/websocket/config` returning
//! `{"url": "<socket host>"}`; the feed connects to that host.

use chainhook_core::{FeedConfig, HookError, Network};
use serde::Deserialize;
use tracing::debug;

use crate::socketio;

#[derive(Debug, Deserialize)]
struct SocketConfigResponse {
    url: Option<String>,
}

pub struct EndpointResolver {
    http: reqwest::Client,
    config: FeedConfig,
}

impl EndpointResolver {
    pub fn new(config: FeedConfig) -> Result<Self, HookError> {
        let http = reqwest::Client::builder()
            .timeout(config.resolve_timeout())
            .build()
            .map_err(|e| HookError::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config_url(&self, network: Network) -> Result<String, HookError> {
        let api = self.config.api_base(network).ok_or_else(|| {
            HookError::Connection(format!("no API endpoint configured for {network}"))
        })?;
        Ok(format!("{}/websocket/config", api.trim_end_matches('/')))
    }

    /// Resolve the WebSocket URL to connect to for `network`.
    pub async fn resolve(&self, network: Network) -> Result<String, HookError> {
        let config_url = self.config_url(network)?;

        let resp = self
            .http
            .get(&config_url)
            .send()
            .await
            .map_err(|e| HookError::Connection(format!("GET {config_url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(HookError::Connection(format!(
                "GET {config_url} returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: SocketConfigResponse = resp
            .json()
            .await
            .map_err(|e| HookError::Connection(format!("invalid WebSocket config response: {e}")))?;

        let host = body
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| HookError::Connection("invalid WebSocket config response".into()))?;

        let url = socketio::socket_url(host.trim(), &self.config.socket_path);
        debug!(network = %network, url = %url, "resolved feed endpoint");
        Ok(url)
    }
}
