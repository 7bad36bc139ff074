//! Service configuration.
//!
//! Every section deserializes with defaults, so a partial JSON file or an
//! empty environment yields a working configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HookError;
use crate::types::Network;

/// Webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Total tries per delivery sequence, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Delay after the first failed try; doubles after each further failure.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Response bodies are truncated to this many characters before logging.
    #[serde(default = "default_snippet_chars")]
    pub response_snippet_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_attempts() -> u32 { 3 }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_initial_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_ms() -> u64 { 10_000 }
fn default_snippet_chars() -> usize { 500 }
fn default_user_agent() -> String {
    format!("chainhook/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            response_snippet_chars: default_snippet_chars(),
            user_agent: default_user_agent(),
        }
    }
}

impl DeliveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Upstream transfer feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// network → API base URL used to resolve the streaming endpoint
    #[serde(default = "default_api_endpoints")]
    pub api_endpoints: HashMap<Network, String>,
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    /// Reconnect tries per disconnect before the connection goes idle.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Capacity of the inbound transfer-batch queue.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

fn default_api_endpoints() -> HashMap<Network, String> {
    HashMap::from([
        (Network::Mainnet, "https://api.multiversx.com".to_string()),
        (Network::Testnet, "https://testnet-api.multiversx.com".to_string()),
        (Network::Devnet, "https://devnet-api.multiversx.com".to_string()),
    ])
}
fn default_socket_path() -> String { "/ws/subscription".into() }
fn default_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_delay_ms() -> u64 { 1_000 }
fn default_channel_capacity() -> usize { 1_024 }
fn default_resolve_timeout_ms() -> u64 { 10_000 }

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_endpoints: default_api_endpoints(),
            socket_path: default_socket_path(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            channel_capacity: default_channel_capacity(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
        }
    }
}

impl FeedConfig {
    pub fn api_base(&self, network: Network) -> Option<&str> {
        self.api_endpoints.get(&network).map(String::as_str)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file path or `sqlite:` URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String { "./data/subscriptions.db".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_url: default_database_url() }
    }
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String { "info".into() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl HookConfig {
    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HookError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HookError::Config(format!("{}: {e}", path.display())))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, HookError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` (an environment-like key → value source).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, HookError> {
        if let Some(v) = lookup("WEBHOOK_TIMEOUT_MS") {
            self.delivery.request_timeout_ms = parse_number("WEBHOOK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("WEBHOOK_MAX_RETRIES") {
            self.delivery.max_attempts = parse_number("WEBHOOK_MAX_RETRIES", &v)?;
        }
        for (key, network) in [
            ("MVX_API_MAINNET", Network::Mainnet),
            ("MVX_API_TESTNET", Network::Testnet),
            ("MVX_API_DEVNET", Network::Devnet),
        ] {
            if let Some(v) = lookup(key) {
                self.feed.api_endpoints.insert(network, v);
            }
        }
        if let Some(v) = lookup("DB_PATH") {
            self.storage.database_url = v;
        }
        if let Some(v) = lookup("CHAINHOOK_LOG") {
            self.log.level = v;
        }
        if let Some(v) = lookup("CHAINHOOK_LOG_JSON") {
            self.log.json = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if self.delivery.max_attempts == 0 {
            return Err(HookError::Config("max_attempts must be at least 1".into()));
        }
        Ok(self)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, HookError> {
    value
        .trim()
        .parse()
        .map_err(|_| HookError::Config(format!("{key}: '{value}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = HookConfig::default();
        assert_eq!(cfg.delivery.max_attempts, 3);
        assert_eq!(cfg.delivery.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.delivery.response_snippet_chars, 500);
        assert_eq!(cfg.feed.reconnect_attempts, 5);
        assert_eq!(cfg.feed.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(cfg.feed.api_base(Network::Devnet), Some("https://devnet-api.multiversx.com"));
    }

    #[test]
    fn env_overrides() {
        let env = HashMap::from([
            ("WEBHOOK_TIMEOUT_MS", "2500"),
            ("WEBHOOK_MAX_RETRIES", "5"),
            ("MVX_API_TESTNET", "http://localhost:3001"),
            ("DB_PATH", "/tmp/hooks.db"),
            ("CHAINHOOK_LOG_JSON", "1"),
        ]);
        let cfg = HookConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.delivery.request_timeout_ms, 2_500);
        assert_eq!(cfg.delivery.max_attempts, 5);
        assert_eq!(cfg.feed.api_base(Network::Testnet), Some("http://localhost:3001"));
        assert_eq!(cfg.storage.database_url, "/tmp/hooks.db");
        assert!(cfg.log.json);
    }

    #[test]
    fn bad_numbers_rejected() {
        let err = HookConfig::default()
            .with_overrides(|k| (k == "WEBHOOK_MAX_RETRIES").then(|| "three".to_string()))
            .unwrap_err();
        assert!(matches!(err, HookError::Config(_)));

        let err = HookConfig::default()
            .with_overrides(|k| (k == "WEBHOOK_MAX_RETRIES").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, HookError::Config(_)));
    }

    #[test]
    fn partial_json() {
        let cfg: HookConfig = serde_json::from_str(
            r#"{ "delivery": { "max_attempts": 4 }, "feed": { "api_endpoints": { "devnet": "http://x" } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.delivery.max_attempts, 4);
        assert_eq!(cfg.delivery.initial_backoff_ms, 1_000);
        assert_eq!(cfg.feed.api_base(Network::Devnet), Some("http://x"));
        assert_eq!(cfg.feed.api_base(Network::Mainnet), None);
    }
}
