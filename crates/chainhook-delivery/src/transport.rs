//! Outbound webhook transport.
//!
//! [`WebhookTransport`] is the seam the delivery engine talks to;
//! [`HttpWebhookClient`] is the `reqwest`-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainhook_core::{DeliveryConfig, HookError, Subscription, SubscriptionId, TransferEvent};

use crate::validate::validate_webhook_url;

/// Subscription identity block of a webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRef {
    pub id: SubscriptionId,
    pub name: String,
    pub user_address: String,
}

/// JSON body POSTed to a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub subscription: SubscriptionRef,
    pub transfer: Value,
    /// RFC 3339 delivery time.
    pub timestamp: String,
}

impl WebhookPayload {
    pub fn new(subscription: &Subscription, event: &TransferEvent) -> Self {
        Self {
            subscription: SubscriptionRef {
                id: subscription.id,
                name: subscription.name.clone(),
                user_address: subscription.owner_address.clone(),
            },
            transfer: event.as_value().clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Any HTTP response, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One outbound POST per call. Non-2xx statuses are returned as responses;
/// only transport-level failures are errors.
#[async_trait]
pub trait WebhookTransport: Send + Sync + 'static {
    async fn post(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> Result<WebhookResponse, HookError>;
}

/// Result of [`HttpWebhookClient::probe`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// `reqwest`-backed webhook client.
#[derive(Clone)]
pub struct HttpWebhookClient {
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpWebhookClient {
    pub fn new(config: &DeliveryConfig) -> Result<Self, HookError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| HookError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            request_timeout: config.request_timeout(),
        })
    }

    /// Validate `url` and check that it answers a HEAD request.
    ///
    /// A failed HEAD does not invalidate the URL; the endpoint may still
    /// accept POSTs.
    pub async fn probe(&self, url: &str) -> UrlValidation {
        if let Err(e) = validate_webhook_url(url) {
            return UrlValidation {
                valid: false,
                error: Some(e.to_string()),
                ..Default::default()
            };
        }

        match self.http.head(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => UrlValidation {
                valid: true,
                status: Some(resp.status().as_u16()),
                ..Default::default()
            },
            Err(e) => {
                tracing::debug!(url, error = %e, "webhook HEAD probe failed");
                UrlValidation {
                    valid: true,
                    warning: Some("HEAD request failed, but URL appears valid".into()),
                    ..Default::default()
                }
            }
        }
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookClient {
    async fn post(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> Result<WebhookResponse, HookError> {
        let resp = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HookError::Timeout {
                        ms: self.request_timeout.as_millis() as u64,
                    }
                } else {
                    HookError::Http(format!("No response: {e}"))
                }
            })?;

        let status = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(url, error = %e, "failed to read webhook response body");
                String::new()
            }
        };
        Ok(WebhookResponse { status, body })
    }
}
