//! Webhook delivery with bounded retries.
//!
//! One call to [`DeliveryEngine::deliver`] is one delivery attempt sequence:
//! up to `max_attempts` sequential POSTs separated by exponential backoff,
//! followed by exactly one [`DeliveryRecord`] written through the
//! [`DeliveryLog`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use chainhook_core::{
    DeliveryConfig, DeliveryOutcome, DeliveryRecord, HookError, Subscription, TransferEvent,
};

use crate::log::DeliveryLog;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::transport::{WebhookPayload, WebhookTransport};

/// Last observed result of a sequence, carried into the log record.
#[derive(Debug, Default)]
struct LastAttempt {
    status_code: Option<u16>,
    response_text: Option<String>,
    error_message: Option<String>,
}

pub struct DeliveryEngine {
    transport: Arc<dyn WebhookTransport>,
    log: DeliveryLog,
    retry: RetryPolicy,
    request_timeout: Duration,
    snippet_chars: usize,
}

impl DeliveryEngine {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        log: DeliveryLog,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            transport,
            log,
            retry: RetryPolicy::new(RetryConfig::from(config)),
            request_timeout: config.request_timeout(),
            snippet_chars: config.response_snippet_chars,
        }
    }

    pub fn log(&self) -> &DeliveryLog {
        &self.log
    }

    /// POST `event` to the subscription's webhook until a 2xx response is
    /// received or the attempt budget is spent.
    ///
    /// Never fails: an exhausted sequence is reported as
    /// `DeliveryOutcome { success: false, .. }`. The subscription itself is
    /// left untouched.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        event: &TransferEvent,
    ) -> DeliveryOutcome {
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0u32;
        let mut success = false;
        let mut last = LastAttempt::default();

        while attempt < max_attempts && !success {
            attempt += 1;
            info!(
                subscription_id = %subscription.id,
                attempt,
                tx_hash = event.tx_hash().unwrap_or("-"),
                "delivering webhook"
            );

            let payload = WebhookPayload::new(subscription, event);
            let result = tokio::time::timeout(
                self.request_timeout,
                self.transport.post(&subscription.webhook_url, &payload),
            )
            .await
            .unwrap_or_else(|_| {
                Err(HookError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                })
            });

            match result {
                Ok(resp) if resp.is_success() => {
                    success = true;
                    last = LastAttempt {
                        status_code: Some(resp.status),
                        response_text: snippet(&resp.body, self.snippet_chars),
                        error_message: None,
                    };
                    info!(
                        subscription_id = %subscription.id,
                        status = resp.status,
                        "webhook delivered"
                    );
                }
                Ok(resp) => {
                    warn!(
                        subscription_id = %subscription.id,
                        attempt,
                        status = resp.status,
                        "webhook rejected"
                    );
                    last = LastAttempt {
                        status_code: Some(resp.status),
                        response_text: snippet(&resp.body, self.snippet_chars),
                        error_message: Some(format!("HTTP {}", resp.status)),
                    };
                }
                Err(e) => {
                    warn!(
                        subscription_id = %subscription.id,
                        attempt,
                        error = %e,
                        "webhook transport error"
                    );
                    last = LastAttempt {
                        status_code: None,
                        response_text: None,
                        error_message: Some(e.to_string()),
                    };
                }
            }

            if !success {
                if let Some(delay) = self.retry.next_delay(attempt) {
                    debug!(
                        subscription_id = %subscription.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.log
            .record(DeliveryRecord {
                subscription_id: subscription.id,
                transfer: event.as_value().clone(),
                status_code: last.status_code,
                response_text: last.response_text,
                error_message: last.error_message,
                retry_count: attempt.saturating_sub(1),
                success,
                delivered_at: Utc::now(),
            })
            .await;

        debug!(
            subscription_id = %subscription.id,
            duration_ms = started.elapsed().as_millis() as u64,
            "delivery sequence finished"
        );

        if !success {
            error!(
                subscription_id = %subscription.id,
                attempts = attempt,
                "webhook delivery failed after all attempts"
            );
        }

        DeliveryOutcome {
            success,
            attempts: attempt,
        }
    }
}

/// First `max_chars` characters of `body`; `None` for an empty body.
fn snippet(body: &str, max_chars: usize) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    Some(body.chars().take(max_chars).collect())
}
