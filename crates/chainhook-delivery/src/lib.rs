//! chainhook-delivery: webhook delivery for ChainHook.
//!
//! # Features
//! - Sequential retries with exponential backoff capped at `max_backoff`
//! - Per-attempt request timeout
//! - Exactly one [`DeliveryRecord`](chainhook_core::DeliveryRecord) per sequence
//! - Log-write failures never affect the delivery outcome
//! - Webhook URL validation and HEAD probing

pub mod dispatch;
pub mod engine;
pub mod log;
pub mod retry;
pub mod transport;
pub mod validate;

pub use dispatch::WebhookDispatcher;
pub use engine::DeliveryEngine;
pub use log::DeliveryLog;
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::{
    HttpWebhookClient, UrlValidation, WebhookPayload, WebhookResponse, WebhookTransport,
};
pub use validate::validate_webhook_url;
