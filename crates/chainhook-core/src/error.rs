//! Error types shared by every ChainHook crate.

use thiserror::Error;

use crate::types::SubscriptionId;

/// Errors surfaced by subscription management, the upstream feed,
/// webhook transport and persistence.
///
/// A webhook sequence that exhausts its attempts is *not* an error; it is a
/// [`DeliveryOutcome`](crate::delivery::DeliveryOutcome) with `success == false`.
#[derive(Debug, Error)]
pub enum HookError {
    /// Filter set rejected at activation time.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Upstream feed unreachable, or its endpoint could not be resolved.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No live registration exists for the subscription.
    #[error("Subscription {0} not found")]
    NotFound(SubscriptionId),

    /// Webhook target is not an absolute http(s) URL.
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    /// Outbound HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Persistence backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing or malformed configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The component has been shut down.
    #[error("Connection manager is shut down")]
    Closed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl HookError {
    /// Returns `true` for a deactivate on an unknown subscription.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout { .. } | Self::Connection(_)
        )
    }
}
