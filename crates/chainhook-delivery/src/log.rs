//! Delivery log facade.
//!
//! Wraps a [`DeliveryLogStore`] so that persisting an outcome never fails
//! the delivery that produced it.

use std::sync::Arc;

use chainhook_core::{DeliveryLogStore, DeliveryRecord, DeliveryStats, HookError, SubscriptionId};
use tracing::{debug, error};

/// Number of newest records included in [`DeliveryStats::recent_logs`].
pub const DEFAULT_RECENT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct DeliveryLog {
    store: Arc<dyn DeliveryLogStore>,
    recent_limit: usize,
}

impl DeliveryLog {
    pub fn new(store: Arc<dyn DeliveryLogStore>) -> Self {
        Self {
            store,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }

    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Append one record. Storage failures are logged and swallowed.
    pub async fn record(&self, entry: DeliveryRecord) {
        let subscription_id = entry.subscription_id;
        match self.store.insert(entry).await {
            Ok(()) => debug!(subscription_id = %subscription_id, "delivery record stored"),
            Err(e) => error!(
                subscription_id = %subscription_id,
                error = %e,
                "failed to log webhook delivery"
            ),
        }
    }

    pub async fn stats_for(&self, id: SubscriptionId) -> Result<DeliveryStats, HookError> {
        self.store.stats_for(id, self.recent_limit).await
    }
}
