//! Persistence contracts consumed by the delivery pipeline.
//!
//! Concrete backends live in `chainhook-storage`.

use async_trait::async_trait;

use crate::delivery::{DeliveryRecord, DeliveryStats};
use crate::error::HookError;
use crate::types::{Subscription, SubscriptionId};

/// Read access to stored subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Look up one subscription with its owner's address.
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, HookError>;

    /// Every subscription whose active flag is set, across all networks.
    async fn list_active(&self) -> Result<Vec<Subscription>, HookError>;
}

/// Append-only store of delivery attempt records.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn insert(&self, record: DeliveryRecord) -> Result<(), HookError>;

    /// Records for a subscription, newest first. `None` returns all of them.
    async fn records_for(
        &self,
        id: SubscriptionId,
        limit: Option<usize>,
    ) -> Result<Vec<DeliveryRecord>, HookError>;

    /// Aggregate counters plus the `recent_limit` newest records.
    ///
    /// The default implementation aggregates [`records_for`](Self::records_for);
    /// SQL backends override it with a single aggregate query.
    async fn stats_for(
        &self,
        id: SubscriptionId,
        recent_limit: usize,
    ) -> Result<DeliveryStats, HookError> {
        let records = self.records_for(id, None).await?;
        Ok(DeliveryStats::from_records(&records, recent_limit))
    }
}
