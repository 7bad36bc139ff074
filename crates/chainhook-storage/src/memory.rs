//! In-memory storage backend.
//!
//! Holds subscriptions and delivery records in RAM. Useful for tests and
//! short-lived relays that don't need persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chainhook_core::{
    DeliveryLogStore, DeliveryRecord, HookError, Subscription, SubscriptionId, SubscriptionStore,
};

#[derive(Default)]
pub struct InMemoryStorage {
    subscriptions: Mutex<BTreeMap<SubscriptionId, Subscription>>,
    /// Append order; newest last.
    records: Mutex<Vec<DeliveryRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a subscription by id.
    pub fn insert_subscription(&self, subscription: Subscription) {
        lock(&self.subscriptions).insert(subscription.id, subscription);
    }

    /// Flip the active flag. Returns `false` if the id is unknown.
    pub fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        match lock(&self.subscriptions).get_mut(&id) {
            Some(sub) => {
                sub.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    /// Total number of stored delivery records.
    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl SubscriptionStore for InMemoryStorage {
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, HookError> {
        Ok(lock(&self.subscriptions).get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Subscription>, HookError> {
        Ok(lock(&self.subscriptions)
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryStorage {
    async fn insert(&self, record: DeliveryRecord) -> Result<(), HookError> {
        lock(&self.records).push(record);
        Ok(())
    }

    async fn records_for(
        &self,
        id: SubscriptionId,
        limit: Option<usize>,
    ) -> Result<Vec<DeliveryRecord>, HookError> {
        Ok(lock(&self.records)
            .iter()
            .rev()
            .filter(|r| r.subscription_id == id)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainhook_core::{FilterSet, Network};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn sub(id: i64, active: bool) -> Subscription {
        Subscription {
            id: SubscriptionId(id),
            owner_id: 10,
            owner_address: "erd1owner".into(),
            name: format!("sub {id}"),
            network: Network::Testnet,
            filters: FilterSet {
                receiver: Some("erd1shop".into()),
                ..Default::default()
            },
            webhook_url: "https://hooks.example.com/in".into(),
            is_active: active,
        }
    }

    fn record(id: i64, status: Option<u16>, retries: u32, age_secs: i64) -> DeliveryRecord {
        DeliveryRecord {
            subscription_id: SubscriptionId(id),
            transfer: json!({ "txHash": format!("tx-{age_secs}") }),
            status_code: status,
            response_text: None,
            error_message: status.is_none().then(|| "No response: refused".to_string()),
            retry_count: retries,
            success: matches!(status, Some(200..=299)),
            delivered_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn subscriptions_roundtrip() {
        let store = InMemoryStorage::new();
        store.insert_subscription(sub(1, true));
        store.insert_subscription(sub(2, false));
        store.insert_subscription(sub(3, true));

        assert_eq!(store.get(SubscriptionId(2)).await.unwrap().unwrap().name, "sub 2");
        assert!(store.get(SubscriptionId(9)).await.unwrap().is_none());

        let active: Vec<_> = store
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id.0)
            .collect();
        assert_eq!(active, vec![1, 3]);

        assert!(store.set_active(SubscriptionId(1), false));
        assert!(!store.set_active(SubscriptionId(9), true));
        assert_eq!(store.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_newest_first_and_limited() {
        let store = InMemoryStorage::new();
        store.insert(record(1, Some(500), 2, 30)).await.unwrap();
        store.insert(record(2, Some(200), 0, 20)).await.unwrap();
        store.insert(record(1, Some(200), 1, 10)).await.unwrap();
        store.insert(record(1, None, 2, 0)).await.unwrap();

        let all = store.records_for(SubscriptionId(1), None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].status_code, None);
        assert_eq!(all[2].status_code, Some(500));

        let newest = store.records_for(SubscriptionId(1), Some(1)).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].transfer["txHash"], "tx-0");
        assert_eq!(store.record_count(), 4);
    }

    #[tokio::test]
    async fn stats_from_default_aggregation() {
        let store = InMemoryStorage::new();
        for (status, retries) in [(Some(200), 0), (Some(302), 0), (Some(404), 2), (None, 2)] {
            store.insert(record(5, status, retries, 0)).await.unwrap();
        }

        let stats = store.stats_for(SubscriptionId(5), 2).await.unwrap();
        assert_eq!(stats.total_deliveries, 4);
        assert_eq!(stats.successful_deliveries, 1);
        assert_eq!(stats.failed_deliveries, 2);
        assert!((stats.avg_retry_count - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.recent_logs.len(), 2);

        let empty = store.stats_for(SubscriptionId(6), 10).await.unwrap();
        assert_eq!(empty.total_deliveries, 0);
        assert_eq!(empty.avg_retry_count, 0.0);
    }
}
