//! Delivery outcome, log record and statistics types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::SubscriptionId;

/// Result of one delivery attempt sequence, returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Total tries made, including the first.
    pub attempts: u32,
}

/// Summary of a whole delivery attempt sequence. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub subscription_id: SubscriptionId,
    /// The transfer event exactly as forwarded to the webhook.
    pub transfer: Value,
    /// Status of the last response received, if any.
    pub status_code: Option<u16>,
    /// Leading characters of the last response body.
    pub response_text: Option<String>,
    pub error_message: Option<String>,
    /// Retries consumed (total tries minus one).
    pub retry_count: u32,
    pub success: bool,
    pub delivered_at: DateTime<Utc>,
}

/// Aggregate delivery counters for one subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total_deliveries: u64,
    /// Records whose status is in `[200, 300)`.
    pub successful_deliveries: u64,
    /// Records with no status or a status `>= 400`. Statuses 300–399 fall in
    /// neither bucket.
    pub failed_deliveries: u64,
    pub avg_retry_count: f64,
    /// Newest first.
    pub recent_logs: Vec<DeliveryRecord>,
}

pub fn is_success_status(status: Option<u16>) -> bool {
    matches!(status, Some(code) if (200..300).contains(&code))
}

pub fn is_failure_status(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(code) => code >= 400,
    }
}

impl DeliveryStats {
    /// Aggregate `records` (expected newest first), keeping up to
    /// `recent_limit` of them as `recent_logs`.
    pub fn from_records(records: &[DeliveryRecord], recent_limit: usize) -> Self {
        let total = records.len() as u64;
        let successful = records
            .iter()
            .filter(|r| is_success_status(r.status_code))
            .count() as u64;
        let failed = records
            .iter()
            .filter(|r| is_failure_status(r.status_code))
            .count() as u64;
        let avg_retry_count = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.retry_count as f64).sum::<f64>() / records.len() as f64
        };

        Self {
            total_deliveries: total,
            successful_deliveries: successful,
            failed_deliveries: failed,
            avg_retry_count,
            recent_logs: records.iter().take(recent_limit).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: Option<u16>, retries: u32) -> DeliveryRecord {
        DeliveryRecord {
            subscription_id: SubscriptionId(1),
            transfer: serde_json::json!({ "txHash": "00" }),
            status_code: status,
            response_text: None,
            error_message: None,
            retry_count: retries,
            success: is_success_status(status),
            delivered_at: Utc::now(),
        }
    }

    #[test]
    fn buckets_follow_status_codes() {
        let records = vec![
            record(Some(200), 0),
            record(Some(404), 2),
            record(None, 2),
            record(Some(201), 1),
        ];
        let stats = DeliveryStats::from_records(&records, 100);
        assert_eq!(stats.total_deliveries, 4);
        assert_eq!(stats.successful_deliveries, 2);
        assert_eq!(stats.failed_deliveries, 2);
        assert!((stats.avg_retry_count - 1.25).abs() < f64::EPSILON);
        assert_eq!(stats.recent_logs.len(), 4);
    }

    #[test]
    fn redirects_counted_in_neither_bucket() {
        let stats = DeliveryStats::from_records(&[record(Some(302), 2), record(Some(500), 2)], 10);
        assert_eq!(stats.total_deliveries, 2);
        assert_eq!(stats.successful_deliveries, 0);
        assert_eq!(stats.failed_deliveries, 1);
    }

    #[test]
    fn empty_and_limited() {
        let stats = DeliveryStats::from_records(&[], 10);
        assert_eq!(stats, DeliveryStats::default());

        let many: Vec<_> = (0..5).map(|_| record(Some(200), 0)).collect();
        assert_eq!(DeliveryStats::from_records(&many, 3).recent_logs.len(), 3);
    }
}
