//! SQLite storage backend for ChainHook.
//!
//! Persists owners, subscriptions and webhook delivery records to a single
//! SQLite file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainhook_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./data/subscriptions.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainhook_core::{
    DeliveryLogStore, DeliveryRecord, DeliveryStats, FilterSet, HookError, Network, Subscription,
    SubscriptionId, SubscriptionStore,
};

pub struct SqliteStorage {
    pool: SqlitePool,
}

fn db(e: sqlx::Error) -> HookError {
    HookError::Storage(e.to_string())
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./data/subscriptions.db"`) or a
    /// full SQLite URL (`"sqlite:./data/subscriptions.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, HookError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection, since every `:memory:` connection is a
    /// separate database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, HookError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), HookError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                address    TEXT    UNIQUE NOT NULL,
                created_at TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL,
                name        TEXT    NOT NULL,
                webhook_url TEXT    NOT NULL,
                filters     TEXT    NOT NULL,
                network     TEXT    NOT NULL DEFAULT 'mainnet',
                is_active   INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS webhook_logs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL,
                transfer_data   TEXT    NOT NULL,
                status_code     INTEGER,
                response_text   TEXT,
                error_message   TEXT,
                retry_count     INTEGER NOT NULL DEFAULT 0,
                success         INTEGER NOT NULL DEFAULT 0,
                delivered_at    TEXT    NOT NULL,
                FOREIGN KEY (subscription_id) REFERENCES subscriptions (id) ON DELETE CASCADE
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_active ON subscriptions (is_active);",
            "CREATE INDEX IF NOT EXISTS idx_webhook_logs_subscription ON webhook_logs (subscription_id);",
        ] {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db)?;
        }

        Ok(())
    }

    // ─── Owners & subscriptions ─────────────────────────────────────────────

    /// Return the id of the user with `address`, creating it if needed.
    pub async fn create_user(&self, address: &str) -> Result<i64, HookError> {
        sqlx::query("INSERT OR IGNORE INTO users (address) VALUES (?)")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(db)?;

        let row = sqlx::query("SELECT id FROM users WHERE address = ?")
            .bind(address)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        row.try_get("id").map_err(db)
    }

    pub async fn create_subscription(
        &self,
        user_id: i64,
        name: &str,
        webhook_url: &str,
        filters: &FilterSet,
        network: Network,
    ) -> Result<SubscriptionId, HookError> {
        let filters_json = serde_json::to_string(&filters.normalized())?;
        let result = sqlx::query(
            "INSERT INTO subscriptions (user_id, name, webhook_url, filters, network, is_active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(user_id)
        .bind(name)
        .bind(webhook_url)
        .bind(filters_json)
        .bind(network.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        let id = SubscriptionId(result.last_insert_rowid());
        debug!(subscription_id = %id, network = %network, "subscription stored");
        Ok(id)
    }

    /// Flip the active flag. Returns `false` if the id is unknown.
    pub async fn set_active(&self, id: SubscriptionId, active: bool) -> Result<bool, HookError> {
        let result = sqlx::query("UPDATE subscriptions SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() > 0)
    }
}

const SUBSCRIPTION_COLUMNS: &str = "s.id, s.user_id, u.address, s.name, s.webhook_url, s.filters, s.network, s.is_active
     FROM subscriptions s JOIN users u ON u.id = s.user_id";

fn row_to_subscription(row: &SqliteRow) -> Result<Subscription, HookError> {
    let filters_raw: String = row.try_get("filters").map_err(db)?;
    let filters_value: Value = serde_json::from_str(&filters_raw)?;
    let network: String = row.try_get("network").map_err(db)?;

    Ok(Subscription {
        id: SubscriptionId(row.try_get("id").map_err(db)?),
        owner_id: row.try_get("user_id").map_err(db)?,
        owner_address: row.try_get("address").map_err(db)?,
        name: row.try_get("name").map_err(db)?,
        network: network
            .parse()
            .map_err(|_| HookError::Storage(format!("unknown network '{network}' in row")))?,
        filters: FilterSet::from_stored(&filters_value)?,
        webhook_url: row.try_get("webhook_url").map_err(db)?,
        is_active: row.try_get("is_active").map_err(db)?,
    })
}

#[async_trait]
impl SubscriptionStore for SqliteStorage {
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, HookError> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} WHERE s.id = ?");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Subscription>, HookError> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} WHERE s.is_active = 1 ORDER BY s.id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(row_to_subscription).collect()
    }
}

// ─── Delivery log ───────────────────────────────────────────────────────────

fn row_to_record(row: &SqliteRow) -> Result<DeliveryRecord, HookError> {
    let transfer_raw: String = row.try_get("transfer_data").map_err(db)?;
    let status: Option<i64> = row.try_get("status_code").map_err(db)?;
    let retry_count: i64 = row.try_get("retry_count").map_err(db)?;
    let delivered_at: DateTime<Utc> = row.try_get("delivered_at").map_err(db)?;

    Ok(DeliveryRecord {
        subscription_id: SubscriptionId(row.try_get("subscription_id").map_err(db)?),
        transfer: serde_json::from_str(&transfer_raw)?,
        status_code: status.and_then(|s| u16::try_from(s).ok()),
        response_text: row.try_get("response_text").map_err(db)?,
        error_message: row.try_get("error_message").map_err(db)?,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        success: row.try_get("success").map_err(db)?,
        delivered_at,
    })
}

#[async_trait]
impl DeliveryLogStore for SqliteStorage {
    async fn insert(&self, record: DeliveryRecord) -> Result<(), HookError> {
        let transfer = serde_json::to_string(&record.transfer)?;
        sqlx::query(
            "INSERT INTO webhook_logs
                (subscription_id, transfer_data, status_code, response_text,
                 error_message, retry_count, success, delivered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.subscription_id.0)
        .bind(transfer)
        .bind(record.status_code.map(i64::from))
        .bind(record.response_text)
        .bind(record.error_message)
        .bind(i64::from(record.retry_count))
        .bind(record.success)
        .bind(record.delivered_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn records_for(
        &self,
        id: SubscriptionId,
        limit: Option<usize>,
    ) -> Result<Vec<DeliveryRecord>, HookError> {
        // LIMIT -1 means unbounded in SQLite
        let limit = limit
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT subscription_id, transfer_data, status_code, response_text,
                    error_message, retry_count, success, delivered_at
             FROM webhook_logs
             WHERE subscription_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn stats_for(
        &self,
        id: SubscriptionId,
        recent_limit: usize,
    ) -> Result<DeliveryStats, HookError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN status_code >= 200 AND status_code < 300 THEN 1 ELSE 0 END), 0) AS successful,
                    COALESCE(SUM(CASE WHEN status_code IS NULL OR status_code >= 400 THEN 1 ELSE 0 END), 0) AS failed,
                    COALESCE(AVG(retry_count), 0.0) AS avg_retry
             FROM webhook_logs
             WHERE subscription_id = ?",
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;

        let total: i64 = row.try_get("total").map_err(db)?;
        let successful: i64 = row.try_get("successful").map_err(db)?;
        let failed: i64 = row.try_get("failed").map_err(db)?;
        let avg_retry_count: f64 = row.try_get("avg_retry").map_err(db)?;

        Ok(DeliveryStats {
            total_deliveries: total.max(0) as u64,
            successful_deliveries: successful.max(0) as u64,
            failed_deliveries: failed.max(0) as u64,
            avg_retry_count,
            recent_logs: self.records_for(id, Some(recent_limit)).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_subscription() -> (SqliteStorage, SubscriptionId) {
        let store = SqliteStorage::in_memory().await.unwrap();
        let owner = store.create_user("erd1owner").await.unwrap();
        let filters = FilterSet {
            token: Some("USDC-c76f1f".into()),
            function: Some(String::new()),
            ..Default::default()
        };
        let id = store
            .create_subscription(
                owner,
                "payments",
                "https://hooks.example.com/pay",
                &filters,
                Network::Devnet,
            )
            .await
            .unwrap();
        (store, id)
    }

    fn record(id: SubscriptionId, status: Option<u16>, retries: u32) -> DeliveryRecord {
        DeliveryRecord {
            subscription_id: id,
            transfer: json!({ "txHash": format!("tx-{retries}-{status:?}"), "value": "0" }),
            status_code: status,
            response_text: status.map(|s| format!("HTTP {s}")),
            error_message: status.is_none().then(|| "No response: connection refused".to_string()),
            retry_count: retries,
            success: matches!(status, Some(200..=299)),
            delivered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn users_are_unique_by_address() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let a = store.create_user("erd1a").await.unwrap();
        let b = store.create_user("erd1b").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.create_user("erd1a").await.unwrap(), a);
    }

    #[tokio::test]
    async fn subscription_roundtrip_with_owner_address() {
        let (store, id) = store_with_subscription().await;

        let sub = store.get(id).await.unwrap().unwrap();
        assert_eq!(sub.owner_address, "erd1owner");
        assert_eq!(sub.name, "payments");
        assert_eq!(sub.network, Network::Devnet);
        assert!(sub.is_active);
        assert_eq!(sub.filters.token(), Some("USDC-c76f1f"));
        assert_eq!(sub.filters.function(), None);

        assert!(store.get(SubscriptionId(404)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_active_excludes_disabled() {
        let (store, id) = store_with_subscription().await;
        assert_eq!(store.list_active().await.unwrap().len(), 1);

        assert!(store.set_active(id, false).await.unwrap());
        assert!(store.list_active().await.unwrap().is_empty());
        assert!(!store.set_active(SubscriptionId(404), true).await.unwrap());
    }

    #[tokio::test]
    async fn records_newest_first() {
        let (store, id) = store_with_subscription().await;
        store.insert(record(id, Some(500), 2)).await.unwrap();
        store.insert(record(id, None, 2)).await.unwrap();
        store.insert(record(id, Some(200), 1)).await.unwrap();

        let all = store.records_for(id, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].status_code, Some(200));
        assert!(all[0].success);
        assert_eq!(all[1].status_code, None);
        assert_eq!(all[1].error_message.as_deref(), Some("No response: connection refused"));
        assert_eq!(all[2].transfer["value"], "0");

        assert_eq!(store.records_for(id, Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn aggregate_stats_buckets() {
        let (store, id) = store_with_subscription().await;
        let outcomes = [
            (Some(200), 0),
            (Some(204), 0),
            (Some(301), 0),
            (Some(500), 2),
            (None, 2),
        ];
        for (status, retries) in outcomes {
            store.insert(record(id, status, retries)).await.unwrap();
        }

        let stats = store.stats_for(id, 3).await.unwrap();
        assert_eq!(stats.total_deliveries, 5);
        assert_eq!(stats.successful_deliveries, 2);
        assert_eq!(stats.failed_deliveries, 2);
        assert!((stats.avg_retry_count - 0.8).abs() < 1e-9);
        assert_eq!(stats.recent_logs.len(), 3);
        assert_eq!(stats.recent_logs[0].status_code, None);
    }

    #[tokio::test]
    async fn empty_stats() {
        let (store, id) = store_with_subscription().await;
        let stats = store.stats_for(id, 10).await.unwrap();
        assert_eq!(stats, DeliveryStats::default());
    }
}
