//! SQLite Persistent Storage for Settlement History
//!
//! Durable history that survives service restarts. Uses connection
//! pooling via r2d2 for concurrent access; asset and request-id vectors
//! are stored as JSON columns.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

use super::traits::{
    FulfillmentRecord, RedemptionRecord, SettlementStore, StorageError, StorageResult,
};
use crate::types::RedemptionReceiver;

/// SQLite-backed settlement history store with connection pooling
pub struct SqliteSettlementStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteSettlementStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fulfillments (
                request_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                assets TEXT NOT NULL,
                amounts TEXT NOT NULL,
                escrowed_shares INTEGER NOT NULL,
                requested_at INTEGER NOT NULL,
                fulfilled_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fulfillments_owner ON fulfillments(owner);
            CREATE INDEX IF NOT EXISTS idx_fulfillments_fulfilled_at ON fulfillments(fulfilled_at);

            CREATE TABLE IF NOT EXISTS redemptions (
                redemption_id TEXT PRIMARY KEY,
                request_ids TEXT NOT NULL,
                receipt_count INTEGER NOT NULL,
                receiver TEXT NOT NULL,
                slashed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                completed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_redemptions_completed_at ON redemptions(completed_at);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_fulfillment(row: &rusqlite::Row) -> rusqlite::Result<FulfillmentRecord> {
        let assets: String = row.get("assets")?;
        let amounts: String = row.get("amounts")?;

        Ok(FulfillmentRecord {
            request_id: row.get("request_id")?,
            owner: row.get("owner")?,
            assets: serde_json::from_str(&assets).unwrap_or_default(),
            amounts: serde_json::from_str(&amounts).unwrap_or_default(),
            escrowed_shares: row.get::<_, i64>("escrowed_shares")? as u64,
            requested_at: row.get::<_, i64>("requested_at")? as u64,
            fulfilled_at: row.get::<_, i64>("fulfilled_at")? as u64,
        })
    }

    fn row_to_redemption(row: &rusqlite::Row) -> rusqlite::Result<RedemptionRecord> {
        let request_ids: String = row.get("request_ids")?;
        let receiver: String = row.get("receiver")?;

        Ok(RedemptionRecord {
            redemption_id: row.get("redemption_id")?,
            request_ids: serde_json::from_str(&request_ids).unwrap_or_default(),
            receipt_count: row.get::<_, i64>("receipt_count")? as u32,
            receiver: match receiver.as_str() {
                "liquid_pool" => RedemptionReceiver::LiquidPool,
                _ => RedemptionReceiver::Requests,
            },
            slashed: row.get::<_, i64>("slashed")? != 0,
            created_at: row.get::<_, i64>("created_at")? as u64,
            completed_at: row.get::<_, i64>("completed_at")? as u64,
        })
    }

    fn receiver_str(receiver: RedemptionReceiver) -> &'static str {
        match receiver {
            RedemptionReceiver::LiquidPool => "liquid_pool",
            RedemptionReceiver::Requests => "requests",
        }
    }

    fn duplicate_error(e: rusqlite::Error, key: &str) -> StorageError {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            if err.extended_code == 1555 || err.extended_code == 2067 {
                return StorageError::Duplicate(key.to_string());
            }
        }
        StorageError::Database(e.to_string())
    }
}

#[async_trait]
impl SettlementStore for SqliteSettlementStore {
    async fn record_fulfillment(&self, record: &FulfillmentRecord) -> StorageResult<()> {
        let conn = self.conn()?;

        let assets = serde_json::to_string(&record.assets)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let amounts = serde_json::to_string(&record.amounts)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO fulfillments (
                request_id, owner, assets, amounts,
                escrowed_shares, requested_at, fulfilled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.request_id,
                record.owner,
                assets,
                amounts,
                record.escrowed_shares as i64,
                record.requested_at as i64,
                record.fulfilled_at as i64,
            ],
        )
        .map_err(|e| Self::duplicate_error(e, &record.request_id))?;

        Ok(())
    }

    async fn record_redemption(&self, record: &RedemptionRecord) -> StorageResult<()> {
        let conn = self.conn()?;

        let request_ids = serde_json::to_string(&record.request_ids)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO redemptions (
                redemption_id, request_ids, receipt_count, receiver,
                slashed, created_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.redemption_id,
                request_ids,
                record.receipt_count as i64,
                Self::receiver_str(record.receiver),
                record.slashed as i64,
                record.created_at as i64,
                record.completed_at as i64,
            ],
        )
        .map_err(|e| Self::duplicate_error(e, &record.redemption_id))?;

        Ok(())
    }

    async fn fulfillments_for(&self, owner: &str) -> StorageResult<Vec<FulfillmentRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM fulfillments WHERE owner = ?1 ORDER BY fulfilled_at ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let records = stmt
            .query_map(params![owner], |row| Self::row_to_fulfillment(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(records)
    }

    async fn redemptions(&self) -> StorageResult<Vec<RedemptionRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM redemptions ORDER BY completed_at ASC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let records = stmt
            .query_map([], |row| Self::row_to_redemption(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(records)
    }

    async fn count(&self) -> StorageResult<u64> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM fulfillments", [], |row| row.get(0))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fulfillment(request_id: &str, owner: &str, fulfilled_at: u64) -> FulfillmentRecord {
        FulfillmentRecord {
            request_id: request_id.to_string(),
            owner: owner.to_string(),
            assets: vec!["tokA".to_string(), "tokB".to_string()],
            amounts: vec![90, 40],
            escrowed_shares: 130,
            requested_at: 1_000,
            fulfilled_at,
        }
    }

    #[tokio::test]
    async fn test_fulfillment_roundtrip() {
        let store = SqliteSettlementStore::in_memory().unwrap();

        store.record_fulfillment(&fulfillment("wr_1", "alice", 2_000)).await.unwrap();
        store.record_fulfillment(&fulfillment("wr_2", "alice", 3_000)).await.unwrap();
        store.record_fulfillment(&fulfillment("wr_3", "bob", 2_500)).await.unwrap();

        let alice = store.fulfillments_for("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0], fulfillment("wr_1", "alice", 2_000));
        assert_eq!(alice[1].request_id, "wr_2");
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_fulfillment_rejected() {
        let store = SqliteSettlementStore::in_memory().unwrap();

        store.record_fulfillment(&fulfillment("wr_1", "alice", 2_000)).await.unwrap();
        let result = store.record_fulfillment(&fulfillment("wr_1", "alice", 2_000)).await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_redemption_roundtrip() {
        let store = SqliteSettlementStore::in_memory().unwrap();

        let record = RedemptionRecord {
            redemption_id: "rd_1".to_string(),
            request_ids: vec!["wr_1".to_string(), "wr_2".to_string()],
            receipt_count: 3,
            receiver: RedemptionReceiver::Requests,
            slashed: true,
            created_at: 1_000,
            completed_at: 2_000,
        };
        store.record_redemption(&record).await.unwrap();

        let rebalance = RedemptionRecord {
            redemption_id: "rd_2".to_string(),
            request_ids: vec![],
            receipt_count: 1,
            receiver: RedemptionReceiver::LiquidPool,
            slashed: false,
            created_at: 1_500,
            completed_at: 2_500,
        };
        store.record_redemption(&rebalance).await.unwrap();

        let all = store.redemptions().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], record);
        assert_eq!(all[1].receiver, RedemptionReceiver::LiquidPool);
    }
}
