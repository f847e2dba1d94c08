//! Storage Trait Definitions
//!
//! Abstract storage for settlement history: fulfilled withdrawal requests
//! and completed redemptions. History is write-only bookkeeping; the
//! engine never reads it back for decisions.
//! Implementations can use SQLite (production) or in-memory (testing).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AccountId, AssetId, RedemptionReceiver};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A fulfilled withdrawal request, as paid out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRecord {
    pub request_id: String,
    pub owner: AccountId,
    pub assets: Vec<AssetId>,
    /// Amounts actually paid, after any slashing
    pub amounts: Vec<u64>,
    pub escrowed_shares: u64,
    pub requested_at: u64,
    pub fulfilled_at: u64,
}

/// A completed redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub redemption_id: String,
    pub request_ids: Vec<String>,
    pub receipt_count: u32,
    pub receiver: RedemptionReceiver,
    /// Whether any asset came back short of expectation
    pub slashed: bool,
    pub created_at: u64,
    pub completed_at: u64,
}

/// Settlement history storage interface
///
/// Implementations:
/// - `SqliteSettlementStore` - Production storage with SQLite
/// - `MemorySettlementStore` - In-memory storage for testing
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Record a fulfilled withdrawal request
    async fn record_fulfillment(&self, record: &FulfillmentRecord) -> StorageResult<()>;

    /// Record a completed redemption
    async fn record_redemption(&self, record: &RedemptionRecord) -> StorageResult<()>;

    /// Fulfillments for one owner, oldest first
    async fn fulfillments_for(&self, owner: &str) -> StorageResult<Vec<FulfillmentRecord>>;

    /// All completed redemptions, oldest first
    async fn redemptions(&self) -> StorageResult<Vec<RedemptionRecord>>;

    /// Number of recorded fulfillments
    async fn count(&self) -> StorageResult<u64>;
}
