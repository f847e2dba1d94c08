//! In-Memory Storage Implementation
//!
//! Settlement history for testing and development. Data is lost when the
//! service restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{
    FulfillmentRecord, RedemptionRecord, SettlementStore, StorageError, StorageResult,
};

/// In-memory settlement history store
///
/// Thread-safe via Arc<RwLock<>>; fulfillments are indexed per owner.
#[derive(Clone, Default)]
pub struct MemorySettlementStore {
    fulfillments: Arc<RwLock<Vec<FulfillmentRecord>>>,
    by_owner: Arc<RwLock<HashMap<String, Vec<usize>>>>,
    redemptions: Arc<RwLock<Vec<RedemptionRecord>>>,
}

impl MemorySettlementStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementStore for MemorySettlementStore {
    async fn record_fulfillment(&self, record: &FulfillmentRecord) -> StorageResult<()> {
        let mut fulfillments = self.fulfillments.write().await;

        if fulfillments.iter().any(|r| r.request_id == record.request_id) {
            return Err(StorageError::Duplicate(record.request_id.clone()));
        }

        self.by_owner
            .write()
            .await
            .entry(record.owner.clone())
            .or_default()
            .push(fulfillments.len());
        fulfillments.push(record.clone());
        Ok(())
    }

    async fn record_redemption(&self, record: &RedemptionRecord) -> StorageResult<()> {
        let mut redemptions = self.redemptions.write().await;

        if redemptions.iter().any(|r| r.redemption_id == record.redemption_id) {
            return Err(StorageError::Duplicate(record.redemption_id.clone()));
        }

        redemptions.push(record.clone());
        Ok(())
    }

    async fn fulfillments_for(&self, owner: &str) -> StorageResult<Vec<FulfillmentRecord>> {
        let indexes = match self.by_owner.read().await.get(owner) {
            Some(indexes) => indexes.clone(),
            None => return Ok(Vec::new()),
        };

        let fulfillments = self.fulfillments.read().await;
        Ok(indexes.iter().map(|&i| fulfillments[i].clone()).collect())
    }

    async fn redemptions(&self) -> StorageResult<Vec<RedemptionRecord>> {
        Ok(self.redemptions.read().await.clone())
    }

    async fn count(&self) -> StorageResult<u64> {
        Ok(self.fulfillments.read().await.len() as u64)
    }
}
