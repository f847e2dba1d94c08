//! Withdrawal Queue
//!
//! Manages pending withdrawal requests. Requests are keyed by their
//! derived id and indexed per owner; a per-owner nonce keeps ids unique
//! for identical-looking requests created in the same second.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{AccountId, AssetId, WithdrawalRequest};

/// Queue for managing withdrawal requests
pub struct WithdrawalQueue {
    /// Requests by ID
    requests: Arc<RwLock<HashMap<String, WithdrawalRequest>>>,
    /// Index: owner -> request IDs
    by_owner: Arc<RwLock<HashMap<AccountId, HashSet<String>>>>,
    /// Per-owner request counters for id derivation
    nonces: Arc<RwLock<HashMap<AccountId, u64>>>,
    /// Maximum queue size
    max_size: usize,
}

impl WithdrawalQueue {
    /// Create a new withdrawal queue
    pub fn new(max_size: usize) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            by_owner: Arc::new(RwLock::new(HashMap::new())),
            nonces: Arc::new(RwLock::new(HashMap::new())),
            max_size,
        }
    }

    /// Create and enqueue a new withdrawal request
    ///
    /// Validates the request shape; the caller is responsible for checking
    /// that every asset is registered.
    pub async fn create(
        &self,
        owner: AccountId,
        assets: Vec<AssetId>,
        amounts: Vec<u64>,
        escrowed_shares: u64,
    ) -> Result<String, QueueError> {
        if assets.len() != amounts.len() {
            return Err(QueueError::LengthMismatch {
                assets: assets.len(),
                amounts: amounts.len(),
            });
        }
        if assets.is_empty() {
            return Err(QueueError::EmptyRequest);
        }
        if escrowed_shares == 0 {
            return Err(QueueError::ZeroShares);
        }

        let mut seen = HashSet::new();
        for (asset, amount) in assets.iter().zip(&amounts) {
            if *amount == 0 {
                return Err(QueueError::ZeroAmount(asset.clone()));
            }
            if !seen.insert(asset.clone()) {
                return Err(QueueError::DuplicateAsset(asset.clone()));
            }
        }

        let mut requests = self.requests.write().await;
        if requests.len() >= self.max_size {
            return Err(QueueError::QueueFull { cap: self.max_size });
        }

        let nonce = {
            let mut nonces = self.nonces.write().await;
            let counter = nonces.entry(owner.clone()).or_insert(0);
            let nonce = *counter;
            *counter += 1;
            nonce
        };

        let request = WithdrawalRequest::new(owner.clone(), assets, amounts, escrowed_shares, nonce);
        let id = request.id.clone();

        self.by_owner
            .write()
            .await
            .entry(owner)
            .or_default()
            .insert(id.clone());
        requests.insert(id.clone(), request);

        Ok(id)
    }

    /// Get a request by ID
    pub async fn get(&self, id: &str) -> Option<WithdrawalRequest> {
        self.requests.read().await.get(id).cloned()
    }

    /// Update a request
    pub async fn update(&self, request: WithdrawalRequest) -> Result<(), QueueError> {
        let mut requests = self.requests.write().await;

        if !requests.contains_key(&request.id) {
            return Err(QueueError::NotFound(request.id.clone()));
        }

        requests.insert(request.id.clone(), request);
        Ok(())
    }

    /// Remove a request
    pub async fn remove(&self, id: &str) -> Option<WithdrawalRequest> {
        let removed = self.requests.write().await.remove(id)?;

        let mut by_owner = self.by_owner.write().await;
        if let Some(ids) = by_owner.get_mut(&removed.owner) {
            ids.remove(id);
            if ids.is_empty() {
                by_owner.remove(&removed.owner);
            }
        }

        Some(removed)
    }

    /// Pending requests for one owner
    pub async fn pending_for_owner(&self, owner: &str) -> Vec<WithdrawalRequest> {
        let ids = match self.by_owner.read().await.get(owner) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };

        let requests = self.requests.read().await;
        let mut pending: Vec<WithdrawalRequest> =
            ids.iter().filter_map(|id| requests.get(id).cloned()).collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Get all requests
    pub async fn get_all(&self) -> Vec<WithdrawalRequest> {
        self.requests.read().await.values().cloned().collect()
    }

    /// Get queue length
    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Check if queue is empty
    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }

    /// Get statistics
    pub async fn stats(&self) -> QueueStats {
        let requests = self.requests.read().await;

        QueueStats {
            total: requests.len(),
            awaiting_settlement: requests.values().filter(|r| !r.can_fulfill).count(),
            fulfillable: requests.values().filter(|r| r.can_fulfill).count(),
        }
    }
}

impl Default for WithdrawalQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total: usize,
    pub awaiting_settlement: usize,
    pub fulfillable: usize,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue: {} total | awaiting settlement: {} | fulfillable: {}",
            self.total, self.awaiting_settlement, self.fulfillable
        )
    }
}

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full: cap {cap}")]
    QueueFull { cap: usize },

    #[error("request not found: {0}")]
    NotFound(String),

    #[error("assets/amounts length mismatch: {assets} vs {amounts}")]
    LengthMismatch { assets: usize, amounts: usize },

    #[error("request names no assets")]
    EmptyRequest,

    #[error("zero amount requested for {0}")]
    ZeroAmount(String),

    #[error("asset {0} appears twice in one request")]
    DuplicateAsset(String),

    #[error("escrowed share amount is zero")]
    ZeroShares,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let queue = WithdrawalQueue::new(10);

        let id = queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();
        assert_eq!(queue.len().await, 1);

        let request = queue.get(&id).await.unwrap();
        assert_eq!(request.owner, "alice");
        assert_eq!(request.amounts, vec![100]);
        assert!(!request.can_fulfill);
    }

    #[tokio::test]
    async fn test_validation() {
        let queue = WithdrawalQueue::new(10);

        let result = queue
            .create(
                "alice".to_string(),
                vec!["tokA".to_string(), "tokB".to_string()],
                vec![100],
                100,
            )
            .await;
        assert!(matches!(result, Err(QueueError::LengthMismatch { .. })));

        let result = queue.create("alice".to_string(), vec![], vec![], 100).await;
        assert!(matches!(result, Err(QueueError::EmptyRequest)));

        let result = queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![0], 100)
            .await;
        assert!(matches!(result, Err(QueueError::ZeroAmount(_))));

        let result = queue
            .create(
                "alice".to_string(),
                vec!["tokA".to_string(), "tokA".to_string()],
                vec![50, 50],
                100,
            )
            .await;
        assert!(matches!(result, Err(QueueError::DuplicateAsset(_))));

        let result = queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![100], 0)
            .await;
        assert!(matches!(result, Err(QueueError::ZeroShares)));

        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue = WithdrawalQueue::new(1);

        queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();

        let result = queue
            .create("bob".to_string(), vec!["tokA".to_string()], vec![100], 100)
            .await;
        assert!(matches!(result, Err(QueueError::QueueFull { cap: 1 })));
    }

    #[tokio::test]
    async fn test_identical_requests_get_distinct_ids() {
        let queue = WithdrawalQueue::new(10);

        let a = queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();
        let b = queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_owner_index() {
        let queue = WithdrawalQueue::new(10);

        let a = queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();
        queue
            .create("bob".to_string(), vec!["tokA".to_string()], vec![50], 50)
            .await
            .unwrap();

        let alice = queue.pending_for_owner("alice").await;
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, a);
        assert!(queue.pending_for_owner("carol").await.is_empty());

        queue.remove(&a).await.unwrap();
        assert!(queue.pending_for_owner("alice").await.is_empty());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_and_stats() {
        let queue = WithdrawalQueue::new(10);

        let id = queue
            .create("alice".to_string(), vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();

        let mut request = queue.get(&id).await.unwrap();
        request.mark_fulfillable();
        queue.update(request).await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.awaiting_settlement, 0);
        assert_eq!(stats.fulfillable, 1);

        let mut ghost = queue.get(&id).await.unwrap();
        ghost.id = "wr_missing".to_string();
        assert!(matches!(
            queue.update(ghost).await,
            Err(QueueError::NotFound(_))
        ));
    }
}
