//! Balance Pools
//!
//! Per-asset liquid and queued pool accounting. The staked pool is never
//! stored here; it is derived on demand from the external protocol.
//!
//! The tracked invariant is `liquid + queued <= custodied`. Callers
//! re-derive the custodied balance after every external fund movement and
//! call [`BalanceLedger::assert_in_sync`]; a violation means an external
//! transfer bypassed the ledger and is surfaced, never corrected.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::LedgerError;
use crate::types::AssetId;

/// The two stored fund pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Idle custodied funds available immediately
    Liquid,
    /// Funds committed to settling pending requests or in-flight
    /// redemptions
    Queued,
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Liquid => write!(f, "liquid"),
            Self::Queued => write!(f, "queued"),
        }
    }
}

/// Stored pool balances for one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolBalances {
    pub liquid: u64,
    pub queued: u64,
}

impl PoolBalances {
    /// Total tracked balance
    pub fn tracked(&self) -> u64 {
        self.liquid + self.queued
    }
}

/// Per-asset pool accounting
#[derive(Clone, Default)]
pub struct BalanceLedger {
    pools: Arc<RwLock<HashMap<AssetId, PoolBalances>>>,
}

impl BalanceLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an asset with empty pools
    pub async fn track(&self, asset: AssetId) {
        self.pools.write().await.entry(asset).or_default();
    }

    /// Stop tracking an asset. Fails while either pool is nonzero.
    pub async fn untrack(&self, asset: &str) -> Result<(), LedgerError> {
        let mut pools = self.pools.write().await;
        let balances = pools
            .get(asset)
            .ok_or_else(|| LedgerError::UnsupportedAsset(asset.to_string()))?;

        if balances.tracked() != 0 {
            return Err(LedgerError::AssetInUse(asset.to_string()));
        }

        pools.remove(asset);
        Ok(())
    }

    /// Current pool balances for an asset
    pub async fn balances(&self, asset: &str) -> Result<PoolBalances, LedgerError> {
        self.pools
            .read()
            .await
            .get(asset)
            .copied()
            .ok_or_else(|| LedgerError::UnsupportedAsset(asset.to_string()))
    }

    /// Credit a pool
    pub async fn credit(&self, asset: &str, pool: Pool, amount: u64) -> Result<(), LedgerError> {
        let mut pools = self.pools.write().await;
        let balances = pools
            .get_mut(asset)
            .ok_or_else(|| LedgerError::UnsupportedAsset(asset.to_string()))?;

        match pool {
            Pool::Liquid => balances.liquid += amount,
            Pool::Queued => balances.queued += amount,
        }
        Ok(())
    }

    /// Debit a pool. Requires sufficient balance.
    pub async fn debit(&self, asset: &str, pool: Pool, amount: u64) -> Result<(), LedgerError> {
        let mut pools = self.pools.write().await;
        let balances = pools
            .get_mut(asset)
            .ok_or_else(|| LedgerError::UnsupportedAsset(asset.to_string()))?;

        let slot = match pool {
            Pool::Liquid => &mut balances.liquid,
            Pool::Queued => &mut balances.queued,
        };

        if *slot < amount {
            return Err(LedgerError::InsufficientBalance {
                asset: asset.to_string(),
                pool,
                needed: amount,
                available: *slot,
            });
        }

        *slot -= amount;
        Ok(())
    }

    /// Move funds between pools atomically
    pub async fn transfer(
        &self,
        asset: &str,
        from: Pool,
        to: Pool,
        amount: u64,
    ) -> Result<(), LedgerError> {
        let mut pools = self.pools.write().await;
        let balances = pools
            .get_mut(asset)
            .ok_or_else(|| LedgerError::UnsupportedAsset(asset.to_string()))?;

        let source = match from {
            Pool::Liquid => balances.liquid,
            Pool::Queued => balances.queued,
        };

        if source < amount {
            return Err(LedgerError::InsufficientBalance {
                asset: asset.to_string(),
                pool: from,
                needed: amount,
                available: source,
            });
        }

        match from {
            Pool::Liquid => balances.liquid -= amount,
            Pool::Queued => balances.queued -= amount,
        }
        match to {
            Pool::Liquid => balances.liquid += amount,
            Pool::Queued => balances.queued += amount,
        }
        Ok(())
    }

    /// Assert the tracked invariant against the actual custodied balance
    ///
    /// Called after every external fund movement. A violation is a fatal
    /// consistency error for the enclosing operation.
    pub async fn assert_in_sync(&self, asset: &str, actual: u64) -> Result<(), LedgerError> {
        let balances = self.balances(asset).await?;
        let tracked = balances.tracked();

        if tracked > actual {
            return Err(LedgerError::AssetBalanceOutOfSync {
                asset: asset.to_string(),
                tracked,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger_with(asset: &str) -> BalanceLedger {
        let ledger = BalanceLedger::new();
        ledger.track(asset.to_string()).await;
        ledger
    }

    #[tokio::test]
    async fn test_credit_debit() {
        let ledger = ledger_with("tokA").await;

        ledger.credit("tokA", Pool::Liquid, 100).await.unwrap();
        ledger.debit("tokA", Pool::Liquid, 40).await.unwrap();

        let balances = ledger.balances("tokA").await.unwrap();
        assert_eq!(balances.liquid, 60);
        assert_eq!(balances.queued, 0);
    }

    #[tokio::test]
    async fn test_debit_insufficient() {
        let ledger = ledger_with("tokA").await;
        ledger.credit("tokA", Pool::Liquid, 10).await.unwrap();

        let result = ledger.debit("tokA", Pool::Liquid, 11).await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { needed: 11, available: 10, .. })
        ));
    }

    #[tokio::test]
    async fn test_unsupported_asset() {
        let ledger = BalanceLedger::new();
        assert!(matches!(
            ledger.credit("tokX", Pool::Liquid, 1).await,
            Err(LedgerError::UnsupportedAsset(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_between_pools() {
        let ledger = ledger_with("tokA").await;
        ledger.credit("tokA", Pool::Liquid, 100).await.unwrap();

        ledger
            .transfer("tokA", Pool::Liquid, Pool::Queued, 30)
            .await
            .unwrap();

        let balances = ledger.balances("tokA").await.unwrap();
        assert_eq!(balances.liquid, 70);
        assert_eq!(balances.queued, 30);

        let result = ledger.transfer("tokA", Pool::Queued, Pool::Liquid, 31).await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
    }

    #[tokio::test]
    async fn test_sync_check() {
        let ledger = ledger_with("tokA").await;
        ledger.credit("tokA", Pool::Liquid, 60).await.unwrap();
        ledger.credit("tokA", Pool::Queued, 40).await.unwrap();

        // tracked == actual is fine
        ledger.assert_in_sync("tokA", 100).await.unwrap();
        // surplus custody is fine
        ledger.assert_in_sync("tokA", 150).await.unwrap();

        // tracked above custody is fatal
        let result = ledger.assert_in_sync("tokA", 99).await;
        assert!(matches!(
            result,
            Err(LedgerError::AssetBalanceOutOfSync { tracked: 100, actual: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_untrack_requires_empty_pools() {
        let ledger = ledger_with("tokA").await;
        ledger.credit("tokA", Pool::Queued, 5).await.unwrap();

        assert!(matches!(
            ledger.untrack("tokA").await,
            Err(LedgerError::AssetInUse(_))
        ));

        ledger.debit("tokA", Pool::Queued, 5).await.unwrap();
        ledger.untrack("tokA").await.unwrap();
        assert!(ledger.balances("tokA").await.is_err());
    }
}
