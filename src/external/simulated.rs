//! Simulated External Collaborators
//!
//! In-memory implementations of the restaking protocol, valuation feed,
//! and custodian for development and testing. Valuation is 1:1 (one share
//! equals one base unit equals one unit of account); slashing is injected
//! per node via [`SimulatedRestaking::set_slash_factor`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{
    Custodian, CustodyError, RestakingService, StakingError, ValuationError, ValuationService,
};
use crate::types::{AssetId, NodeId, WithdrawalReceipt};

/// In-memory custodian: vault custody plus external account balances
#[derive(Clone, Default)]
pub struct SimulatedCustodian {
    custody: Arc<RwLock<HashMap<AssetId, u64>>>,
    accounts: Arc<RwLock<HashMap<(String, AssetId), u64>>>,
}

impl SimulatedCustodian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an external account with funds
    pub async fn fund_account(&self, account: &str, asset: &str, amount: u64) {
        *self
            .accounts
            .write()
            .await
            .entry((account.to_string(), asset.to_string()))
            .or_insert(0) += amount;
    }

    /// External account balance
    pub async fn account_balance(&self, account: &str, asset: &str) -> u64 {
        self.accounts
            .read()
            .await
            .get(&(account.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Delivery hook: the simulated protocol credits custody when an
    /// external withdrawal completes
    pub async fn credit_custody(&self, asset: &str, amount: u64) {
        *self.custody.write().await.entry(asset.to_string()).or_insert(0) += amount;
    }

    /// Outflow hook: the simulated protocol debits custody when funds are
    /// staked into a node
    pub async fn debit_custody(&self, asset: &str, amount: u64) -> Result<(), CustodyError> {
        let mut custody = self.custody.write().await;
        let balance = custody.entry(asset.to_string()).or_insert(0);

        if *balance < amount {
            return Err(CustodyError::InsufficientFunds {
                asset: asset.to_string(),
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }
}

#[async_trait]
impl Custodian for SimulatedCustodian {
    async fn balance_of(&self, asset: &str) -> Result<u64, CustodyError> {
        Ok(self.custody.read().await.get(asset).copied().unwrap_or(0))
    }

    async fn transfer_in(&self, asset: &str, from: &str, amount: u64) -> Result<(), CustodyError> {
        let mut accounts = self.accounts.write().await;
        let key = (from.to_string(), asset.to_string());
        let balance = accounts.entry(key).or_insert(0);

        if *balance < amount {
            return Err(CustodyError::InsufficientFunds {
                asset: asset.to_string(),
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        drop(accounts);

        self.credit_custody(asset, amount).await;
        Ok(())
    }

    async fn transfer_out(&self, asset: &str, to: &str, amount: u64) -> Result<(), CustodyError> {
        self.debit_custody(asset, amount).await?;
        self.fund_account(to, asset, amount).await;
        Ok(())
    }
}

/// 1:1 valuation: amounts, shares, and unit-of-account values are
/// interchangeable
#[derive(Clone, Default)]
pub struct SimulatedValuation;

impl SimulatedValuation {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ValuationService for SimulatedValuation {
    async fn convert_to_unit_of_account(
        &self,
        _asset: &str,
        amount: u64,
    ) -> Result<u128, ValuationError> {
        Ok(amount as u128)
    }

    async fn convert_from_unit_of_account(
        &self,
        _asset: &str,
        value: u128,
    ) -> Result<u64, ValuationError> {
        Ok(value as u64)
    }

    async fn shares_to_asset_amount(
        &self,
        _node: NodeId,
        _asset: &str,
        shares: u64,
    ) -> Result<u64, ValuationError> {
        Ok(shares)
    }
}

/// A pending withdraw-from-node operation held by the simulated protocol
struct PendingWithdrawal {
    node: NodeId,
    amounts: HashMap<AssetId, u64>,
}

/// In-memory restaking protocol
///
/// Tracks per-node positions and pending withdrawal receipts. Completing
/// a receipt delivers funds into the shared custodian, reduced by the
/// node's configured slash factor.
#[derive(Clone)]
pub struct SimulatedRestaking {
    custodian: SimulatedCustodian,
    positions: Arc<RwLock<HashMap<NodeId, HashMap<AssetId, u64>>>>,
    delegations: Arc<RwLock<HashMap<NodeId, String>>>,
    pending: Arc<RwLock<HashMap<String, PendingWithdrawal>>>,
    slash_bps: Arc<RwLock<HashMap<NodeId, u32>>>,
    next_receipt: Arc<AtomicU64>,
}

impl SimulatedRestaking {
    /// Create a simulated protocol delivering funds into `custodian`
    pub fn new(custodian: SimulatedCustodian) -> Self {
        Self {
            custodian,
            positions: Arc::new(RwLock::new(HashMap::new())),
            delegations: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(RwLock::new(HashMap::new())),
            slash_bps: Arc::new(RwLock::new(HashMap::new())),
            next_receipt: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Configure the slash factor applied when completing withdrawals
    /// from a node, in basis points (1000 = 10% penalty)
    pub async fn set_slash_factor(&self, node: NodeId, bps: u32) {
        self.slash_bps.write().await.insert(node, bps);
    }

    fn next_receipt_id(&self) -> String {
        format!("rcpt_{}", self.next_receipt.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl RestakingService for SimulatedRestaking {
    async fn delegate(&self, node: NodeId, operator: &str) -> Result<(), StakingError> {
        self.delegations
            .write()
            .await
            .insert(node, operator.to_string());
        Ok(())
    }

    async fn undelegate(&self, node: NodeId) -> Result<Vec<WithdrawalReceipt>, StakingError> {
        if self.delegations.write().await.remove(&node).is_none() {
            return Err(StakingError::NotDelegated(node));
        }

        let drained = self.positions.write().await.remove(&node).unwrap_or_default();
        if drained.is_empty() {
            return Ok(Vec::new());
        }

        let (assets, share_amounts): (Vec<AssetId>, Vec<u64>) = drained.iter().map(|(a, v)| (a.clone(), *v)).unzip();
        let receipt = WithdrawalReceipt {
            id: self.next_receipt_id(),
            node,
            assets,
            share_amounts,
        };

        self.pending.write().await.insert(
            receipt.id.clone(),
            PendingWithdrawal {
                node,
                amounts: drained,
            },
        );

        Ok(vec![receipt])
    }

    async fn deposit(&self, node: NodeId, asset: &str, amount: u64) -> Result<(), StakingError> {
        self.custodian
            .debit_custody(asset, amount)
            .await
            .map_err(|e| StakingError::Protocol(e.to_string()))?;

        *self
            .positions
            .write()
            .await
            .entry(node)
            .or_default()
            .entry(asset.to_string())
            .or_insert(0) += amount;
        Ok(())
    }

    async fn begin_withdrawal(
        &self,
        node: NodeId,
        assets: &[AssetId],
        share_amounts: &[u64],
    ) -> Result<WithdrawalReceipt, StakingError> {
        let mut positions = self.positions.write().await;
        let node_positions = positions.entry(node).or_default();

        // Validate before mutating
        for (asset, shares) in assets.iter().zip(share_amounts) {
            let available = node_positions.get(asset).copied().unwrap_or(0);
            if available < *shares {
                return Err(StakingError::InsufficientStake {
                    node,
                    asset: asset.clone(),
                    needed: *shares,
                    available,
                });
            }
        }

        let mut amounts = HashMap::new();
        for (asset, shares) in assets.iter().zip(share_amounts) {
            if let Some(balance) = node_positions.get_mut(asset) {
                *balance -= shares;
            }
            amounts.insert(asset.clone(), *shares);
        }
        drop(positions);

        let receipt = WithdrawalReceipt {
            id: self.next_receipt_id(),
            node,
            assets: assets.to_vec(),
            share_amounts: share_amounts.to_vec(),
        };

        self.pending
            .write()
            .await
            .insert(receipt.id.clone(), PendingWithdrawal { node, amounts });

        Ok(receipt)
    }

    async fn complete_withdrawal(
        &self,
        receipt_id: &str,
    ) -> Result<HashMap<AssetId, u64>, StakingError> {
        let pending = self
            .pending
            .write()
            .await
            .remove(receipt_id)
            .ok_or_else(|| StakingError::ReceiptNotFound(receipt_id.to_string()))?;

        let bps = self
            .slash_bps
            .read()
            .await
            .get(&pending.node)
            .copied()
            .unwrap_or(0);

        let mut actuals = HashMap::new();
        for (asset, amount) in pending.amounts {
            let actual = (amount as u128 * (10_000 - bps as u128) / 10_000) as u64;
            self.custodian.credit_custody(&asset, actual).await;
            actuals.insert(asset, actual);
        }

        Ok(actuals)
    }

    async fn staked_balance(&self, node: NodeId, asset: &str) -> Result<u64, StakingError> {
        Ok(self
            .positions
            .read()
            .await
            .get(&node)
            .and_then(|p| p.get(asset))
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_custodian_transfers() {
        let custodian = SimulatedCustodian::new();
        custodian.fund_account("alice", "tokA", 100).await;

        custodian.transfer_in("tokA", "alice", 60).await.unwrap();
        assert_eq!(custodian.balance_of("tokA").await.unwrap(), 60);
        assert_eq!(custodian.account_balance("alice", "tokA").await, 40);

        custodian.transfer_out("tokA", "alice", 10).await.unwrap();
        assert_eq!(custodian.balance_of("tokA").await.unwrap(), 50);
        assert_eq!(custodian.account_balance("alice", "tokA").await, 50);

        let result = custodian.transfer_out("tokA", "alice", 51).await;
        assert!(matches!(result, Err(CustodyError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn test_stake_and_withdraw_roundtrip() {
        let custodian = SimulatedCustodian::new();
        custodian.credit_custody("tokA", 100).await;

        let staking = SimulatedRestaking::new(custodian.clone());
        staking.delegate(0, "operator-1").await.unwrap();
        staking.deposit(0, "tokA", 100).await.unwrap();

        assert_eq!(custodian.balance_of("tokA").await.unwrap(), 0);
        assert_eq!(staking.staked_balance(0, "tokA").await.unwrap(), 100);

        let receipt = staking
            .begin_withdrawal(0, &["tokA".to_string()], &[40])
            .await
            .unwrap();
        assert_eq!(staking.staked_balance(0, "tokA").await.unwrap(), 60);

        let actuals = staking.complete_withdrawal(&receipt.id).await.unwrap();
        assert_eq!(actuals.get("tokA"), Some(&40));
        assert_eq!(custodian.balance_of("tokA").await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_slash_factor_applied_on_completion() {
        let custodian = SimulatedCustodian::new();
        custodian.credit_custody("tokA", 100).await;

        let staking = SimulatedRestaking::new(custodian.clone());
        staking.delegate(0, "operator-1").await.unwrap();
        staking.deposit(0, "tokA", 100).await.unwrap();
        staking.set_slash_factor(0, 1_000).await; // 10%

        let receipt = staking
            .begin_withdrawal(0, &["tokA".to_string()], &[100])
            .await
            .unwrap();
        let actuals = staking.complete_withdrawal(&receipt.id).await.unwrap();

        assert_eq!(actuals.get("tokA"), Some(&90));
        assert_eq!(custodian.balance_of("tokA").await.unwrap(), 90);
    }

    #[tokio::test]
    async fn test_receipt_consumed_once() {
        let custodian = SimulatedCustodian::new();
        custodian.credit_custody("tokA", 10).await;

        let staking = SimulatedRestaking::new(custodian.clone());
        staking.delegate(0, "operator-1").await.unwrap();
        staking.deposit(0, "tokA", 10).await.unwrap();

        let receipt = staking
            .begin_withdrawal(0, &["tokA".to_string()], &[10])
            .await
            .unwrap();

        staking.complete_withdrawal(&receipt.id).await.unwrap();
        let result = staking.complete_withdrawal(&receipt.id).await;
        assert!(matches!(result, Err(StakingError::ReceiptNotFound(_))));
    }

    #[tokio::test]
    async fn test_begin_withdrawal_insufficient_stake() {
        let custodian = SimulatedCustodian::new();
        let staking = SimulatedRestaking::new(custodian);

        let result = staking.begin_withdrawal(0, &["tokA".to_string()], &[1]).await;
        assert!(matches!(result, Err(StakingError::InsufficientStake { .. })));
    }

    #[tokio::test]
    async fn test_undelegate_drains_positions() {
        let custodian = SimulatedCustodian::new();
        custodian.credit_custody("tokA", 50).await;

        let staking = SimulatedRestaking::new(custodian.clone());
        staking.delegate(3, "operator-1").await.unwrap();
        staking.deposit(3, "tokA", 50).await.unwrap();

        let receipts = staking.undelegate(3).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(staking.staked_balance(3, "tokA").await.unwrap(), 0);

        let actuals = staking.complete_withdrawal(&receipts[0].id).await.unwrap();
        assert_eq!(actuals.get("tokA"), Some(&50));
    }
}
