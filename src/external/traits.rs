//! External Collaborator Trait Definitions
//!
//! Abstract interfaces for the restaking protocol, valuation feed, and
//! token custodian. Implementations:
//! - `SimulatedRestaking` / `SimulatedValuation` / `SimulatedCustodian`
//!   (in-memory, for development and testing)
//! - production adapters live outside this crate

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AssetId, NodeId, WithdrawalReceipt};

/// Errors from the external restaking protocol
#[derive(Debug, Error)]
pub enum StakingError {
    #[error("node {0} is not delegated")]
    NotDelegated(NodeId),

    #[error("receipt not found: {0}")]
    ReceiptNotFound(String),

    #[error("insufficient staked balance on node {node} for {asset}: needed {needed}, available {available}")]
    InsufficientStake {
        node: NodeId,
        asset: AssetId,
        needed: u64,
        available: u64,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StakingError {
    /// Transient protocol failures can be retried; the rest are terminal
    /// for the call that produced them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StakingError::Protocol(_))
    }
}

/// Errors from the valuation service
#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("no valuation for asset: {0}")]
    UnsupportedAsset(AssetId),

    #[error("valuation feed error: {0}")]
    Feed(String),
}

/// Errors from the token custodian
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("insufficient custodied funds for {asset}: needed {needed}, available {available}")]
    InsufficientFunds {
        asset: AssetId,
        needed: u64,
        available: u64,
    },

    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Price/valuation feed: converts asset amounts to and from the common
/// unit of account, and external share units to asset amounts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValuationService: Send + Sync {
    /// Value of `amount` base units in the unit of account
    async fn convert_to_unit_of_account(
        &self,
        asset: &str,
        amount: u64,
    ) -> Result<u128, ValuationError>;

    /// Asset amount worth `value` units of account
    async fn convert_from_unit_of_account(
        &self,
        asset: &str,
        value: u128,
    ) -> Result<u64, ValuationError>;

    /// Asset amount represented by `shares` external share units on a node
    async fn shares_to_asset_amount(
        &self,
        node: NodeId,
        asset: &str,
        shares: u64,
    ) -> Result<u64, ValuationError>;
}

/// The external restaking protocol, consumed as an opaque service. Begin
/// and complete are separated by an externally-determined delay that may
/// be unbounded; a receipt that never completes simply never completes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RestakingService: Send + Sync {
    /// Delegate a node to an external operator
    async fn delegate(&self, node: NodeId, operator: &str) -> Result<(), StakingError>;

    /// Undelegate a node, returning receipts for every position it held
    async fn undelegate(&self, node: NodeId) -> Result<Vec<WithdrawalReceipt>, StakingError>;

    /// Move custodied funds into a node's position
    async fn deposit(&self, node: NodeId, asset: &str, amount: u64) -> Result<(), StakingError>;

    /// Begin withdrawing share amounts from a node. Returns the receipt
    /// identifying the pending operation.
    async fn begin_withdrawal(
        &self,
        node: NodeId,
        assets: &[AssetId],
        share_amounts: &[u64],
    ) -> Result<WithdrawalReceipt, StakingError>;

    /// Complete a pending withdrawal, returning the amounts actually
    /// received per asset. Consumes the receipt.
    async fn complete_withdrawal(
        &self,
        receipt_id: &str,
    ) -> Result<HashMap<AssetId, u64>, StakingError>;

    /// Current staked balance of an asset on a node
    async fn staked_balance(&self, node: NodeId, asset: &str) -> Result<u64, StakingError>;
}

/// Custody of the vault's idle funds
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Custodian: Send + Sync {
    /// Actual custodied balance of an asset
    async fn balance_of(&self, asset: &str) -> Result<u64, CustodyError>;

    /// Pull funds from an external account into custody
    async fn transfer_in(&self, asset: &str, from: &str, amount: u64) -> Result<(), CustodyError>;

    /// Pay funds out of custody to an external account
    async fn transfer_out(&self, asset: &str, to: &str, amount: u64) -> Result<(), CustodyError>;
}
