//! Withdrawal Request Types
//!
//! A withdrawal request records a depositor's intent to withdraw a set of
//! assets against escrowed shares. Requests start unfulfillable; the
//! settlement engine flips `can_fulfill` once backing funds are confirmed
//! and scales `withdrawable` down when the external protocol slashes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{unix_now, AccountId, AssetId};

/// A pending withdrawal request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Unique request ID, derived from the request contents
    pub id: String,
    /// Owning depositor
    pub owner: AccountId,
    /// Requested assets
    pub assets: Vec<AssetId>,
    /// Requested amounts, parallel to `assets`
    pub amounts: Vec<u64>,
    /// Currently-withdrawable amounts, parallel to `assets`. Starts equal
    /// to `amounts`; reduced by slashing, never increased.
    pub withdrawable: Vec<u64>,
    /// Shares escrowed and burned for this request
    pub escrowed_shares: u64,
    /// Timestamp when the request was created
    pub created_at: u64,
    /// False until backing funds are confirmed available
    pub can_fulfill: bool,
}

impl WithdrawalRequest {
    /// Create a new withdrawal request
    ///
    /// `nonce` is the owner's request counter; it keeps ids unique for
    /// identical-looking requests created in the same second.
    pub fn new(
        owner: AccountId,
        assets: Vec<AssetId>,
        amounts: Vec<u64>,
        escrowed_shares: u64,
        nonce: u64,
    ) -> Self {
        let created_at = unix_now();
        let id = derive_request_id(&owner, &assets, &amounts, created_at, nonce);

        Self {
            id,
            owner,
            withdrawable: amounts.clone(),
            assets,
            amounts,
            escrowed_shares,
            created_at,
            can_fulfill: false,
        }
    }

    /// Position of an asset within this request
    pub fn asset_index(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Originally requested amount of an asset
    pub fn requested_amount(&self, asset: &str) -> Option<u64> {
        self.asset_index(asset).map(|i| self.amounts[i])
    }

    /// Currently withdrawable amount of an asset
    pub fn withdrawable_amount(&self, asset: &str) -> Option<u64> {
        self.asset_index(asset).map(|i| self.withdrawable[i])
    }

    /// Mark the request as fulfillable
    pub fn mark_fulfillable(&mut self) {
        self.can_fulfill = true;
    }

    /// Scale the withdrawable amount of one asset by `actual / expected`.
    ///
    /// Computed from the originally requested amount with floor rounding,
    /// so the sum across requests sharing a redemption never exceeds the
    /// amount actually received. No-op when `actual >= expected`.
    pub fn apply_slash(&mut self, asset: &str, actual: u64, expected: u64) {
        if expected == 0 || actual >= expected {
            return;
        }
        if let Some(i) = self.asset_index(asset) {
            let scaled = self.amounts[i] as u128 * actual as u128 / expected as u128;
            self.withdrawable[i] = scaled as u64;
        }
    }
}

/// Derive a request id from its contents plus a per-owner nonce
pub fn derive_request_id(
    owner: &str,
    assets: &[AssetId],
    amounts: &[u64],
    created_at: u64,
    nonce: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    for (asset, amount) in assets.iter().zip(amounts) {
        hasher.update(asset.as_bytes());
        hasher.update(amount.to_le_bytes());
    }
    hasher.update(created_at.to_le_bytes());
    hasher.update(nonce.to_le_bytes());

    format!("wr_{}", &hex::encode(hasher.finalize())[..16])
}
