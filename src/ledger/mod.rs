//! Balance Ledger
//!
//! Per-asset tracking of the vault's three fund pools: `liquid` (idle
//! custodied funds), `queued` (funds committed to in-flight settlement),
//! and `staked` (held inside nodes, derived on demand from the external
//! protocol, never stored). Also owns the asset registry and its price
//! guard.

pub mod assets;
pub mod pools;

pub use assets::AssetRegistry;
pub use pools::{BalanceLedger, Pool, PoolBalances};

use thiserror::Error;

use crate::types::AssetId;

/// Ledger and asset-registry errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(AssetId),

    #[error("asset already registered: {0}")]
    AlreadyRegistered(AssetId),

    #[error("price must be nonzero for asset {0}")]
    PriceIsZero(AssetId),

    #[error("price update for {asset} exceeds volatility guard: {old_price} -> {new_price} (max {max_bps} bps)")]
    PriceChangeExceedsGuard {
        asset: AssetId,
        old_price: u128,
        new_price: u128,
        max_bps: u32,
    },

    #[error("asset {0} still has tracked or staked funds")]
    AssetInUse(AssetId),

    #[error("insufficient {pool} balance for {asset}: needed {needed}, available {available}")]
    InsufficientBalance {
        asset: AssetId,
        pool: Pool,
        needed: u64,
        available: u64,
    },

    #[error("tracked balance out of sync for {asset}: liquid+queued {tracked} exceeds custodied {actual}")]
    AssetBalanceOutOfSync {
        asset: AssetId,
        tracked: u64,
        actual: u64,
    },
}
