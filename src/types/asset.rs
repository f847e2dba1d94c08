//! Asset Types
//!
//! A registered asset carries its decimal precision, current price in the
//! unit of account, and the guard threshold applied to price updates.

use serde::{Deserialize, Serialize};

use crate::types::AssetId;

/// Fixed-point scale for prices: unit-of-account value of one whole token,
/// scaled by 1e18.
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// A yield-bearing asset accepted by the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset identifier
    pub id: AssetId,
    /// Decimal precision of base units
    pub decimals: u8,
    /// Current price: unit-of-account per whole token, scaled by
    /// [`PRICE_SCALE`]. Never zero while registered.
    pub price: u128,
    /// Maximum relative price move per update, in basis points
    pub volatility_threshold_bps: u32,
}

impl Asset {
    /// Create a new asset record
    pub fn new(
        id: impl Into<AssetId>,
        decimals: u8,
        price: u128,
        volatility_threshold_bps: u32,
    ) -> Self {
        Self {
            id: id.into(),
            decimals,
            price,
            volatility_threshold_bps,
        }
    }

    /// Value of `amount` base units in the unit of account (scaled by
    /// [`PRICE_SCALE`])
    pub fn value_of(&self, amount: u64) -> u128 {
        let base: u128 = 10u128.pow(self.decimals as u32);
        amount as u128 * self.price / base
    }
}
