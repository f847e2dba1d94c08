//! Domain Types
//!
//! Core types shared across the ledger, queue, and settlement engine.

pub mod asset;
pub mod redemption;
pub mod request;

pub use asset::{Asset, PRICE_SCALE};
pub use redemption::{Redemption, RedemptionReceiver, WithdrawalReceipt};
pub use request::WithdrawalRequest;

/// Account identifier (depositor or operator address)
pub type AccountId = String;

/// Registered asset identifier
pub type AssetId = String;

/// Node identifier, assigned sequentially by the registry
pub type NodeId = u64;

/// External restaking operator identifier
pub type OperatorId = String;

/// Current unix timestamp in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
