//! Redemption Types
//!
//! A redemption batches the external withdraw operations backing a set of
//! pending withdrawal requests (or a pure rebalance back to the liquid
//! pool). It completes only when every external receipt it depends on has
//! arrived; there is no partial completion and no failure state.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{unix_now, AssetId, NodeId};

/// Opaque handle for one pending withdraw-from-node operation, as returned
/// by the external restaking protocol. Consumed exactly once on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    /// Receipt identifier assigned by the external protocol
    pub id: String,
    /// Node the withdrawal is drawn from
    pub node: NodeId,
    /// Assets covered by this receipt
    pub assets: Vec<AssetId>,
    /// Requested share amounts, parallel to `assets`
    pub share_amounts: Vec<u64>,
}

/// Where a completed redemption's funds are directed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedemptionReceiver {
    /// Rebalancing: funds return to the liquid pool
    LiquidPool,
    /// Funds back the targeted withdrawal requests
    Requests,
}

/// A batch of external withdrawal operations grouped for atomic completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redemption {
    /// Unique redemption ID, derived from the receipt set and a nonce
    pub id: String,
    /// Withdrawal requests this redemption settles (empty when purely
    /// rebalancing)
    pub request_ids: Vec<String>,
    /// External receipts this redemption depends on
    pub receipt_ids: HashSet<String>,
    /// Per-asset amounts expected from the external draws, captured at
    /// creation time
    pub expected: HashMap<AssetId, u64>,
    /// Destination of the reconciled funds
    pub receiver: RedemptionReceiver,
    /// Timestamp when the redemption was created
    pub created_at: u64,
}

impl Redemption {
    /// Create a new redemption over a set of receipts
    ///
    /// `nonce` is the engine's monotonically increasing counter; it keeps
    /// ids unique even for identical receipt sets issued in the same
    /// instant.
    pub fn new(
        request_ids: Vec<String>,
        receipts: &[WithdrawalReceipt],
        expected: HashMap<AssetId, u64>,
        receiver: RedemptionReceiver,
        nonce: u64,
    ) -> Self {
        let receipt_ids: HashSet<String> = receipts.iter().map(|r| r.id.clone()).collect();
        let id = derive_redemption_id(&receipt_ids, nonce);

        Self {
            id,
            request_ids,
            receipt_ids,
            expected,
            receiver,
            created_at: unix_now(),
        }
    }

    /// Whether the supplied receipt ids exactly match the stored set
    pub fn receipts_match(&self, supplied: &[String]) -> bool {
        let supplied: HashSet<&String> = supplied.iter().collect();
        supplied.len() == self.receipt_ids.len()
            && self.receipt_ids.iter().all(|id| supplied.contains(id))
    }
}

/// Derive a redemption id from its receipt ids plus the engine nonce
///
/// Receipt ids are sorted before hashing so the id does not depend on
/// issue order.
pub fn derive_redemption_id(receipt_ids: &HashSet<String>, nonce: u64) -> String {
    let mut sorted: Vec<&String> = receipt_ids.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
    }
    hasher.update(nonce.to_le_bytes());

    format!("rd_{}", &hex::encode(hasher.finalize())[..16])
}
