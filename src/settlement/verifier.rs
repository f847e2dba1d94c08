//! Settlement Verifier
//!
//! Proves that a proposed combination of liquid and per-node draws exactly
//! satisfies a set of pending withdrawal requests before any external
//! operation is initiated. The check is all-or-nothing in both directions:
//! a deficit would silently starve withdrawals, a surplus would commit
//! funds that can never be returned cleanly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::external::{ValuationError, ValuationService};
use crate::types::{AssetId, NodeId, WithdrawalRequest};

/// A proposed draw of share units from one node's position in one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDraw {
    pub node: NodeId,
    pub asset: AssetId,
    pub shares: u64,
}

/// One node draw with its share amount resolved to an asset amount
#[derive(Debug, Clone)]
pub struct ResolvedNodeDraw {
    pub node: NodeId,
    pub asset: AssetId,
    pub shares: u64,
    pub amount: u64,
}

/// A verified settlement the redemption engine is authorized to execute
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    /// Targeted request ids, in the order supplied
    pub request_ids: Vec<String>,
    /// Per-asset amounts drawn from the liquid pool
    pub liquid_draws: HashMap<AssetId, u64>,
    /// Node draws with resolved asset amounts
    pub node_draws: Vec<ResolvedNodeDraw>,
    /// Per-asset amounts expected from the node draws, captured for
    /// slashing reconciliation at completion time
    pub expected: HashMap<AssetId, u64>,
}

/// Verifier errors
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("no requests targeted")]
    NoRequests,

    #[error("request {0} targeted twice")]
    DuplicateRequest(String),

    #[error("request {0} is already settled")]
    RequestAlreadyFulfillable(String),

    #[error("requests do not settle for {asset}: requested {requested}, drawn {drawn}")]
    RequestsDoNotSettle {
        asset: AssetId,
        requested: u64,
        drawn: u64,
    },

    #[error("valuation error: {0}")]
    Valuation(#[from] ValuationError),
}

/// Proves exact settlement of withdrawal requests against proposed draws
pub struct SettlementVerifier {
    valuation: Arc<dyn ValuationService>,
}

impl SettlementVerifier {
    pub fn new(valuation: Arc<dyn ValuationService>) -> Self {
        Self { valuation }
    }

    /// Verify that the proposed draws exactly satisfy the targeted requests
    ///
    /// Node draws are expressed in external share units and resolved to
    /// asset amounts here, so the verifier and the engine agree on one
    /// figure captured at creation time. Succeeds iff, for every asset
    /// touched by the requests or the draws, the total requested equals
    /// the total drawn.
    pub async fn verify(
        &self,
        requests: &[WithdrawalRequest],
        liquid_draws: &HashMap<AssetId, u64>,
        node_draws: &[NodeDraw],
    ) -> Result<SettlementPlan, VerifierError> {
        if requests.is_empty() {
            return Err(VerifierError::NoRequests);
        }

        let mut seen = HashSet::new();
        let mut requested: HashMap<AssetId, u64> = HashMap::new();
        for request in requests {
            if !seen.insert(request.id.clone()) {
                return Err(VerifierError::DuplicateRequest(request.id.clone()));
            }
            if request.can_fulfill {
                return Err(VerifierError::RequestAlreadyFulfillable(request.id.clone()));
            }
            for (asset, amount) in request.assets.iter().zip(&request.amounts) {
                *requested.entry(asset.clone()).or_insert(0) += amount;
            }
        }

        let mut drawn: HashMap<AssetId, u64> = HashMap::new();
        for (asset, amount) in liquid_draws {
            *drawn.entry(asset.clone()).or_insert(0) += amount;
        }

        let mut resolved = Vec::with_capacity(node_draws.len());
        let mut expected: HashMap<AssetId, u64> = HashMap::new();
        for draw in node_draws {
            let amount = self
                .valuation
                .shares_to_asset_amount(draw.node, &draw.asset, draw.shares)
                .await?;
            *drawn.entry(draw.asset.clone()).or_insert(0) += amount;
            *expected.entry(draw.asset.clone()).or_insert(0) += amount;
            resolved.push(ResolvedNodeDraw {
                node: draw.node,
                asset: draw.asset.clone(),
                shares: draw.shares,
                amount,
            });
        }

        // Exact equality over the union of touched assets catches both
        // deficits and surpluses, including draws on assets no request
        // names.
        let assets: HashSet<&AssetId> = requested.keys().chain(drawn.keys()).collect();
        for asset in assets {
            let want = requested.get(asset).copied().unwrap_or(0);
            let have = drawn.get(asset).copied().unwrap_or(0);
            if want != have {
                return Err(VerifierError::RequestsDoNotSettle {
                    asset: asset.clone(),
                    requested: want,
                    drawn: have,
                });
            }
        }

        Ok(SettlementPlan {
            request_ids: requests.iter().map(|r| r.id.clone()).collect(),
            liquid_draws: liquid_draws.clone(),
            node_draws: resolved,
            expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::SimulatedValuation;

    fn request(owner: &str, assets: &[(&str, u64)], nonce: u64) -> WithdrawalRequest {
        WithdrawalRequest::new(
            owner.to_string(),
            assets.iter().map(|(a, _)| a.to_string()).collect(),
            assets.iter().map(|(_, v)| *v).collect(),
            assets.iter().map(|(_, v)| *v).sum(),
            nonce,
        )
    }

    fn verifier() -> SettlementVerifier {
        SettlementVerifier::new(Arc::new(SimulatedValuation::new()))
    }

    fn liquid(draws: &[(&str, u64)]) -> HashMap<AssetId, u64> {
        draws.iter().map(|(a, v)| (a.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_exact_liquid_settlement() {
        let requests = vec![request("alice", &[("tokA", 100)], 0)];

        let plan = verifier()
            .verify(&requests, &liquid(&[("tokA", 100)]), &[])
            .await
            .unwrap();

        assert_eq!(plan.request_ids.len(), 1);
        assert_eq!(plan.liquid_draws.get("tokA"), Some(&100));
        assert!(plan.node_draws.is_empty());
        assert!(plan.expected.is_empty());
    }

    #[tokio::test]
    async fn test_one_unit_off_fails_both_directions() {
        let requests = vec![request("alice", &[("tokA", 100)], 0)];
        let verifier = verifier();

        let deficit = verifier.verify(&requests, &liquid(&[("tokA", 99)]), &[]).await;
        assert!(matches!(
            deficit,
            Err(VerifierError::RequestsDoNotSettle { requested: 100, drawn: 99, .. })
        ));

        let surplus = verifier.verify(&requests, &liquid(&[("tokA", 101)]), &[]).await;
        assert!(matches!(
            surplus,
            Err(VerifierError::RequestsDoNotSettle { requested: 100, drawn: 101, .. })
        ));
    }

    #[tokio::test]
    async fn test_mixed_draws_aggregate_per_asset() {
        let requests = vec![
            request("alice", &[("tokA", 60), ("tokB", 40)], 0),
            request("bob", &[("tokA", 40)], 0),
        ];

        let node_draws = vec![
            NodeDraw { node: 0, asset: "tokA".to_string(), shares: 70 },
            NodeDraw { node: 1, asset: "tokB".to_string(), shares: 40 },
        ];

        let plan = verifier()
            .verify(&requests, &liquid(&[("tokA", 30)]), &node_draws)
            .await
            .unwrap();

        assert_eq!(plan.expected.get("tokA"), Some(&70));
        assert_eq!(plan.expected.get("tokB"), Some(&40));
        assert_eq!(plan.node_draws.len(), 2);
        assert_eq!(plan.node_draws[0].amount, 70);
    }

    #[tokio::test]
    async fn test_draw_on_unrequested_asset_fails() {
        let requests = vec![request("alice", &[("tokA", 100)], 0)];

        let result = verifier()
            .verify(&requests, &liquid(&[("tokA", 100), ("tokB", 5)]), &[])
            .await;
        assert!(matches!(
            result,
            Err(VerifierError::RequestsDoNotSettle { requested: 0, drawn: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_request_sets() {
        let verifier = verifier();

        let result = verifier.verify(&[], &HashMap::new(), &[]).await;
        assert!(matches!(result, Err(VerifierError::NoRequests)));

        let r = request("alice", &[("tokA", 100)], 0);
        let result = verifier
            .verify(&[r.clone(), r.clone()], &liquid(&[("tokA", 200)]), &[])
            .await;
        assert!(matches!(result, Err(VerifierError::DuplicateRequest(_))));

        let mut settled = request("alice", &[("tokA", 100)], 1);
        settled.mark_fulfillable();
        let result = verifier.verify(&[settled], &liquid(&[("tokA", 100)]), &[]).await;
        assert!(matches!(
            result,
            Err(VerifierError::RequestAlreadyFulfillable(_))
        ));
    }
}
