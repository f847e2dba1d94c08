//! Redemption Engine
//!
//! Groups the external withdraw operations backing a verified settlement
//! into a single atomic-intent batch and reconciles the outcome when every
//! receipt has arrived. A redemption has exactly two states: `Created`
//! (receipts outstanding) and gone (completed and deleted). There is no
//! failure state and no timeout; a receipt that never arrives leaves its
//! redemption open for off-protocol recovery.
//!
//! Pool accounting: the liquid portion of a settlement moves into `queued`
//! at creation; node-drawn funds enter `queued` only at completion, when
//! they physically arrive in custody. The tracked invariant
//! `liquid + queued <= custodied` therefore holds throughout the
//! redemption's lifetime.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use super::queue::{QueueError, WithdrawalQueue};
use super::verifier::SettlementPlan;
use crate::external::{Custodian, CustodyError, RestakingService, StakingError};
use crate::ledger::{BalanceLedger, LedgerError, Pool};
use crate::logging::log_slashing_event;
use crate::types::{AssetId, NodeId, Redemption, RedemptionReceiver, WithdrawalReceipt};

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("redemption not found: {0}")]
    RedemptionNotFound(String),

    #[error("supplied receipt set does not match redemption {redemption_id}")]
    WithdrawalRootMissing { redemption_id: String },

    #[error("request {0} is already committed to an open redemption")]
    RequestAlreadySettling(String),

    #[error("request not found: {0}")]
    RequestNotFound(String),

    #[error("restaking error: {0}")]
    Staking(#[from] StakingError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("custody error: {0}")]
    Custody(#[from] CustodyError),
}

/// Outcome of a completed redemption
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub redemption_id: String,
    pub receiver: RedemptionReceiver,
    pub request_ids: Vec<String>,
    /// Amounts actually received per asset, aggregated across receipts
    pub actuals: HashMap<AssetId, u64>,
    /// Assets that came back short of expectation
    pub slashed_assets: Vec<AssetId>,
    pub created_at: u64,
}

/// Batches external withdrawals and reconciles their outcomes
pub struct RedemptionEngine {
    ledger: BalanceLedger,
    queue: Arc<WithdrawalQueue>,
    staking: Arc<dyn RestakingService>,
    custodian: Arc<dyn Custodian>,
    /// Open redemptions by id
    redemptions: Arc<RwLock<HashMap<String, Redemption>>>,
    /// Outstanding receipts by id
    receipts: Arc<RwLock<HashMap<String, WithdrawalReceipt>>>,
    /// Request ids committed to an open redemption
    settling: Arc<RwLock<HashSet<String>>>,
    /// Monotonic counter folded into redemption ids
    nonce: Arc<AtomicU64>,
}

impl RedemptionEngine {
    pub fn new(
        ledger: BalanceLedger,
        queue: Arc<WithdrawalQueue>,
        staking: Arc<dyn RestakingService>,
        custodian: Arc<dyn Custodian>,
    ) -> Self {
        Self {
            ledger,
            queue,
            staking,
            custodian,
            redemptions: Arc::new(RwLock::new(HashMap::new())),
            receipts: Arc::new(RwLock::new(HashMap::new())),
            settling: Arc::new(RwLock::new(HashSet::new())),
            nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Execute a verified settlement
    ///
    /// Commits the liquid portion to `queued`, then issues one external
    /// withdrawal per drawn node. A settlement with no node draws completes
    /// synchronously: the requests are marked fulfillable and no redemption
    /// object is created (returns `None`).
    pub async fn create_settlement(
        &self,
        plan: SettlementPlan,
    ) -> Result<Option<Redemption>, EngineError> {
        self.reserve(&plan.request_ids).await?;

        // Ledger state first, funds second: commit the liquid portion
        // before anything external is initiated.
        let mut committed: Vec<(AssetId, u64)> = Vec::new();
        for (asset, amount) in &plan.liquid_draws {
            match self.ledger.transfer(asset, Pool::Liquid, Pool::Queued, *amount).await {
                Ok(()) => committed.push((asset.clone(), *amount)),
                Err(e) => {
                    self.rollback_liquid(&committed).await;
                    self.release(&plan.request_ids).await;
                    return Err(e.into());
                }
            }
        }

        if plan.node_draws.is_empty() {
            // Fully liquid: the backing funds are already queued.
            if let Err(e) = self.mark_fulfillable(&plan.request_ids).await {
                self.rollback_liquid(&committed).await;
                self.release(&plan.request_ids).await;
                return Err(e);
            }
            self.release(&plan.request_ids).await;
            return Ok(None);
        }

        // One external withdrawal per node.
        let mut batches: BTreeMap<NodeId, (Vec<AssetId>, Vec<u64>)> = BTreeMap::new();
        for draw in &plan.node_draws {
            let batch = batches.entry(draw.node).or_default();
            batch.0.push(draw.asset.clone());
            batch.1.push(draw.shares);
        }

        let mut receipts = Vec::with_capacity(batches.len());
        for (node, (assets, shares)) in batches {
            match self.staking.begin_withdrawal(node, &assets, &shares).await {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    // A begun external withdrawal cannot be aborted. Route
                    // the stray receipts back to the liquid pool and undo
                    // everything else.
                    self.salvage(&plan, receipts).await;
                    self.rollback_liquid(&committed).await;
                    self.release(&plan.request_ids).await;
                    return Err(e.into());
                }
            }
        }

        let redemption = self
            .insert_redemption(
                plan.request_ids,
                receipts,
                plan.expected,
                RedemptionReceiver::Requests,
            )
            .await;
        Ok(Some(redemption))
    }

    /// Open a rebalancing redemption over already-issued receipts
    ///
    /// Used when undelegating a node drains its positions: the receipts
    /// feed no withdrawal request, so the reconciled funds return to the
    /// liquid pool. Returns `None` when there is nothing to reconcile.
    pub async fn create_rebalance(
        &self,
        receipts: Vec<WithdrawalReceipt>,
        expected: HashMap<AssetId, u64>,
    ) -> Result<Option<Redemption>, EngineError> {
        if receipts.is_empty() {
            return Ok(None);
        }

        let redemption = self
            .insert_redemption(Vec::new(), receipts, expected, RedemptionReceiver::LiquidPool)
            .await;
        Ok(Some(redemption))
    }

    /// Complete a redemption with its full receipt set
    ///
    /// The supplied set must equal the stored set exactly; partial sets are
    /// rejected with no ledger mutation. Each receipt is completed against
    /// the external protocol, actual amounts are aggregated per asset, and
    /// any shortfall against expectation is propagated into the targeted
    /// requests as slashing. A second call with the same id fails with
    /// `RedemptionNotFound`.
    pub async fn complete_redemption(
        &self,
        id: &str,
        supplied: &[String],
    ) -> Result<CompletionResult, EngineError> {
        {
            let redemptions = self.redemptions.read().await;
            let redemption = redemptions
                .get(id)
                .ok_or_else(|| EngineError::RedemptionNotFound(id.to_string()))?;
            if !redemption.receipts_match(supplied) {
                return Err(EngineError::WithdrawalRootMissing {
                    redemption_id: id.to_string(),
                });
            }
        }

        // Take the redemption out so a concurrent duplicate completion
        // observes RedemptionNotFound.
        let redemption = self
            .redemptions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| EngineError::RedemptionNotFound(id.to_string()))?;

        let mut receipt_ids: Vec<String> = redemption.receipt_ids.iter().cloned().collect();
        receipt_ids.sort();

        let mut actuals: HashMap<AssetId, u64> = HashMap::new();
        for receipt_id in &receipt_ids {
            match self.staking.complete_withdrawal(receipt_id).await {
                Ok(amounts) => {
                    for (asset, amount) in amounts {
                        *actuals.entry(asset).or_insert(0) += amount;
                    }
                }
                Err(e) => {
                    // Receipts completed so far are consumed on the
                    // external side. Reinstate the redemption for operator
                    // recovery and surface the failure.
                    self.redemptions
                        .write()
                        .await
                        .insert(redemption.id.clone(), redemption);
                    return Err(e.into());
                }
            }
        }

        // Funds have physically arrived; bring them into the queued pool
        // and re-check custody sync.
        for (asset, amount) in &actuals {
            self.ledger.credit(asset, Pool::Queued, *amount).await?;
            let custodied = self.custodian.balance_of(asset).await?;
            self.ledger.assert_in_sync(asset, custodied).await?;
        }

        let slashed_assets = self.propagate_slashing(&redemption, &actuals).await?;

        match redemption.receiver {
            RedemptionReceiver::LiquidPool => {
                for (asset, amount) in &actuals {
                    self.ledger
                        .transfer(asset, Pool::Queued, Pool::Liquid, *amount)
                        .await?;
                }
            }
            RedemptionReceiver::Requests => {
                // The backing funds stay queued until fulfillment; any
                // surplus over expectation is retained there.
                self.mark_fulfillable(&redemption.request_ids).await?;
            }
        }

        {
            let mut receipts = self.receipts.write().await;
            for receipt_id in &redemption.receipt_ids {
                receipts.remove(receipt_id);
            }
        }
        self.release(&redemption.request_ids).await;

        Ok(CompletionResult {
            redemption_id: redemption.id,
            receiver: redemption.receiver,
            request_ids: redemption.request_ids,
            actuals,
            slashed_assets,
            created_at: redemption.created_at,
        })
    }

    /// Whether a request is committed to an open redemption
    pub async fn is_settling(&self, request_id: &str) -> bool {
        self.settling.read().await.contains(request_id)
    }

    /// Get an open redemption by id
    pub async fn get(&self, id: &str) -> Option<Redemption> {
        self.redemptions.read().await.get(id).cloned()
    }

    /// All open redemptions
    pub async fn all(&self) -> Vec<Redemption> {
        let mut all: Vec<Redemption> = self.redemptions.read().await.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    /// Number of open redemptions
    pub async fn open_count(&self) -> usize {
        self.redemptions.read().await.len()
    }

    // Reserve the targeted requests so a concurrent settlement cannot
    // double-commit them.
    async fn reserve(&self, request_ids: &[String]) -> Result<(), EngineError> {
        let mut settling = self.settling.write().await;
        for id in request_ids {
            if settling.contains(id) {
                return Err(EngineError::RequestAlreadySettling(id.clone()));
            }
        }
        for id in request_ids {
            settling.insert(id.clone());
        }
        Ok(())
    }

    async fn release(&self, request_ids: &[String]) {
        let mut settling = self.settling.write().await;
        for id in request_ids {
            settling.remove(id);
        }
    }

    async fn rollback_liquid(&self, committed: &[(AssetId, u64)]) {
        for (asset, amount) in committed {
            self.ledger
                .transfer(asset, Pool::Queued, Pool::Liquid, *amount)
                .await
                .ok();
        }
    }

    async fn mark_fulfillable(&self, request_ids: &[String]) -> Result<(), EngineError> {
        for id in request_ids {
            let mut request = self
                .queue
                .get(id)
                .await
                .ok_or_else(|| EngineError::RequestNotFound(id.clone()))?;
            request.mark_fulfillable();
            self.queue.update(request).await?;
        }
        Ok(())
    }

    // Apply per-asset slashing ratios to every targeted request drawing
    // that asset. Floor rounding in the request keeps the post-slash sum
    // at or below the actual amount received.
    async fn propagate_slashing(
        &self,
        redemption: &Redemption,
        actuals: &HashMap<AssetId, u64>,
    ) -> Result<Vec<AssetId>, EngineError> {
        let mut slashed = Vec::new();

        for (asset, &expected) in &redemption.expected {
            let actual = actuals.get(asset).copied().unwrap_or(0);
            if actual >= expected {
                continue;
            }

            let mut affected = 0usize;
            for request_id in &redemption.request_ids {
                let mut request = self
                    .queue
                    .get(request_id)
                    .await
                    .ok_or_else(|| EngineError::RequestNotFound(request_id.clone()))?;
                if request.asset_index(asset).is_none() {
                    continue;
                }
                request.apply_slash(asset, actual, expected);
                self.queue.update(request).await?;
                affected += 1;
            }

            log_slashing_event(&redemption.id, asset, expected, actual, affected);
            slashed.push(asset.clone());
        }

        Ok(slashed)
    }

    async fn insert_redemption(
        &self,
        request_ids: Vec<String>,
        receipts: Vec<WithdrawalReceipt>,
        expected: HashMap<AssetId, u64>,
        receiver: RedemptionReceiver,
    ) -> Redemption {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let redemption = Redemption::new(request_ids, &receipts, expected, receiver, nonce);

        {
            let mut store = self.receipts.write().await;
            for receipt in receipts {
                store.insert(receipt.id.clone(), receipt);
            }
        }
        self.redemptions
            .write()
            .await
            .insert(redemption.id.clone(), redemption.clone());

        redemption
    }

    // Stray receipts from a partially-issued settlement: their withdrawals
    // are already in flight, so reconcile them back to the liquid pool.
    async fn salvage(&self, plan: &SettlementPlan, receipts: Vec<WithdrawalReceipt>) {
        if receipts.is_empty() {
            return;
        }

        let issued_nodes: HashSet<NodeId> = receipts.iter().map(|r| r.node).collect();
        let mut expected: HashMap<AssetId, u64> = HashMap::new();
        for draw in &plan.node_draws {
            if issued_nodes.contains(&draw.node) {
                *expected.entry(draw.asset.clone()).or_insert(0) += draw.amount;
            }
        }

        let redemption = self
            .insert_redemption(Vec::new(), receipts, expected, RedemptionReceiver::LiquidPool)
            .await;
        tracing::warn!(
            target: "lrvault::settlement",
            redemption_id = %redemption.id,
            "settlement aborted mid-issue; stray receipts routed back to the liquid pool"
        );
    }
}
