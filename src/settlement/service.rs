//! Settlement Service
//!
//! Facade wiring the queue, ledger, node registry, and redemption engine
//! behind the vault's exposed operations. Privileged entry points take the
//! caller's account id and check it against the capability table; request
//! creation and fulfillment are owner-scoped.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::engine::{EngineError, RedemptionEngine};
use super::queue::{QueueError, QueueStats, WithdrawalQueue};
use super::verifier::{NodeDraw, SettlementVerifier, VerifierError};
use crate::access::{AccessError, AccessTable, Capability};
use crate::config::VaultConfig;
use crate::external::{
    Custodian, CustodyError, RestakingService, StakingError, ValuationError, ValuationService,
};
use crate::ledger::{AssetRegistry, BalanceLedger, LedgerError, Pool, PoolBalances};
use crate::logging::{log_settlement_event, log_withdrawal_event};
use crate::nodes::{Node, NodeError, NodeRegistry};
use crate::storage::{FulfillmentRecord, RedemptionRecord, SettlementStore, StorageError};
use crate::types::{
    unix_now, AccountId, Asset, AssetId, NodeId, Redemption, WithdrawalRequest,
};

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("request not found: {0}")]
    RequestNotFound(String),

    #[error("caller {caller} does not own request {request}")]
    NotRequestOwner { request: String, caller: AccountId },

    #[error("withdrawal delay not met for {request}: {remaining_secs}s remaining")]
    WithdrawalDelayNotMet { request: String, remaining_secs: u64 },

    #[error("request {0} is not ready to fulfill")]
    WithdrawalNotReadyToFulfill(String),

    #[error("amount must be nonzero")]
    ZeroAmount,

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Verifier(#[from] VerifierError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("valuation error: {0}")]
    Valuation(#[from] ValuationError),

    #[error("restaking error: {0}")]
    Staking(#[from] StakingError),

    #[error("custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServiceError {
    /// Temporal and transient failures the caller can retry later; input
    /// validation and invariant violations are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::WithdrawalDelayNotMet { .. }
            | ServiceError::WithdrawalNotReadyToFulfill(_) => true,
            ServiceError::Engine(EngineError::WithdrawalRootMissing { .. }) => true,
            ServiceError::Engine(EngineError::Staking(e)) | ServiceError::Staking(e) => {
                e.is_retryable()
            }
            ServiceError::Storage(_) => true,
            _ => false,
        }
    }
}

/// Settlement service
pub struct SettlementService {
    config: VaultConfig,
    access: AccessTable,
    assets: AssetRegistry,
    ledger: BalanceLedger,
    nodes: NodeRegistry,
    queue: Arc<WithdrawalQueue>,
    verifier: SettlementVerifier,
    engine: RedemptionEngine,
    valuation: Arc<dyn ValuationService>,
    staking: Arc<dyn RestakingService>,
    custodian: Arc<dyn Custodian>,
    store: Arc<dyn SettlementStore>,
    running: Arc<RwLock<bool>>,
}

impl SettlementService {
    /// Create a new settlement service over the given collaborators
    pub fn new(
        config: VaultConfig,
        access: AccessTable,
        valuation: Arc<dyn ValuationService>,
        staking: Arc<dyn RestakingService>,
        custodian: Arc<dyn Custodian>,
        store: Arc<dyn SettlementStore>,
    ) -> Self {
        let ledger = BalanceLedger::new();
        let queue = Arc::new(WithdrawalQueue::new(config.max_queue_size));
        let engine = RedemptionEngine::new(
            ledger.clone(),
            queue.clone(),
            staking.clone(),
            custodian.clone(),
        );

        Self {
            assets: AssetRegistry::new(),
            nodes: NodeRegistry::new(config.max_nodes),
            verifier: SettlementVerifier::new(valuation.clone()),
            engine,
            queue,
            ledger,
            access,
            valuation,
            staking,
            custodian,
            store,
            running: Arc::new(RwLock::new(false)),
            config,
        }
    }

    // ---- asset management ----

    /// Register a new asset and start tracking its pools
    pub async fn register_asset(&self, caller: &str, asset: Asset) -> Result<(), ServiceError> {
        self.access.check(caller, Capability::ManageAssets)?;

        let id = asset.id.clone();
        self.assets.register(asset).await?;
        self.ledger.track(id).await;
        Ok(())
    }

    /// Remove an asset. Fails while pool or staked funds remain.
    pub async fn remove_asset(&self, caller: &str, asset: &str) -> Result<(), ServiceError> {
        self.access.check(caller, Capability::ManageAssets)?;

        if self.staked_balance(asset).await? != 0 {
            return Err(LedgerError::AssetInUse(asset.to_string()).into());
        }
        self.ledger.untrack(asset).await?;
        self.assets.remove(asset).await?;
        Ok(())
    }

    /// Update an asset's price, subject to its volatility guard
    pub async fn update_price(
        &self,
        caller: &str,
        asset: &str,
        new_price: u128,
    ) -> Result<(), ServiceError> {
        self.access.check(caller, Capability::ManageAssets)?;
        self.assets.update_price(asset, new_price).await?;
        Ok(())
    }

    // ---- node management ----

    /// Create a new restaking node
    pub async fn create_node(&self, caller: &str) -> Result<NodeId, ServiceError> {
        self.access.check(caller, Capability::ManageNodes)?;
        Ok(self.nodes.create().await?)
    }

    /// Delegate a node to an external operator
    pub async fn delegate_node(
        &self,
        caller: &str,
        node: NodeId,
        operator: &str,
    ) -> Result<(), ServiceError> {
        self.access.check(caller, Capability::ManageNodes)?;

        let record = self.nodes.get(node).await?;
        if let Some(current) = record.operator {
            return Err(NodeError::AlreadyDelegated { node, operator: current }.into());
        }

        self.staking.delegate(node, operator).await?;
        self.nodes.set_operator(node, operator.to_string()).await?;
        Ok(())
    }

    /// Undelegate a node
    ///
    /// The external protocol drains every position the node held and
    /// returns receipts; those feed a rebalancing redemption whose funds
    /// return to the liquid pool on completion. Returns the redemption id,
    /// or `None` when the node held nothing.
    pub async fn undelegate_node(
        &self,
        caller: &str,
        node: NodeId,
    ) -> Result<Option<String>, ServiceError> {
        self.access.check(caller, Capability::ManageNodes)?;
        self.nodes.operator(node).await?;

        let receipts = self.staking.undelegate(node).await?;
        self.nodes.clear_operator(node).await?;

        let mut expected: HashMap<AssetId, u64> = HashMap::new();
        for receipt in &receipts {
            for (asset, shares) in receipt.assets.iter().zip(&receipt.share_amounts) {
                let amount = self
                    .valuation
                    .shares_to_asset_amount(receipt.node, asset, *shares)
                    .await?;
                *expected.entry(asset.clone()).or_insert(0) += amount;
            }
        }

        let redemption = self.engine.create_rebalance(receipts, expected).await?;
        if let Some(ref redemption) = redemption {
            log_settlement_event("rebalance_created", Some(&redemption.id), 0, 1);
        }
        Ok(redemption.map(|r| r.id))
    }

    /// Stake liquid funds into a node's position
    pub async fn stake(
        &self,
        caller: &str,
        node: NodeId,
        asset: &str,
        amount: u64,
    ) -> Result<(), ServiceError> {
        self.access.check(caller, Capability::ManageNodes)?;
        if amount == 0 {
            return Err(ServiceError::ZeroAmount);
        }
        self.nodes.operator(node).await?;
        self.require_registered(asset).await?;

        // Ledger first, then the external movement; restore on failure.
        self.ledger.debit(asset, Pool::Liquid, amount).await?;
        if let Err(e) = self.staking.deposit(node, asset, amount).await {
            self.ledger.credit(asset, Pool::Liquid, amount).await.ok();
            return Err(e.into());
        }
        self.nodes.add_strategy(node, asset.to_string()).await?;

        let custodied = self.custodian.balance_of(asset).await?;
        self.ledger.assert_in_sync(asset, custodied).await?;
        Ok(())
    }

    // ---- deposits and withdrawals ----

    /// Accept a deposit of custodied funds into the liquid pool
    ///
    /// Share minting happens outside this service; the ledger only needs
    /// the funds to have arrived in custody.
    pub async fn deposit(&self, caller: &str, asset: &str, amount: u64) -> Result<(), ServiceError> {
        if amount == 0 {
            return Err(ServiceError::ZeroAmount);
        }
        self.require_registered(asset).await?;

        self.custodian.transfer_in(asset, caller, amount).await?;
        self.ledger.credit(asset, Pool::Liquid, amount).await?;

        let custodied = self.custodian.balance_of(asset).await?;
        self.ledger.assert_in_sync(asset, custodied).await?;
        Ok(())
    }

    /// Record a withdrawal request against escrowed shares
    pub async fn request_withdrawal(
        &self,
        caller: &str,
        assets: Vec<AssetId>,
        amounts: Vec<u64>,
        escrowed_shares: u64,
    ) -> Result<String, ServiceError> {
        for asset in &assets {
            self.require_registered(asset).await?;
        }

        let id = self
            .queue
            .create(caller.to_string(), assets, amounts, escrowed_shares)
            .await?;
        log_withdrawal_event("withdrawal_requested", &id, caller, true);
        Ok(id)
    }

    /// Settle pending withdrawal requests against proposed draws
    ///
    /// The verifier proves exact settlement before any funds move. A fully
    /// liquid settlement completes synchronously and returns `None`;
    /// otherwise the redemption id is returned and completion waits on the
    /// external receipts.
    pub async fn settle_withdrawals(
        &self,
        caller: &str,
        request_ids: &[String],
        liquid_draws: HashMap<AssetId, u64>,
        node_draws: Vec<NodeDraw>,
    ) -> Result<Option<String>, ServiceError> {
        self.access.check(caller, Capability::Settle)?;

        let mut requests = Vec::with_capacity(request_ids.len());
        for id in request_ids {
            if self.engine.is_settling(id).await {
                return Err(EngineError::RequestAlreadySettling(id.clone()).into());
            }
            let request = self
                .queue
                .get(id)
                .await
                .ok_or_else(|| ServiceError::RequestNotFound(id.clone()))?;
            requests.push(request);
        }

        let plan = self.verifier.verify(&requests, &liquid_draws, &node_draws).await?;
        let node_count = plan.node_draws.len();
        let redemption = self.engine.create_settlement(plan).await?;

        log_settlement_event(
            if redemption.is_some() { "redemption_created" } else { "settled_from_liquid" },
            redemption.as_ref().map(|r| r.id.as_str()),
            request_ids.len(),
            node_count,
        );
        Ok(redemption.map(|r| r.id))
    }

    /// Complete a redemption with its full receipt set
    pub async fn complete_redemption(
        &self,
        caller: &str,
        redemption_id: &str,
        receipt_ids: &[String],
    ) -> Result<(), ServiceError> {
        self.access.check(caller, Capability::Settle)?;

        let result = self.engine.complete_redemption(redemption_id, receipt_ids).await?;

        self.store
            .record_redemption(&RedemptionRecord {
                redemption_id: result.redemption_id.clone(),
                request_ids: result.request_ids.clone(),
                receipt_count: receipt_ids.len() as u32,
                receiver: result.receiver,
                slashed: !result.slashed_assets.is_empty(),
                created_at: result.created_at,
                completed_at: unix_now(),
            })
            .await?;

        log_settlement_event(
            "redemption_completed",
            Some(&result.redemption_id),
            result.request_ids.len(),
            receipt_ids.len(),
        );
        Ok(())
    }

    /// Pay out a fulfillable withdrawal request to its owner
    pub async fn fulfill_withdrawal(&self, caller: &str, request_id: &str) -> Result<(), ServiceError> {
        let request = self
            .queue
            .get(request_id)
            .await
            .ok_or_else(|| ServiceError::RequestNotFound(request_id.to_string()))?;

        if request.owner != caller {
            return Err(ServiceError::NotRequestOwner {
                request: request_id.to_string(),
                caller: caller.to_string(),
            });
        }

        let now = unix_now();
        let ready_at = request.created_at + self.config.withdrawal_delay_secs;
        if now < ready_at {
            return Err(ServiceError::WithdrawalDelayNotMet {
                request: request_id.to_string(),
                remaining_secs: ready_at - now,
            });
        }
        if !request.can_fulfill {
            return Err(ServiceError::WithdrawalNotReadyToFulfill(request_id.to_string()));
        }

        // Ledger and queue state first, funds last: a custodian callback
        // re-entering settlement observes the request already gone.
        for (asset, amount) in request.assets.iter().zip(&request.withdrawable) {
            self.ledger.debit(asset, Pool::Queued, *amount).await?;
        }
        self.queue.remove(request_id).await;

        self.store
            .record_fulfillment(&FulfillmentRecord {
                request_id: request_id.to_string(),
                owner: request.owner.clone(),
                assets: request.assets.clone(),
                amounts: request.withdrawable.clone(),
                escrowed_shares: request.escrowed_shares,
                requested_at: request.created_at,
                fulfilled_at: now,
            })
            .await?;

        for (asset, amount) in request.assets.iter().zip(&request.withdrawable) {
            if *amount == 0 {
                continue;
            }
            self.custodian.transfer_out(asset, &request.owner, *amount).await?;
        }

        log_withdrawal_event("withdrawal_fulfilled", request_id, &request.owner, true);
        Ok(())
    }

    // ---- queries ----

    /// Pending withdrawal requests for one owner
    pub async fn pending_requests(&self, owner: &str) -> Vec<WithdrawalRequest> {
        self.queue.pending_for_owner(owner).await
    }

    /// Get a request by id
    pub async fn request(&self, id: &str) -> Option<WithdrawalRequest> {
        self.queue.get(id).await
    }

    /// Stored pool balances for an asset
    pub async fn pool_balances(&self, asset: &str) -> Result<PoolBalances, ServiceError> {
        Ok(self.ledger.balances(asset).await?)
    }

    /// Staked balance of an asset, derived from the external protocol
    pub async fn staked_balance(&self, asset: &str) -> Result<u64, ServiceError> {
        let mut total = 0u64;
        for node in self.nodes.all().await {
            if !node.strategies.contains(asset) {
                continue;
            }
            total += self.staking.staked_balance(node.id, asset).await?;
        }
        Ok(total)
    }

    /// Get a registered asset by id
    pub async fn asset(&self, id: &str) -> Option<Asset> {
        self.assets.get(id).await
    }

    /// All registered assets
    pub async fn assets(&self) -> Vec<Asset> {
        self.assets.all().await
    }

    /// Get a node by id
    pub async fn node(&self, id: NodeId) -> Result<Node, ServiceError> {
        Ok(self.nodes.get(id).await?)
    }

    /// All nodes
    pub async fn nodes(&self) -> Vec<Node> {
        self.nodes.all().await
    }

    /// All open redemptions, including any permanently stuck ones
    pub async fn redemptions(&self) -> Vec<Redemption> {
        self.engine.all().await
    }

    /// Get an open redemption by id
    pub async fn redemption(&self, id: &str) -> Option<Redemption> {
        self.engine.get(id).await
    }

    /// Current statistics
    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            requests: self.queue.stats().await,
            open_redemptions: self.engine.open_count().await,
            assets: self.assets.all().await.len(),
            nodes: self.nodes.len().await,
        }
    }

    // ---- service loop ----

    /// Run one tick of the service
    pub async fn tick(&self) -> TickResult {
        let stats = self.queue.stats().await;
        let result = TickResult {
            pending_requests: stats.awaiting_settlement,
            fulfillable_requests: stats.fulfillable,
            open_redemptions: self.engine.open_count().await,
        };

        if result.has_activity() {
            tracing::info!(target: "lrvault::settlement", "[tick] {}", result);
        }
        result
    }

    /// Run the service loop until stopped
    pub async fn run(&self) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            target: "lrvault::settlement",
            interval_secs = self.config.check_interval_secs,
            "settlement service started"
        );

        loop {
            {
                let running = self.running.read().await;
                if !*running {
                    break;
                }
            }

            self.tick().await;

            tokio::time::sleep(tokio::time::Duration::from_secs(
                self.config.check_interval_secs,
            ))
            .await;
        }

        tracing::info!(target: "lrvault::settlement", "settlement service stopped");
    }

    /// Stop the service loop
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    async fn require_registered(&self, asset: &str) -> Result<(), ServiceError> {
        if !self.assets.contains(asset).await {
            return Err(LedgerError::UnsupportedAsset(asset.to_string()).into());
        }
        Ok(())
    }
}

/// Service statistics
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub requests: QueueStats,
    pub open_redemptions: usize,
    pub assets: usize,
    pub nodes: usize,
}

impl std::fmt::Display for ServiceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | redemptions open: {} | assets: {} | nodes: {}",
            self.requests, self.open_redemptions, self.assets, self.nodes
        )
    }
}

/// Result of a service tick
#[derive(Debug, Default)]
pub struct TickResult {
    pub pending_requests: usize,
    pub fulfillable_requests: usize,
    pub open_redemptions: usize,
}

impl TickResult {
    pub fn has_activity(&self) -> bool {
        self.pending_requests > 0 || self.fulfillable_requests > 0 || self.open_redemptions > 0
    }
}

impl std::fmt::Display for TickResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pending: {}, fulfillable: {}, redemptions open: {}",
            self.pending_requests, self.fulfillable_requests, self.open_redemptions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{SimulatedCustodian, SimulatedRestaking, SimulatedValuation};
    use crate::storage::MemorySettlementStore;
    use crate::types::PRICE_SCALE;

    const OP: &str = "operator";

    struct Harness {
        service: SettlementService,
        custodian: SimulatedCustodian,
        staking: SimulatedRestaking,
    }

    async fn harness(withdrawal_delay_secs: u64) -> Harness {
        let config = VaultConfig {
            withdrawal_delay_secs,
            ..VaultConfig::default()
        };
        let custodian = SimulatedCustodian::new();
        let staking = SimulatedRestaking::new(custodian.clone());

        let service = SettlementService::new(
            config,
            AccessTable::single_operator(OP),
            Arc::new(SimulatedValuation::new()),
            Arc::new(staking.clone()),
            Arc::new(custodian.clone()),
            Arc::new(MemorySettlementStore::new()),
        );
        service
            .register_asset(OP, Asset::new("tokA", 6, PRICE_SCALE, 500))
            .await
            .unwrap();

        Harness { service, custodian, staking }
    }

    async fn fund_and_deposit(h: &Harness, user: &str, asset: &str, amount: u64) {
        h.custodian.fund_account(user, asset, amount).await;
        h.service.deposit(user, asset, amount).await.unwrap();
    }

    fn liquid(draws: &[(&str, u64)]) -> HashMap<AssetId, u64> {
        draws.iter().map(|(a, v)| (a.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_liquid_only_lifecycle_pays_exactly() {
        let h = harness(0).await;
        fund_and_deposit(&h, "alice", "tokA", 100).await;

        let id = h
            .service
            .request_withdrawal("alice", vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();

        // Not ready before settlement.
        let early = h.service.fulfill_withdrawal("alice", &id).await;
        assert!(matches!(early, Err(ServiceError::WithdrawalNotReadyToFulfill(_))));

        let redemption = h
            .service
            .settle_withdrawals(OP, &[id.clone()], liquid(&[("tokA", 100)]), vec![])
            .await
            .unwrap();
        assert!(redemption.is_none());
        assert!(h.service.request(&id).await.unwrap().can_fulfill);

        h.service.fulfill_withdrawal("alice", &id).await.unwrap();
        assert_eq!(h.custodian.account_balance("alice", "tokA").await, 100);
        assert!(h.service.request(&id).await.is_none());

        let balances = h.service.pool_balances("tokA").await.unwrap();
        assert_eq!(balances.liquid, 0);
        assert_eq!(balances.queued, 0);
    }

    #[tokio::test]
    async fn test_settlement_must_be_exact() {
        let h = harness(0).await;
        fund_and_deposit(&h, "alice", "tokA", 200).await;

        let id = h
            .service
            .request_withdrawal("alice", vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();

        for off_by_one in [99u64, 101] {
            let result = h
                .service
                .settle_withdrawals(OP, &[id.clone()], liquid(&[("tokA", off_by_one)]), vec![])
                .await;
            assert!(matches!(
                result,
                Err(ServiceError::Verifier(VerifierError::RequestsDoNotSettle { .. }))
            ));
        }

        // Nothing moved on the failed attempts.
        let balances = h.service.pool_balances("tokA").await.unwrap();
        assert_eq!(balances.liquid, 200);
        assert_eq!(balances.queued, 0);
    }

    #[tokio::test]
    async fn test_slashed_redemption_scales_payouts() {
        let h = harness(0).await;
        fund_and_deposit(&h, "alice", "tokA", 60).await;
        fund_and_deposit(&h, "bob", "tokA", 40).await;

        let node = h.service.create_node(OP).await.unwrap();
        h.service.delegate_node(OP, node, "external-op").await.unwrap();
        h.service.stake(OP, node, "tokA", 100).await.unwrap();
        h.staking.set_slash_factor(node, 1_000).await; // 10%

        let alice = h
            .service
            .request_withdrawal("alice", vec!["tokA".to_string()], vec![60], 60)
            .await
            .unwrap();
        let bob = h
            .service
            .request_withdrawal("bob", vec!["tokA".to_string()], vec![40], 40)
            .await
            .unwrap();

        let draws = vec![NodeDraw { node, asset: "tokA".to_string(), shares: 100 }];
        let redemption_id = h
            .service
            .settle_withdrawals(OP, &[alice.clone(), bob.clone()], HashMap::new(), draws)
            .await
            .unwrap()
            .unwrap();

        let receipt_ids: Vec<String> = h
            .service
            .redemption(&redemption_id)
            .await
            .unwrap()
            .receipt_ids
            .into_iter()
            .collect();
        h.service
            .complete_redemption(OP, &redemption_id, &receipt_ids)
            .await
            .unwrap();

        h.service.fulfill_withdrawal("alice", &alice).await.unwrap();
        h.service.fulfill_withdrawal("bob", &bob).await.unwrap();
        assert_eq!(h.custodian.account_balance("alice", "tokA").await, 54);
        assert_eq!(h.custodian.account_balance("bob", "tokA").await, 36);

        // Completing the same redemption again is impossible.
        let again = h.service.complete_redemption(OP, &redemption_id, &receipt_ids).await;
        assert!(matches!(
            again,
            Err(ServiceError::Engine(EngineError::RedemptionNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_conservation_across_operations() {
        let h = harness(0).await;
        fund_and_deposit(&h, "alice", "tokA", 500).await;

        let node = h.service.create_node(OP).await.unwrap();
        h.service.delegate_node(OP, node, "external-op").await.unwrap();
        h.service.stake(OP, node, "tokA", 300).await.unwrap();

        let balances = h.service.pool_balances("tokA").await.unwrap();
        let staked = h.service.staked_balance("tokA").await.unwrap();
        assert_eq!(balances.liquid + balances.queued + staked, 500);

        let id = h
            .service
            .request_withdrawal("alice", vec!["tokA".to_string()], vec![150], 150)
            .await
            .unwrap();
        h.service
            .settle_withdrawals(OP, &[id], liquid(&[("tokA", 150)]), vec![])
            .await
            .unwrap();

        let balances = h.service.pool_balances("tokA").await.unwrap();
        let staked = h.service.staked_balance("tokA").await.unwrap();
        assert_eq!(balances.liquid + balances.queued + staked, 500);
        assert_eq!(balances.queued, 150);
    }

    #[tokio::test]
    async fn test_delay_enforcement() {
        let h = harness(60 * 60).await;
        fund_and_deposit(&h, "alice", "tokA", 100).await;

        let id = h
            .service
            .request_withdrawal("alice", vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();
        h.service
            .settle_withdrawals(OP, &[id.clone()], liquid(&[("tokA", 100)]), vec![])
            .await
            .unwrap();

        // Fulfillable, but the delay has not elapsed.
        assert!(h.service.request(&id).await.unwrap().can_fulfill);
        let result = h.service.fulfill_withdrawal("alice", &id).await;
        assert!(matches!(result, Err(ServiceError::WithdrawalDelayNotMet { .. })));

        // The owner check fires even for a stranger who waited.
        let result = h.service.fulfill_withdrawal("mallory", &id).await;
        assert!(matches!(result, Err(ServiceError::NotRequestOwner { .. })));
    }

    #[tokio::test]
    async fn test_capability_checks() {
        let h = harness(0).await;

        let result = h
            .service
            .register_asset("mallory", Asset::new("tokB", 6, PRICE_SCALE, 500))
            .await;
        assert!(matches!(result, Err(ServiceError::Access(_))));

        let result = h.service.create_node("mallory").await;
        assert!(matches!(result, Err(ServiceError::Access(_))));

        let result = h
            .service
            .settle_withdrawals("mallory", &["wr_x".to_string()], HashMap::new(), vec![])
            .await;
        assert!(matches!(result, Err(ServiceError::Access(_))));
    }

    #[tokio::test]
    async fn test_unsupported_asset_rejected_on_entry() {
        let h = harness(0).await;

        let result = h.service.deposit("alice", "tokX", 10).await;
        assert!(matches!(
            result,
            Err(ServiceError::Ledger(LedgerError::UnsupportedAsset(_)))
        ));

        let result = h
            .service
            .request_withdrawal("alice", vec!["tokX".to_string()], vec![10], 10)
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::Ledger(LedgerError::UnsupportedAsset(_)))
        ));
    }

    #[tokio::test]
    async fn test_undelegate_rebalances_to_liquid() {
        let h = harness(0).await;
        fund_and_deposit(&h, "alice", "tokA", 200).await;

        let node = h.service.create_node(OP).await.unwrap();
        h.service.delegate_node(OP, node, "external-op").await.unwrap();
        h.service.stake(OP, node, "tokA", 200).await.unwrap();
        assert_eq!(h.service.pool_balances("tokA").await.unwrap().liquid, 0);

        let redemption_id = h.service.undelegate_node(OP, node).await.unwrap().unwrap();
        let receipt_ids: Vec<String> = h
            .service
            .redemption(&redemption_id)
            .await
            .unwrap()
            .receipt_ids
            .into_iter()
            .collect();
        h.service
            .complete_redemption(OP, &redemption_id, &receipt_ids)
            .await
            .unwrap();

        assert_eq!(h.service.pool_balances("tokA").await.unwrap().liquid, 200);

        // The node can be re-delegated afterwards.
        h.service.delegate_node(OP, node, "other-op").await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_and_tick() {
        let h = harness(0).await;
        fund_and_deposit(&h, "alice", "tokA", 100).await;
        h.service
            .request_withdrawal("alice", vec!["tokA".to_string()], vec![100], 100)
            .await
            .unwrap();

        let stats = h.service.stats().await;
        assert_eq!(stats.requests.total, 1);
        assert_eq!(stats.assets, 1);

        let tick = h.service.tick().await;
        assert!(tick.has_activity());
        assert_eq!(tick.pending_requests, 1);
    }
}
