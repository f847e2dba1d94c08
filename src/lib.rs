//! lrvault - Liquid Restaking Vault Settlement Backend
//!
//! Reconciles three physically-separated pools of funds (liquid, queued,
//! externally staked) against a queue of pending user withdrawal
//! obligations, across asynchronous external withdraw operations that can
//! return less value than requested ("slashing").
//!
//! ## Components
//!
//! 1. **Balance Ledger** - per-asset liquid/queued pool accounting with a
//!    custody sync invariant
//! 2. **Withdrawal Queue** - pending user withdrawal requests
//! 3. **Settlement Verifier** - proves a proposed set of draws exactly
//!    satisfies the targeted requests before anything moves
//! 4. **Redemption Engine** - batches external node withdrawals, enforces
//!    all-or-nothing completion, propagates slashing
//! 5. **Node Registry** - append-only restaking sub-accounts
//!
//! Share-token mint/burn and the price oracle live outside this crate and
//! are consumed through the collaborator traits in [`external`].

pub mod access;
pub mod common;
pub mod config;
pub mod external;
pub mod ledger;
pub mod logging;
pub mod nodes;
pub mod settlement;
pub mod storage;
pub mod types;

// Re-exports: capability table
pub use access::{AccessError, AccessTable, Capability};

// Re-exports: root error type
pub use common::{Result, VaultError};

// Re-exports: configuration
pub use config::{ConfigError, StoreBackend, VaultConfig};

// Re-exports: external collaborators
pub use external::{
    Custodian, CustodyError, RestakingService, SimulatedCustodian, SimulatedRestaking,
    SimulatedValuation, StakingError, ValuationError, ValuationService,
};

// Re-exports: balance ledger
pub use ledger::{AssetRegistry, BalanceLedger, LedgerError, Pool, PoolBalances};

// Re-exports: node registry
pub use nodes::{Node, NodeError, NodeRegistry};

// Re-exports: settlement core
pub use settlement::{
    EngineError, NodeDraw, QueueError, RedemptionEngine, ServiceError, ServiceStats,
    SettlementService, SettlementVerifier, VerifierError, WithdrawalQueue,
};

// Re-exports: settlement history
pub use storage::{
    FulfillmentRecord, MemorySettlementStore, RedemptionRecord, SettlementStore,
    SqliteSettlementStore, StorageError,
};

// Re-exports: domain types
pub use types::{
    Asset, Redemption, RedemptionReceiver, WithdrawalReceipt, WithdrawalRequest, PRICE_SCALE,
};
