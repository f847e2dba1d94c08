//! Settlement Core
//!
//! The withdrawal settlement engine: request queue, exact-settlement
//! verifier, redemption engine, and the service facade that wires them
//! behind the vault's exposed operations.
//!
//! Flow: a user records a withdrawal request; the operator proposes a
//! combination of liquid and per-node draws; the verifier proves the
//! combination exactly satisfies the targeted requests; the engine issues
//! the external withdrawals and, once every receipt has arrived,
//! reconciles actual against expected amounts, propagating any shortfall
//! into the requests as slashing.

pub mod engine;
pub mod queue;
pub mod service;
pub mod verifier;

pub use engine::{CompletionResult, EngineError, RedemptionEngine};
pub use queue::{QueueError, QueueStats, WithdrawalQueue};
pub use service::{ServiceError, ServiceStats, SettlementService, TickResult};
pub use verifier::{NodeDraw, ResolvedNodeDraw, SettlementPlan, SettlementVerifier, VerifierError};
