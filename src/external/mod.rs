//! External Collaborators
//!
//! Interfaces to the systems the vault consumes but does not implement:
//! the restaking protocol, the price/valuation service, and the token
//! custodian. All calls are `Result`-typed; the settlement engine decides
//! per call whether a failure is retryable, never swallowing it.

pub mod simulated;
pub mod traits;

pub use simulated::{SimulatedCustodian, SimulatedRestaking, SimulatedValuation};
pub use traits::{
    Custodian, CustodyError, RestakingService, StakingError, ValuationError, ValuationService,
};

#[cfg(test)]
pub use traits::{MockCustodian, MockRestakingService, MockValuationService};
