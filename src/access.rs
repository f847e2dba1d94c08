//! Capability-based Access Control
//!
//! Operations that mutate shared state take the caller's account id and
//! check it against an explicit grant table. There is no ambient role
//! state: every privileged entry point names the capability it needs.
//! Withdrawal request creation and fulfillment are owner-scoped and do
//! not appear here.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::types::AccountId;

/// Privileged capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Register assets and update prices
    ManageAssets,
    /// Create, delegate, and stake into nodes
    ManageNodes,
    /// Settle withdrawals and complete redemptions
    Settle,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ManageAssets => write!(f, "manage-assets"),
            Self::ManageNodes => write!(f, "manage-nodes"),
            Self::Settle => write!(f, "settle"),
        }
    }
}

/// Access errors
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("caller {caller} lacks capability {capability}")]
    MissingCapability {
        caller: AccountId,
        capability: Capability,
    },
}

/// Explicit grant table mapping callers to capabilities
#[derive(Debug, Clone, Default)]
pub struct AccessTable {
    grants: HashMap<AccountId, HashSet<Capability>>,
}

impl AccessTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table granting every capability to one operator account
    pub fn single_operator(operator: impl Into<AccountId>) -> Self {
        let mut table = Self::new();
        let operator = operator.into();
        table.grant(operator.clone(), Capability::ManageAssets);
        table.grant(operator.clone(), Capability::ManageNodes);
        table.grant(operator, Capability::Settle);
        table
    }

    /// Grant a capability to a caller
    pub fn grant(&mut self, caller: AccountId, capability: Capability) {
        self.grants.entry(caller).or_default().insert(capability);
    }

    /// Revoke a capability from a caller
    pub fn revoke(&mut self, caller: &str, capability: Capability) {
        if let Some(caps) = self.grants.get_mut(caller) {
            caps.remove(&capability);
        }
    }

    /// Check that a caller holds a capability
    pub fn check(&self, caller: &str, capability: Capability) -> Result<(), AccessError> {
        let held = self
            .grants
            .get(caller)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false);

        if held {
            Ok(())
        } else {
            Err(AccessError::MissingCapability {
                caller: caller.to_string(),
                capability,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_check() {
        let mut table = AccessTable::new();
        table.grant("op".to_string(), Capability::Settle);

        assert!(table.check("op", Capability::Settle).is_ok());
        assert!(table.check("op", Capability::ManageNodes).is_err());
        assert!(table.check("someone-else", Capability::Settle).is_err());
    }

    #[test]
    fn test_revoke() {
        let mut table = AccessTable::single_operator("op");
        assert!(table.check("op", Capability::ManageAssets).is_ok());

        table.revoke("op", Capability::ManageAssets);
        assert!(table.check("op", Capability::ManageAssets).is_err());
        assert!(table.check("op", Capability::Settle).is_ok());
    }
}
