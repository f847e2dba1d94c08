//! Common Error Types for the lrvault Backend
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

/// Root error type for the lrvault backend
#[derive(Debug, Error)]
pub enum VaultError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Settlement service errors
    #[error("service error: {0}")]
    Service(#[from] crate::settlement::ServiceError),

    /// Balance ledger errors
    #[error("ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// External restaking protocol errors
    #[error("restaking error: {0}")]
    Restaking(#[from] crate::external::StakingError),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultError::Restaking(e) => e.is_retryable(),
            VaultError::Service(e) => e.is_retryable(),
            VaultError::Storage(_) | VaultError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error code for structured log output
    pub fn error_code(&self) -> &'static str {
        match self {
            VaultError::Config(_) => "CONFIG_ERROR",
            VaultError::Logging(_) => "LOGGING_ERROR",
            VaultError::Service(_) => "SERVICE_ERROR",
            VaultError::Ledger(_) => "LEDGER_ERROR",
            VaultError::Storage(_) => "STORAGE_ERROR",
            VaultError::Restaking(_) => "RESTAKING_ERROR",
            VaultError::Validation(_) => "VALIDATION_ERROR",
            VaultError::Internal(_) => "INTERNAL_ERROR",
            VaultError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;
