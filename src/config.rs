//! Environment-based Configuration for the lrvault Backend
//!
//! This module provides configuration loading from environment variables.
//! Every value has a safe default except the database path, which is
//! required when the SQLite history store is selected.
//!
//! # Environment Variables
//!
//! ## Settlement
//! - `LRVAULT_WITHDRAWAL_DELAY_SECS` - Minimum delay between a withdrawal
//!   request and its fulfillment (default: 1209600, i.e. 14 days)
//! - `LRVAULT_MAX_NODES` - Cap on restaking nodes (default: 16)
//! - `LRVAULT_MAX_QUEUE_SIZE` - Cap on pending withdrawal requests
//!   (default: 1024)
//! - `LRVAULT_CHECK_INTERVAL_SECS` - Service loop tick interval
//!   (default: 30)
//!
//! ## Storage
//! - `LRVAULT_STORE` - "memory" or "sqlite" (default: "memory")
//! - `LRVAULT_DB_PATH` - SQLite database path (required for "sqlite")
//!
//! ## Logging
//! - `LRVAULT_LOG_LEVEL` - Logging level (debug, info, warn, error)
//! - `LRVAULT_JSON_LOGS` - Set to "1" for JSON log output

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// History store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "sqlite" | "sql" => Ok(StoreBackend::Sqlite),
            _ => Err(ConfigError::InvalidValue(
                "LRVAULT_STORE".to_string(),
                format!("unknown store backend: {}", s),
            )),
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Minimum delay before a withdrawal request can be fulfilled (seconds)
    pub withdrawal_delay_secs: u64,
    /// Cap on restaking nodes
    pub max_nodes: usize,
    /// Cap on pending withdrawal requests
    pub max_queue_size: usize,
    /// Service loop tick interval (seconds)
    pub check_interval_secs: u64,
    /// History store backend
    pub store_backend: StoreBackend,
    /// SQLite database path (when store_backend is Sqlite)
    pub db_path: Option<String>,
    /// Logging level
    pub log_level: String,
    /// Emit JSON-formatted logs
    pub json_logs: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            withdrawal_delay_secs: 14 * 24 * 60 * 60,
            max_nodes: 16,
            max_queue_size: 1024,
            check_interval_secs: 30,
            store_backend: StoreBackend::Memory,
            db_path: None,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl VaultConfig {
    /// Load configuration from environment variables
    ///
    /// Reads a `.env` file if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let store_backend = match env::var("LRVAULT_STORE") {
            Ok(s) => s.parse()?,
            Err(_) => defaults.store_backend,
        };

        let db_path = env::var("LRVAULT_DB_PATH").ok();
        if store_backend == StoreBackend::Sqlite && db_path.is_none() {
            return Err(ConfigError::MissingEnvVar("LRVAULT_DB_PATH".to_string()));
        }

        Ok(Self {
            withdrawal_delay_secs: parse_env(
                "LRVAULT_WITHDRAWAL_DELAY_SECS",
                defaults.withdrawal_delay_secs,
            )?,
            max_nodes: parse_env("LRVAULT_MAX_NODES", defaults.max_nodes)?,
            max_queue_size: parse_env("LRVAULT_MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            check_interval_secs: parse_env(
                "LRVAULT_CHECK_INTERVAL_SECS",
                defaults.check_interval_secs,
            )?,
            store_backend,
            db_path,
            log_level: env::var("LRVAULT_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: env::var("LRVAULT_JSON_LOGS").map(|v| v == "1").unwrap_or(false),
        })
    }
}

/// Parse an environment variable, falling back to a default when unset
fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}
