//! Structured Logging for the lrvault Backend
//!
//! Provides structured logging with:
//! - JSON output for log aggregation services
//! - Request/redemption ids as correlation ids
//! - Slashing events as first-class structured records
//!
//! # Usage
//!
//! ```rust,ignore
//! use lrvault::logging::{init_logging, LogLevel};
//!
//! // Initialize at startup
//! init_logging(LogLevel::Info, true)?; // JSON mode for production
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Withdrawal request lifecycle events
    Withdrawal,
    /// Settlement and redemption events
    Settlement,
    /// Slashing outcomes propagated from the external protocol
    Slashing,
    /// System events (startup, shutdown, ticks)
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    /// Log level
    pub level: String,
    /// Event category
    pub category: EventCategory,
    /// Human-readable message
    pub message: String,
    /// Correlation ID (request or redemption id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
        }
    }

    /// Add correlation ID
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize this event to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

/// Log a withdrawal request lifecycle event
pub fn log_withdrawal_event(event_type: &str, request_id: &str, owner: &str, success: bool) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let event = LogEvent::new(level, EventCategory::Withdrawal, event_type)
        .with_correlation_id(request_id)
        .with_data(serde_json::json!({
            "request_id": request_id,
            "owner": owner,
            "success": success
        }));

    if success {
        tracing::info!(target: "lrvault::withdrawal", "{}", event.to_json());
    } else {
        tracing::warn!(target: "lrvault::withdrawal", "{}", event.to_json());
    }
}

/// Log a settlement or redemption event
pub fn log_settlement_event(
    event_type: &str,
    redemption_id: Option<&str>,
    request_count: usize,
    node_count: usize,
) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Settlement, event_type)
        .with_data(serde_json::json!({
            "redemption_id": redemption_id,
            "request_count": request_count,
            "node_count": node_count
        }));

    let event = if let Some(id) = redemption_id {
        event.with_correlation_id(id)
    } else {
        event
    };

    tracing::info!(target: "lrvault::settlement", "{}", event.to_json());
}

/// Log a slashing outcome for one redemption/asset pair
pub fn log_slashing_event(
    redemption_id: &str,
    asset: &str,
    expected: u64,
    actual: u64,
    affected_requests: usize,
) {
    let event = LogEvent::new(LogLevel::Warn, EventCategory::Slashing, "slashing applied")
        .with_correlation_id(redemption_id)
        .with_data(serde_json::json!({
            "redemption_id": redemption_id,
            "asset": asset,
            "expected": expected,
            "actual": actual,
            "affected_requests": affected_requests
        }));

    tracing::warn!(target: "lrvault::slashing", "{}", event.to_json());
}

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("lrvault={}", format!("{:?}", level).to_lowercase()))
    });

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from a loaded configuration
pub fn init_from_config(config: &crate::config::VaultConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.json_logs)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Settlement, "Test event")
            .with_correlation_id("rd_test123")
            .with_data(serde_json::json!({"key": "value"}));

        let json = event.to_json();
        assert!(json.contains("Test event"));
        assert!(json.contains("rd_test123"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }
}
