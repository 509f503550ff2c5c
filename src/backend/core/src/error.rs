//! Error handling for the registry event processor.
//!
//! This module provides:
//! - A single error type with machine-readable codes and error chaining
//! - The data-error vs infrastructure-error split the dispatcher relies on
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use registry_core::error::{ProcessorError, Result, ErrorContext};
//!
//! fn load() -> Result<Listing> {
//!     store_call()
//!         .await
//!         .context("Failed to load listing")?
//!         .with_error_code(ErrorCode::RecordNotFound)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for processor operations.
pub type Result<T> = std::result::Result<T, ProcessorError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Processing / data errors (1000-1099)
    MalformedPayload,
    MissingField,
    InvalidAddress,
    RecordNotFound,
    DuplicateRecord,
    InvalidStateTransition,
    ReconciliationFailed,

    // Storage errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,

    // Transport errors (2100-2199)
    SubscriptionError,
    TransportConnectionFailed,
    AcknowledgeFailed,

    // Serialization errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Chain errors (3000-3099)
    ChainRpcError,
    ChainTimeout,
    NetworkError,

    // Configuration errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::MalformedPayload => 1000,
            Self::MissingField => 1001,
            Self::InvalidAddress => 1002,
            Self::RecordNotFound => 1003,
            Self::DuplicateRecord => 1004,
            Self::InvalidStateTransition => 1005,
            Self::ReconciliationFailed => 1006,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,

            Self::SubscriptionError => 2100,
            Self::TransportConnectionFailed => 2101,
            Self::AcknowledgeFailed => 2102,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ChainRpcError => 3000,
            Self::ChainTimeout => 3001,
            Self::NetworkError => 3002,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Check if this error is retryable (transport or infrastructure failure).
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError
                | Self::DatabaseConnectionFailed
                | Self::DatabaseQueryFailed
                | Self::SubscriptionError
                | Self::TransportConnectionFailed
                | Self::AcknowledgeFailed
                | Self::ChainRpcError
                | Self::ChainTimeout
                | Self::NetworkError
        )
    }

    /// Check if this error is caused by the event data itself rather than
    /// by the infrastructure around it.
    pub const fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload
                | Self::MissingField
                | Self::InvalidAddress
                | Self::RecordNotFound
                | Self::DuplicateRecord
                | Self::InvalidStateTransition
                | Self::ReconciliationFailed
                | Self::DeserializationError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "processing",
            2000..=2099 => "database",
            2100..=2199 => "transport",
            2200..=2299 => "serialization",
            3000..=3099 => "chain",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected data problems (absent aggregate, stale payload)
    Low,
    /// Events that block progress until fixed upstream
    Medium,
    /// Infrastructure failures that retrying usually clears
    High,
    /// Failures requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::RecordNotFound | ErrorCode::DuplicateRecord => Self::Low,

            ErrorCode::MalformedPayload
            | ErrorCode::MissingField
            | ErrorCode::InvalidAddress
            | ErrorCode::InvalidStateTransition
            | ErrorCode::ReconciliationFailed
            | ErrorCode::DeserializationError
            | ErrorCode::SerializationError => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::SubscriptionError
            | ErrorCode::AcknowledgeFailed
            | ErrorCode::ChainRpcError
            | ErrorCode::ChainTimeout
            | ErrorCode::NetworkError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::TransportConnectionFailed
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related aggregate identity (listing address, challenge id, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related aggregate type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the processor.
#[derive(Error, Debug)]
pub struct ProcessorError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable message
    message: Cow<'static, str>,

    /// Detailed internal message (driver errors, SQL text, ...)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl ProcessorError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both a message and an internal message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a not found error for an aggregate.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a malformed payload error for a known event type.
    pub fn malformed_payload(
        contract: impl Into<String>,
        event_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let contract = contract.into();
        let event_type = event_type.into();
        Self::with_internal(
            ErrorCode::MalformedPayload,
            format!("Malformed payload for {}.{}", contract, event_type),
            reason,
        )
        .with_context("contract", &contract)
        .with_context("event_type", &event_type)
    }

    /// Create an invalid address error.
    pub fn invalid_address(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(ErrorCode::InvalidAddress, format!("Invalid address: {}", value))
            .with_context("value", &value)
    }

    /// Create a reconciliation failure (absent locally and on chain).
    pub fn reconciliation_failed(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::ReconciliationFailed,
            format!("{} {} not found locally or on chain", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a chain RPC error.
    pub fn chain_rpc(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::ChainRpcError, "Chain RPC call failed", message)
    }

    /// Create a subscription transport error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::SubscriptionError, "Subscription transport error", message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        let context = std::mem::take(&mut self.details.context);
        self.details = details;
        self.details.context.extend(context);
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_data_error(&self) -> bool {
        self.code.is_data_error()
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::RecordNotFound
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    details = ?self.details,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "registry_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ProcessorError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| ProcessorError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ProcessorError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| ProcessorError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for ProcessorError {
    fn from(error: sqlx::Error) -> Self {
        let (code, msg) = match &error {
            sqlx::Error::RowNotFound => (ErrorCode::RecordNotFound, "The requested record was not found"),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("unique") || constraint.contains("pkey") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::DatabaseQueryFailed, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for ProcessorError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(ErrorCode::DatabaseError, "Database migration failed", error.to_string())
            .with_source(error)
    }
}

impl From<redis::RedisError> for ProcessorError {
    fn from(error: redis::RedisError) -> Self {
        let (code, msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::TransportConnectionFailed, "Unable to connect to notification transport")
        } else if error.is_timeout() {
            (ErrorCode::SubscriptionError, "Notification transport timed out")
        } else {
            (ErrorCode::SubscriptionError, "A notification transport error occurred")
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<reqwest::Error> for ProcessorError {
    fn from(error: reqwest::Error) -> Self {
        let (code, msg) = if error.is_timeout() {
            (ErrorCode::ChainTimeout, "Chain RPC request timed out")
        } else if error.is_connect() {
            (ErrorCode::NetworkError, "Failed to connect to chain RPC endpoint")
        } else if error.is_status() {
            (ErrorCode::ChainRpcError, "Chain RPC endpoint returned an error status")
        } else if error.is_decode() {
            (ErrorCode::ChainRpcError, "Chain RPC response could not be decoded")
        } else {
            (ErrorCode::NetworkError, "Network error occurred")
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for ProcessorError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::MissingConfiguration, "File or resource not found"),
            ErrorKind::TimedOut => (ErrorCode::NetworkError, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::NetworkError, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<ProcessorError>() {
            Ok(processor_error) => processor_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for ProcessorError {
    fn from(error: config::ConfigError) -> Self {
        let (code, msg) = match &error {
            config::ConfigError::NotFound(_) => {
                (ErrorCode::MissingConfiguration, "Required configuration not found")
            }
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => {
                (ErrorCode::InvalidConfiguration, "Configuration file is invalid")
            }
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_classification() {
        assert!(ErrorCode::DatabaseConnectionFailed.is_retryable());
        assert!(ErrorCode::ChainRpcError.is_retryable());
        assert!(!ErrorCode::RecordNotFound.is_retryable());

        assert!(ErrorCode::RecordNotFound.is_data_error());
        assert!(ErrorCode::MalformedPayload.is_data_error());
        assert!(!ErrorCode::DatabaseQueryFailed.is_data_error());
    }

    #[test]
    fn test_retryable_and_data_errors_are_disjoint() {
        let codes = [
            ErrorCode::MalformedPayload,
            ErrorCode::MissingField,
            ErrorCode::InvalidAddress,
            ErrorCode::RecordNotFound,
            ErrorCode::DuplicateRecord,
            ErrorCode::InvalidStateTransition,
            ErrorCode::ReconciliationFailed,
            ErrorCode::DatabaseError,
            ErrorCode::DatabaseConnectionFailed,
            ErrorCode::DatabaseQueryFailed,
            ErrorCode::SubscriptionError,
            ErrorCode::TransportConnectionFailed,
            ErrorCode::AcknowledgeFailed,
            ErrorCode::SerializationError,
            ErrorCode::DeserializationError,
            ErrorCode::ChainRpcError,
            ErrorCode::ChainTimeout,
            ErrorCode::NetworkError,
        ];
        for code in codes {
            assert!(!(code.is_retryable() && code.is_data_error()), "{code}");
        }
    }

    #[test]
    fn test_not_found_carries_entity() {
        let error = ProcessorError::not_found("listing", "0xabc");
        assert!(error.is_not_found());
        assert_eq!(error.details().entity_type.as_deref(), Some("listing"));
        assert_eq!(error.details().entity_id.as_deref(), Some("0xabc"));
        assert_eq!(error.severity(), ErrorSeverity::Low);
    }

    #[test]
    fn test_malformed_payload_context_survives_details() {
        let error = ProcessorError::malformed_payload("CivilTCRContract", "Application", "missing Deposit");
        assert_eq!(error.code(), ErrorCode::MalformedPayload);
        assert!(error.details().context.contains_key("contract"));
        assert_eq!(error.internal_message(), Some("missing Deposit"));
    }

    #[test]
    fn test_category() {
        assert_eq!(ErrorCode::ReconciliationFailed.category(), "processing");
        assert_eq!(ErrorCode::AcknowledgeFailed.category(), "transport");
        assert_eq!(ErrorCode::ChainTimeout.category(), "chain");
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u32> = None;
        let error = missing.context("poll 7").unwrap_err();
        assert_eq!(error.code(), ErrorCode::RecordNotFound);
    }

    #[test]
    fn test_error_display() {
        let error = ProcessorError::with_internal(
            ErrorCode::DatabaseError,
            "Database connection failed",
            "Connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Database connection failed"));
        assert!(display.contains("Connection refused"));
    }
}
