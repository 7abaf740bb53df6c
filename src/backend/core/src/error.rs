//! Error handling for the license service.
//!
//! Two layers live here:
//! - The domain taxonomy raised by the components themselves:
//!   [`StorageError`], [`PublishError`], [`ValidationError`] and [`TransportError`].
//! - [`LicenseError`], the service-level error carrying a stable [`ErrorCode`],
//!   HTTP status mapping, severity-aware logging and metrics, and an axum
//!   `IntoResponse` implementation for the REST adapter.
//!
//! # Usage
//!
//! ```rust,ignore
//! use license_core::error::{LicenseError, Result};
//!
//! fn update() -> Result<()> {
//!     store_operation()?; // StorageError -> LicenseError
//!     Ok(())
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for service operations.
pub type Result<T> = std::result::Result<T, LicenseError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ═══════════════════════════════════════════════════════════════════════════════
// Storage Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// What went wrong with the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    /// No backing data exists yet. Recoverable: the store bootstraps empty state.
    NotFound,
    /// The backing data could not be read or written.
    IoFailure,
    /// The backing data exists but does not decode.
    CorruptData,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::IoFailure => "I/O failure",
            Self::CorruptData => "corrupt data",
        };
        f.write_str(name)
    }
}

/// Failure of a durable store operation.
#[derive(Debug, Error)]
#[error("storage {kind} at {location}: {message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    location: String,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl StorageError {
    /// Create a storage error without an underlying cause.
    pub fn new(
        kind: StorageErrorKind,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            location: location.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Backing data does not exist yet.
    pub fn not_found(location: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::NotFound, location, "no backing data")
    }

    /// Wrap an I/O error.
    pub fn io(location: impl Into<String>, error: std::io::Error) -> Self {
        let message = error.to_string();
        Self::new(StorageErrorKind::IoFailure, location, message).with_source(error)
    }

    /// Wrap a decoding failure.
    pub fn corrupt(location: impl Into<String>, error: serde_json::Error) -> Self {
        let message = error.to_string();
        Self::new(StorageErrorKind::CorruptData, location, message).with_source(error)
    }

    /// Attach the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure to hand an event to the shared channel.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The channel could not be reached or rejected the write.
    #[error("event channel connection failed: {0}")]
    ConnectionFailure(String),

    /// The broker did not acknowledge the event in time.
    #[error("event channel did not acknowledge within {0:?}")]
    Timeout(Duration),

    /// The event could not be encoded for the wire.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PublishError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailure(_) => "connection_failure",
            Self::Timeout(_) => "timeout",
            Self::Encode(_) => "encode",
        }
    }
}

/// Failure of the subscription side of the event channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Subscribing or reading from the channel failed past recovery.
    #[error("event channel subscription failed: {0}")]
    SubscribeFailure(String),

    /// The channel settings are unusable.
    #[error("invalid event channel configuration: {0}")]
    Configuration(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Rejected write request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The update carried no fields.
    #[error("No updates provided")]
    EmptyUpdate,

    /// The target user id is empty or whitespace.
    #[error("User id must not be blank")]
    BlankUserId,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Storage Errors (1000-1099)
    StorageNotFound,
    StorageIoFailure,
    StorageCorruptData,

    // Validation Errors (4100-4199)
    EmptyUpdate,
    InvalidInput,
    UnsupportedMediaType,

    // Configuration Errors (5000-5099)
    ConfigurationError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::StorageNotFound => 1000,
            Self::StorageIoFailure => 1001,
            Self::StorageCorruptData => 1002,

            Self::EmptyUpdate => 4101,
            Self::InvalidInput => 4102,
            Self::UnsupportedMediaType => 4103,

            Self::ConfigurationError => 5000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::EmptyUpdate | Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,

            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            Self::StorageNotFound
            | Self::StorageIoFailure
            | Self::StorageCorruptData
            | Self::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageIoFailure)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "storage",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
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

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors
    Low,
    /// Recoverable storage condition
    Medium,
    /// Local state could not be read or written
    High,
    /// Service cannot operate
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::EmptyUpdate | ErrorCode::InvalidInput | ErrorCode::UnsupportedMediaType => {
                Self::Low
            }

            ErrorCode::StorageNotFound => Self::Medium,

            ErrorCode::StorageIoFailure | ErrorCode::StorageCorruptData => Self::High,

            ErrorCode::ConfigurationError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The service-level error type.
#[derive(Error, Debug)]
pub struct LicenseError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional key-value context
    context: HashMap<String, serde_json::Value>,

    /// The source error that caused this error
    #[source]
    source: Option<BoxError>,
}

impl fmt::Display for LicenseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl LicenseError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            context: HashMap::new(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
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

    /// Add context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
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
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "request failed"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "request degraded"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "license_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,

    pub numeric_code: u32,

    pub message: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&LicenseError> for ErrorResponse {
    fn from(error: &LicenseError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                context: error.context.clone(),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for LicenseError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl From<StorageError> for LicenseError {
    fn from(error: StorageError) -> Self {
        let code = match error.kind() {
            StorageErrorKind::NotFound => ErrorCode::StorageNotFound,
            StorageErrorKind::IoFailure => ErrorCode::StorageIoFailure,
            StorageErrorKind::CorruptData => ErrorCode::StorageCorruptData,
        };
        let location = error.location().to_string();

        Self::with_internal(code, "License storage is unavailable", error.to_string())
            .with_context("location", location)
            .with_source(error)
    }
}

impl From<ValidationError> for LicenseError {
    fn from(error: ValidationError) -> Self {
        let code = match error {
            ValidationError::EmptyUpdate => ErrorCode::EmptyUpdate,
            ValidationError::BlankUserId => ErrorCode::InvalidInput,
        };
        Self::new(code, error.to_string())
    }
}

impl From<config::ConfigError> for LicenseError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
