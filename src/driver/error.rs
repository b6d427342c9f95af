//! Driver Error Types
//!
//! Every error carries enough structure (category, server code) for callers
//! to tell retryable conditions from fatal ones without parsing messages.

use std::io;
use thiserror::Error;

use crate::bolt::{BoltError, BoltErrorCode, PackStreamError};

// ============================================================================
// DriverError
// ============================================================================

/// Driver error
#[derive(Error, Debug)]
pub enum DriverError {
    /// Malformed or truncated bytes from the server
    #[error("Decode error: {0}")]
    Decode(#[from] PackStreamError),

    /// Responses no longer line up with requests
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Server failure that may succeed when retried
    #[error("Transient error: {code} - {message}")]
    Transient { code: String, message: String },

    /// Server failure that will not succeed when retried
    #[error("Server error: {code} - {message}")]
    Server { code: String, message: String },

    /// Server rejected the credentials or the operation
    #[error("Authentication error: {code} - {message}")]
    Authentication { code: String, message: String },

    /// No connection became available before the acquisition deadline
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    /// Handshake, initialization or liveness check failed
    #[error("Connection lifecycle error: {0}")]
    ConnectionLifecycle(String),

    /// Transport lost or server unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Session misuse or closed pool
    #[error("Session error: {0}")]
    Session(String),

    /// Transaction misuse
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Missing key or unexpected value type in a record
    #[error("Type conversion error: {0}")]
    TypeConversion(String),
}

/// Coarse classification of a [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Decode,
    ProtocolViolation,
    TransientServer,
    FatalServer,
    Authentication,
    PoolExhausted,
    ConnectionLifecycle,
    ServiceUnavailable,
    Client,
}

impl DriverError {
    /// Classify a FAILURE reported by the server.
    pub fn from_failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if code.starts_with(BoltErrorCode::SECURITY_PREFIX) {
            Self::Authentication { code, message }
        } else if is_transient_code(&code) {
            Self::Transient { code, message }
        } else {
            Self::Server { code, message }
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted(msg: impl Into<String>) -> Self {
        Self::PoolExhausted(msg.into())
    }

    /// Create a connection lifecycle error
    pub fn connection_lifecycle(msg: impl Into<String>) -> Self {
        Self::ConnectionLifecycle(msg.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a session error
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a type conversion error
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// Error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Decode,
            Self::ProtocolViolation(_) => ErrorCategory::ProtocolViolation,
            Self::Transient { .. } => ErrorCategory::TransientServer,
            Self::Server { .. } => ErrorCategory::FatalServer,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::PoolExhausted(_) => ErrorCategory::PoolExhausted,
            Self::ConnectionLifecycle(_) => ErrorCategory::ConnectionLifecycle,
            Self::ServiceUnavailable(_) | Self::Io(_) => ErrorCategory::ServiceUnavailable,
            Self::Configuration(_)
            | Self::Session(_)
            | Self::Transaction(_)
            | Self::TypeConversion(_) => ErrorCategory::Client,
        }
    }

    /// Server error code, for errors reported by the server
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Transient { code, .. }
            | Self::Server { code, .. }
            | Self::Authentication { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the retry executor may attempt the work again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientServer | ErrorCategory::ServiceUnavailable
        )
    }

    /// Whether the connection that produced this error must be discarded
    pub fn requires_disposal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Decode
                | ErrorCategory::ProtocolViolation
                | ErrorCategory::ConnectionLifecycle
                | ErrorCategory::ServiceUnavailable
        )
    }
}

/// Transient codes, minus the ones the client itself caused
fn is_transient_code(code: &str) -> bool {
    if code == BoltErrorCode::TRANSACTION_TERMINATED || code == BoltErrorCode::LOCK_CLIENT_STOPPED {
        return false;
    }
    code.starts_with(BoltErrorCode::TRANSIENT_PREFIX)
        || code == BoltErrorCode::NOT_A_LEADER
        || code == BoltErrorCode::FORBIDDEN_ON_READ_ONLY_DATABASE
}

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) => DriverError::ServiceUnavailable(e.to_string()),
            BoltError::PackStream(e) => DriverError::Decode(e),
            BoltError::Handshake(e) => DriverError::ConnectionLifecycle(e.to_string()),
            BoltError::Protocol(msg) => DriverError::ProtocolViolation(msg),
            e @ BoltError::MessageTooLarge { .. } => DriverError::ProtocolViolation(e.to_string()),
            BoltError::ConnectionClosed => {
                DriverError::ServiceUnavailable("Connection closed by server".into())
            }
        }
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// Driver result type
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================
