//! Bolt protocol error types.

use std::fmt;
use std::io;

use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Bolt protocol errors: framing, handshake and transport.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// PackStream serialization error
    PackStream(PackStreamError),

    /// Protocol error (invalid framing, unexpected message, etc.)
    Protocol(String),

    /// Message too large
    MessageTooLarge { size: usize, max: usize },

    /// Peer closed the stream
    ConnectionClosed,
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::Handshake(e) => write!(f, "Handshake error: {}", e),
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            BoltError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::Handshake(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<HandshakeError> for BoltError {
    fn from(err: HandshakeError) -> Self {
        BoltError::Handshake(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Invalid magic number received
    InvalidMagic { expected: [u8; 4], received: [u8; 4] },

    /// No compatible protocol version found
    NoCompatibleVersion,

    /// Server chose a version that was never proposed
    UnexpectedVersion(u32),

    /// Peer speaks HTTP, not Bolt
    HttpEndpoint,

    /// Invalid handshake data (wrong size, etc.)
    InvalidData(String),

    /// Connection closed during handshake
    ConnectionClosed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidMagic { expected, received } => {
                write!(
                    f,
                    "Invalid magic number: expected {:02X?}, received {:02X?}",
                    expected, received
                )
            }
            HandshakeError::NoCompatibleVersion => {
                write!(f, "No compatible protocol version found")
            }
            HandshakeError::UnexpectedVersion(v) => {
                write!(f, "Server chose unsupported version 0x{:08X}", v)
            }
            HandshakeError::HttpEndpoint => write!(
                f,
                "Server responded HTTP. Make sure you are not trying to connect to the http endpoint"
            ),
            HandshakeError::InvalidData(msg) => {
                write!(f, "Invalid handshake data: {}", msg)
            }
            HandshakeError::ConnectionClosed => {
                write!(f, "Connection closed during handshake")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Server error codes the driver reacts to.
pub struct BoltErrorCode;

impl BoltErrorCode {
    pub const AUTHENTICATION_FAILED: &'static str = "Neo.ClientError.Security.Unauthorized";
    pub const SYNTAX_ERROR: &'static str = "Neo.ClientError.Statement.SyntaxError";
    pub const NOT_A_LEADER: &'static str = "Neo.ClientError.Cluster.NotALeader";
    pub const FORBIDDEN_ON_READ_ONLY_DATABASE: &'static str =
        "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";

    pub const TRANSIENT_PREFIX: &'static str = "Neo.TransientError.";
    pub const SECURITY_PREFIX: &'static str = "Neo.ClientError.Security.";

    // Transient errors (retry may succeed)
    pub const DEADLOCK_DETECTED: &'static str = "Neo.TransientError.Transaction.DeadlockDetected";
    pub const DATABASE_UNAVAILABLE: &'static str =
        "Neo.TransientError.General.DatabaseUnavailable";

    // Transient by code but caused by the client, never retried
    pub const TRANSACTION_TERMINATED: &'static str = "Neo.TransientError.Transaction.Terminated";
    pub const LOCK_CLIENT_STOPPED: &'static str =
        "Neo.TransientError.Transaction.LockClientStopped";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_display() {
        let err = HandshakeError::InvalidMagic {
            expected: [0x60, 0x60, 0xB0, 0x17],
            received: [0x00, 0x00, 0x00, 0x00],
        };
        assert!(err.to_string().contains("Invalid magic"));

        let err = HandshakeError::NoCompatibleVersion;
        assert!(err.to_string().contains("No compatible"));

        assert!(HandshakeError::HttpEndpoint.to_string().contains("http endpoint"));
    }

    #[test]
    fn test_bolt_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let bolt_err: BoltError = io_err.into();
        assert!(matches!(bolt_err, BoltError::Io(_)));
    }

    #[test]
    fn test_bolt_error_from_packstream() {
        let bolt_err: BoltError = PackStreamError::UnexpectedEof.into();
        assert!(matches!(bolt_err, BoltError::PackStream(PackStreamError::UnexpectedEof)));
        assert!(bolt_err.to_string().starts_with("PackStream error"));
    }

    #[test]
    fn test_bolt_error_codes() {
        assert!(BoltErrorCode::DEADLOCK_DETECTED.starts_with(BoltErrorCode::TRANSIENT_PREFIX));
        assert!(BoltErrorCode::TRANSACTION_TERMINATED.starts_with(BoltErrorCode::TRANSIENT_PREFIX));
        assert!(BoltErrorCode::AUTHENTICATION_FAILED.starts_with(BoltErrorCode::SECURITY_PREFIX));
    }
}
