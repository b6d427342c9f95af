//! Bolt protocol client implementation for the driver.
//!
//! ```text
//! ConnectionPool
//!   └── BoltConnection (transport + framing + pending handler queue)
//!         ├── Connector (TCP, or an in-memory stream in tests)
//!         ├── Handshake (version negotiation)
//!         └── MessageWriter / MessageReader (from the protocol module)
//! ```

pub mod connection;
pub mod connector;

pub use connection::{AsyncStream, BoltConnection, BoltConnectionState, BoxedStream};
pub use connector::{Connector, TcpConnector};

/// Client user agent string
pub const CLIENT_USER_AGENT: &str = concat!("boltpool/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_user_agent() {
        assert!(CLIENT_USER_AGENT.starts_with("boltpool/"));
    }
}
