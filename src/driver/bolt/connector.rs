//! Transport establishment.

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::connection::BoxedStream;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::ServerAddress;

/// Opens the byte stream a connection runs over.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `address`. No Bolt traffic is exchanged.
    async fn connect(&self, address: &ServerAddress) -> DriverResult<BoxedStream>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &ServerAddress) -> DriverResult<BoxedStream> {
        let stream = TcpStream::connect(address.to_socket_addr())
            .await
            .map_err(|e| {
                DriverError::service_unavailable(format!(
                    "Failed to connect to {}: {}",
                    address, e
                ))
            })?;

        // Enable TCP nodelay for lower latency
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%address, error = %e, "could not set TCP_NODELAY");
        }

        Ok(Box::new(stream))
    }
}
