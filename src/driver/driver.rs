//! Driver
//!
//! Process-scoped entry point: owns the connection pool and the
//! configuration every session shares. Created explicitly and shut down
//! with [`Driver::close`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::bolt::codec::DEFAULT_MAX_MESSAGE_SIZE;
use super::bolt::{Connector, TcpConnector, CLIENT_USER_AGENT};
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PoolConfig, PoolMetrics};
use super::retry::RetrySettings;
use super::session::{Session, SessionConfig};

/// Default Bolt port
pub const DEFAULT_PORT: u16 = 7687;

// ============================================================================
// ServerAddress
// ============================================================================

/// Server address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host
    pub host: String,
    /// Port
    pub port: u16,
}

impl ServerAddress {
    /// Create a new server address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `bolt://host:port`, `host:port` or `host`.
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        let rest = match uri.split_once("://") {
            Some(("bolt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(DriverError::configuration(format!(
                    "Unsupported URI scheme '{}'",
                    scheme
                )))
            }
            None => uri,
        };
        let rest = rest.trim_end_matches('/');

        if rest.is_empty() {
            return Err(DriverError::configuration("Missing host"));
        }

        match rest.rsplit_once(':') {
            None => Ok(Self::new(rest, DEFAULT_PORT)),
            Some((host, port)) if !host.is_empty() && !host.contains(':') => {
                let port = port
                    .parse()
                    .map_err(|_| DriverError::configuration(format!("Invalid port '{}'", port)))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(DriverError::configuration(format!(
                "Invalid server address '{}'",
                uri
            ))),
        }
    }

    /// Convert to a socket address string
    pub fn to_socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// DriverConfig
// ============================================================================

/// Driver configuration
///
/// | field | default |
/// |-------|---------|
/// | `max_connection_pool_size` | 100 |
/// | `connection_acquisition_timeout` | 60s |
/// | `connection_timeout` | 5s |
/// | `idle_time_before_connection_test` | never |
/// | `max_connection_lifetime` | 1h |
/// | `max_transaction_retry_time` | 30s |
/// | `user_agent` | `boltpool/<version>` |
/// | `max_message_size` | 16MiB |
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Server address
    pub address: ServerAddress,
    /// Maximum connections per address, idle and in use
    pub max_connection_pool_size: usize,
    /// How long `acquire` may wait for a connection
    pub connection_acquisition_timeout: Duration,
    /// Bound on connect, handshake and INIT of a new connection
    pub connection_timeout: Duration,
    /// Idle connections older than this are probed before reuse
    pub idle_time_before_connection_test: Option<Duration>,
    /// Connections older than this are discarded
    pub max_connection_lifetime: Option<Duration>,
    /// Retry budget of transaction functions
    pub max_transaction_retry_time: Duration,
    /// Client name sent in INIT
    pub user_agent: String,
    /// Maximum message payload size
    pub max_message_size: usize,
}

impl DriverConfig {
    /// Configuration with defaults for `uri`.
    pub fn new(uri: &str) -> DriverResult<Self> {
        Ok(Self {
            address: ServerAddress::from_uri(uri)?,
            ..Self::default()
        })
    }

    /// Start a builder
    pub fn builder(uri: &str) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri)?;
        Ok(DriverConfigBuilder { config })
    }

    /// Retry settings for transaction functions.
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings::new(self.max_transaction_retry_time)
    }

    /// Reject values the pool cannot honour.
    pub fn validate(&self) -> DriverResult<()> {
        if self.max_connection_pool_size == 0 {
            return Err(DriverError::configuration(
                "max_connection_pool_size: Zero value is not supported",
            ));
        }
        if self.max_message_size == 0 {
            return Err(DriverError::configuration(
                "max_message_size: Zero value is not supported",
            ));
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: ServerAddress::default(),
            max_connection_pool_size: 100,
            connection_acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(5),
            idle_time_before_connection_test: None,
            max_connection_lifetime: Some(Duration::from_secs(3600)),
            max_transaction_retry_time: Duration::from_secs(30),
            user_agent: CLIENT_USER_AGENT.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

// ============================================================================
// DriverConfigBuilder
// ============================================================================

/// Driver configuration builder
#[derive(Debug, Clone)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// Set the maximum pool size per address
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    /// Set the connection acquisition timeout
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Probe idle connections older than `idle` before reuse.
    /// `Duration::ZERO` probes every time.
    pub fn with_connection_liveness_check_timeout(mut self, idle: Duration) -> Self {
        self.config.idle_time_before_connection_test = Some(idle);
        self
    }

    /// Set the maximum connection lifetime
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = Some(lifetime);
        self
    }

    /// Never discard connections for age
    pub fn without_max_connection_lifetime(mut self) -> Self {
        self.config.max_connection_lifetime = None;
        self
    }

    /// Set the maximum transaction retry time
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.max_transaction_retry_time = time;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the maximum message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Build
    pub fn build(self) -> DriverResult<DriverConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Bolt driver
pub struct Driver {
    config: Arc<DriverConfig>,
    pool: Arc<ConnectionPool>,
    open: RwLock<bool>,
}

impl Driver {
    /// Driver with default configuration for `uri`
    pub fn new(uri: &str) -> DriverResult<Self> {
        Self::with_config(DriverConfig::new(uri)?)
    }

    /// Driver connecting over TCP
    pub fn with_config(config: DriverConfig) -> DriverResult<Self> {
        Self::with_connector(config, Arc::new(TcpConnector::new()))
    }

    /// Driver using a custom transport
    pub fn with_connector(config: DriverConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        config.validate()?;
        let pool = ConnectionPool::new(PoolConfig::from(&config), connector)?;
        tracing::debug!(address = %config.address, "driver created");

        Ok(Self {
            config: Arc::new(config),
            pool: Arc::new(pool),
            open: RwLock::new(true),
        })
    }

    /// Create a session
    pub fn session(&self, config: SessionConfig) -> DriverResult<Session> {
        self.ensure_open()?;
        Ok(Session::new(self.config.clone(), self.pool.clone(), config))
    }

    /// Create a session with the default configuration
    pub fn default_session(&self) -> DriverResult<Session> {
        self.session(SessionConfig::default())
    }

    /// Driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Close the pool. Later sessions fail.
    pub async fn close(&self) -> DriverResult<()> {
        {
            let mut open = self.open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }

        self.pool.close().await;
        tracing::debug!(address = %self.config.address, "driver closed");
        Ok(())
    }

    /// Open one connection and return it to the pool.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.ensure_open()?;
        let deadline = self.pool.acquisition_deadline();
        let connection = self.pool.acquire(&self.config.address, deadline).await?;
        self.pool.release(connection);
        Ok(())
    }

    /// Whether `close` has not been called
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if *self.open.read() {
            Ok(())
        } else {
            Err(DriverError::session("Driver is closed"))
        }
    }

    /// Pool metrics for the configured address
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics(&self.config.address)
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.config.address)
            .field("open", &*self.open.read())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
