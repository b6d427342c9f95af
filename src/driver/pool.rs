//! Connection Pool
//!
//! Bounded, per-address pools of initialized Bolt connections.
//!
//! Every live connection, idle or checked out, holds one permit of its
//! address' semaphore, so the number of connections never exceeds
//! `max_size`. A waiter wakes either when a connection is returned idle
//! (`Notify`) or when a discarded connection frees its permit.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{sleep_until, timeout_at, Instant};

use super::bolt::{BoltConnection, Connector, CLIENT_USER_AGENT};
use super::driver::{DriverConfig, ServerAddress};
use super::error::{DriverError, DriverResult};
use crate::bolt::codec::DEFAULT_MAX_MESSAGE_SIZE;

// ============================================================================
// PoolConfig
// ============================================================================

/// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + timeout`, saturating at a far-future instant.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// Connection pool configuration
///
/// `max_size` above [`Semaphore::MAX_PERMITS`] is treated as that limit.
///
/// | field | default |
/// |-------|---------|
/// | `max_size` | 100 |
/// | `acquisition_timeout` | 60s |
/// | `connection_timeout` | 5s |
/// | `idle_time_before_connection_test` | never |
/// | `max_lifetime` | 1h |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections per address
    pub max_size: usize,
    /// Default wait used by [`ConnectionPool::acquisition_deadline`]
    pub acquisition_timeout: Duration,
    /// Bound on connect, handshake and INIT
    pub connection_timeout: Duration,
    /// Probe idle connections unused for at least this long
    pub idle_time_before_connection_test: Option<Duration>,
    /// Discard connections older than this
    pub max_lifetime: Option<Duration>,
    /// Client name sent in INIT
    pub user_agent: String,
    /// Maximum message payload size
    pub max_message_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(5),
            idle_time_before_connection_test: None,
            max_lifetime: Some(Duration::from_secs(3600)),
            user_agent: CLIENT_USER_AGENT.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl PoolConfig {
    /// Start a builder
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    fn validate(&self) -> DriverResult<()> {
        if self.max_size == 0 {
            return Err(DriverError::configuration(
                "max_size: Zero value is not supported",
            ));
        }
        Ok(())
    }
}

impl From<&DriverConfig> for PoolConfig {
    fn from(config: &DriverConfig) -> Self {
        Self {
            max_size: config.max_connection_pool_size,
            acquisition_timeout: config.connection_acquisition_timeout,
            connection_timeout: config.connection_timeout,
            idle_time_before_connection_test: config.idle_time_before_connection_test,
            max_lifetime: config.max_connection_lifetime,
            user_agent: config.user_agent.clone(),
            max_message_size: config.max_message_size,
        }
    }
}

/// Pool configuration builder
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the maximum connections per address
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// Set the default acquisition timeout
    pub fn acquisition_timeout(mut self, duration: Duration) -> Self {
        self.config.acquisition_timeout = duration;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Probe idle connections unused for at least `duration`
    pub fn idle_time_before_connection_test(mut self, duration: Duration) -> Self {
        self.config.idle_time_before_connection_test = Some(duration);
        self
    }

    /// Set or clear the maximum lifetime
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> DriverResult<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// PoolMetrics
// ============================================================================

/// Pool metrics for one address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Live connections, idle and in use
    pub size: usize,
    /// Idle connections
    pub idle: usize,
    /// Checked-out connections
    pub in_use: usize,
    /// Successful acquisitions
    pub total_acquisitions: u64,
    /// Connections created
    pub total_created: u64,
    /// Connections discarded or closed
    pub total_closed: u64,
    /// Acquisitions that hit their deadline
    pub total_timeouts: u64,
}

// ============================================================================
// AddressPool
// ============================================================================

struct IdleConnection {
    id: u64,
    connection: BoltConnection,
    created_at: Instant,
    idle_since: Instant,
    permit: OwnedSemaphorePermit,
}

struct AddressPool {
    address: ServerAddress,
    config: Arc<PoolConfig>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    idle: Mutex<VecDeque<IdleConnection>>,
    released: Notify,
    closed: AtomicBool,
    total_acquisitions: AtomicU64,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    total_timeouts: AtomicU64,
}

impl AddressPool {
    fn new(address: ServerAddress, config: Arc<PoolConfig>) -> Self {
        let capacity = config.max_size.min(Semaphore::MAX_PERMITS);
        Self {
            address,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            config,
            idle: Mutex::new(VecDeque::new()),
            released: Notify::new(),
            closed: AtomicBool::new(false),
            total_acquisitions: AtomicU64::new(0),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_expired(&self, created_at: Instant) -> bool {
        self.config
            .max_lifetime
            .map_or(false, |lifetime| created_at.elapsed() > lifetime)
    }

    fn needs_liveness_check(&self, idle_since: Instant) -> bool {
        self.config
            .idle_time_before_connection_test
            .map_or(false, |threshold| idle_since.elapsed() >= threshold)
    }

    fn size(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    fn exhausted(&self) -> DriverError {
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(address = %self.address, max_size = self.capacity, "connection pool exhausted");
        DriverError::pool_exhausted(format!(
            "Unable to acquire connection to {} from the pool before the deadline",
            self.address
        ))
    }

    fn take_idle(&self) -> Option<IdleConnection> {
        self.idle.lock().pop_front()
    }

    fn return_idle(
        &self,
        id: u64,
        connection: BoltConnection,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) {
        if self.is_closed() {
            self.discard(connection, permit);
            return;
        }
        self.idle.lock().push_back(IdleConnection {
            id,
            connection,
            created_at,
            idle_since: Instant::now(),
            permit,
        });
        self.released.notify_one();
    }

    /// Close in the background; the permit is freed at once.
    fn discard(&self, connection: BoltConnection, permit: OwnedSemaphorePermit) {
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        drop(permit);
        if let Ok(handle) = Handle::try_current() {
            let mut connection = connection;
            handle.spawn(async move { connection.close().await });
        }
    }

    fn release(
        self: Arc<Self>,
        id: u64,
        connection: BoltConnection,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
        needs_reset: bool,
    ) {
        if self.is_closed() || !connection.is_open() || self.is_expired(created_at) {
            tracing::debug!(address = %self.address, id, "discarding released connection");
            self.discard(connection, permit);
            return;
        }

        if connection.is_idle() && !needs_reset {
            self.return_idle(id, connection, created_at, permit);
            return;
        }

        // Unconsumed responses or an open transaction: RESET before reuse.
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut connection = connection;
                    match connection.reset().await {
                        Ok(()) => self.return_idle(id, connection, created_at, permit),
                        Err(e) => {
                            tracing::debug!(address = %self.address, id, error = %e, "reset on release failed");
                            self.discard(connection, permit);
                        }
                    }
                });
            }
            Err(_) => {
                self.total_closed.fetch_add(1, Ordering::Relaxed);
                drop(permit);
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();
        self.released.notify_waiters();

        let idle: Vec<IdleConnection> = self.idle.lock().drain(..).collect();
        self.total_closed
            .fetch_add(idle.len() as u64, Ordering::Relaxed);
        join_all(idle.into_iter().map(|mut entry| async move {
            entry.connection.close().await;
        }))
        .await;
    }

    fn metrics(&self) -> PoolMetrics {
        let size = self.size();
        let idle = self.idle.lock().len();
        PoolMetrics {
            size,
            idle,
            in_use: size.saturating_sub(idle),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A checked-out connection. Dropping it returns it to the pool.
pub struct PooledConnection {
    id: u64,
    connection: Option<BoltConnection>,
    created_at: Instant,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<AddressPool>,
    needs_reset: bool,
}

impl PooledConnection {
    /// Connection ID, unique within its pool
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Server address
    pub fn address(&self) -> &ServerAddress {
        &self.pool.address
    }

    /// Creation time
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Underlying connection
    pub fn connection_mut(&mut self) -> DriverResult<&mut BoltConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| DriverError::session("Connection already returned to pool"))
    }

    /// Send RESET before the connection is reused, even if it looks idle.
    pub fn mark_needs_reset(&mut self) {
        self.needs_reset = true;
    }

    /// Return to the pool
    pub fn return_to_pool(self) {
        drop(self);
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("address", &self.pool.address)
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let (Some(connection), Some(permit)) = (self.connection.take(), self.permit.take()) {
            self.pool.clone().release(
                self.id,
                connection,
                self.created_at,
                permit,
                self.needs_reset,
            );
        }
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Connection pool
pub struct ConnectionPool {
    config: Arc<PoolConfig>,
    connector: Arc<dyn Connector>,
    pools: Mutex<HashMap<ServerAddress, Arc<AddressPool>>>,
    next_id: AtomicU64,
    open: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            connector,
            pools: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
        })
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// `now + acquisition_timeout`
    pub fn acquisition_deadline(&self) -> Instant {
        deadline_after(self.config.acquisition_timeout)
    }

    /// Check out a connection to `address`, waiting until `deadline` when
    /// the address is at capacity. Liveness checks and connection setup
    /// are cut short at `deadline` too.
    pub async fn acquire(
        &self,
        address: &ServerAddress,
        deadline: Instant,
    ) -> DriverResult<PooledConnection> {
        let pool = self.address_pool(address)?;

        loop {
            while let Some(idle) = pool.take_idle() {
                if let Some(idle) = self.check_idle(&pool, idle, deadline).await? {
                    return Ok(self.checkout(
                        &pool,
                        idle.id,
                        idle.connection,
                        idle.created_at,
                        idle.permit,
                    ));
                }
            }

            match pool.semaphore.clone().try_acquire_owned() {
                Ok(permit) => return self.create(&pool, permit, deadline).await,
                Err(TryAcquireError::Closed) => return Err(closed()),
                Err(TryAcquireError::NoPermits) => {}
            }

            tokio::select! {
                permit = pool.semaphore.clone().acquire_owned() => {
                    let permit = permit.map_err(|_| closed())?;
                    return self.create(&pool, permit, deadline).await;
                }
                _ = pool.released.notified() => {}
                _ = sleep_until(deadline) => return Err(pool.exhausted()),
            }
        }
    }

    /// Return a connection. Never blocks.
    pub fn release(&self, connection: PooledConnection) {
        connection.return_to_pool();
    }

    /// Pre-create up to `count` idle connections, bounded by `max_size`.
    /// Returns how many were created.
    pub async fn warmup(&self, address: &ServerAddress, count: usize) -> DriverResult<usize> {
        let pool = self.address_pool(address)?;
        let target = count.min(pool.capacity);
        let mut created = 0;

        while pool.size() < target {
            let permit = match pool.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            match self.open_connection(&pool, None).await {
                Ok((id, connection)) => {
                    pool.return_idle(id, connection, Instant::now(), permit);
                    created += 1;
                }
                Err(e) => {
                    tracing::warn!(%address, error = %e, "warmup connection failed");
                    if created == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }

        Ok(created)
    }

    /// Close and forget the pool of one address.
    pub async fn purge(&self, address: &ServerAddress) {
        let pool = self.pools.lock().remove(address);
        if let Some(pool) = pool {
            tracing::debug!(%address, "purging connection pool");
            pool.close().await;
        }
    }

    /// Close every idle connection. Later acquisitions fail; connections
    /// still checked out are closed when returned.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let pools: Vec<Arc<AddressPool>> = self.pools.lock().drain().map(|(_, p)| p).collect();
        join_all(pools.iter().map(|pool| pool.close())).await;
        tracing::debug!("connection pool closed");
    }

    /// Whether `close` has not been called
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Metrics for one address
    pub fn metrics(&self, address: &ServerAddress) -> PoolMetrics {
        self.pools
            .lock()
            .get(address)
            .map(|pool| pool.metrics())
            .unwrap_or_default()
    }

    fn address_pool(&self, address: &ServerAddress) -> DriverResult<Arc<AddressPool>> {
        if !self.is_open() {
            return Err(closed());
        }
        let mut pools = self.pools.lock();
        let pool = pools
            .entry(address.clone())
            .or_insert_with(|| Arc::new(AddressPool::new(address.clone(), self.config.clone())));
        Ok(pool.clone())
    }

    /// Discards broken, expired or dead idle connections. A liveness check
    /// still unanswered at `deadline` discards the connection and exhausts
    /// the acquisition.
    async fn check_idle(
        &self,
        pool: &AddressPool,
        mut idle: IdleConnection,
        deadline: Instant,
    ) -> DriverResult<Option<IdleConnection>> {
        if !idle.connection.is_open() || pool.is_expired(idle.created_at) {
            tracing::debug!(address = %pool.address, id = idle.id, "discarding stale idle connection");
            pool.discard(idle.connection, idle.permit);
            return Ok(None);
        }

        if pool.needs_liveness_check(idle.idle_since) {
            match timeout_at(deadline, idle.connection.reset()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(address = %pool.address, id = idle.id, error = %e, "liveness check failed");
                    pool.discard(idle.connection, idle.permit);
                    return Ok(None);
                }
                Err(_) => {
                    tracing::warn!(address = %pool.address, id = idle.id, "liveness check timed out");
                    pool.discard(idle.connection, idle.permit);
                    return Err(pool.exhausted());
                }
            }
        }

        Ok(Some(idle))
    }

    async fn create(
        &self,
        pool: &Arc<AddressPool>,
        permit: OwnedSemaphorePermit,
        deadline: Instant,
    ) -> DriverResult<PooledConnection> {
        let (id, connection) = self.open_connection(pool, Some(deadline)).await?;
        Ok(self.checkout(pool, id, connection, Instant::now(), permit))
    }

    /// Connect, handshake and INIT within `connection_timeout`, or by
    /// `deadline` when that comes first.
    async fn open_connection(
        &self,
        pool: &AddressPool,
        deadline: Option<Instant>,
    ) -> DriverResult<(u64, BoltConnection)> {
        let address = &pool.address;
        let connect_deadline = deadline_after(self.config.connection_timeout);
        let (limit, acquisition_bound) = match deadline {
            Some(deadline) if deadline < connect_deadline => (deadline, true),
            _ => (connect_deadline, false),
        };
        let connect = async {
            let stream = self.connector.connect(address).await?;
            BoltConnection::open(
                stream,
                address.clone(),
                &self.config.user_agent,
                self.config.max_message_size,
            )
            .await
        };

        let connection = match timeout_at(limit, connect).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                tracing::warn!(%address, error = %e, "failed to open connection");
                return Err(e);
            }
            Err(_) if acquisition_bound => return Err(pool.exhausted()),
            Err(_) => {
                tracing::warn!(%address, "connection timed out");
                return Err(DriverError::service_unavailable(format!(
                    "Unable to establish connection to {} in {}ms",
                    address,
                    self.config.connection_timeout.as_millis()
                )));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        pool.total_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%address, id, "connection created");
        Ok((id, connection))
    }

    fn checkout(
        &self,
        pool: &Arc<AddressPool>,
        id: u64,
        connection: BoltConnection,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection {
        pool.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            id,
            connection: Some(connection),
            created_at,
            permit: Some(permit),
            pool: pool.clone(),
            needs_reset: false,
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_size", &self.config.max_size)
            .field("addresses", &self.pools.lock().len())
            .field("open", &self.is_open())
            .finish()
    }
}

fn closed() -> DriverError {
    DriverError::session("Pool is closed")
}

// ============================================================================
// Tests
// ============================================================================
