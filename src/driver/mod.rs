//! Driver Module
//!
//! Connections, pooling, retry and the session layer on top of them.
//!
//! # Example
//!
//! ```ignore
//! use boltpool::driver::{Driver, SessionConfig};
//!
//! let driver = Driver::new("bolt://localhost:7687")?;
//! let session = driver.session(SessionConfig::default())?;
//!
//! let result = session.run("MATCH (n) RETURN n LIMIT 10", None).await?;
//! for record in result {
//!     println!("{}", record);
//! }
//!
//! let mut tx = session.begin_transaction().await?;
//! tx.run("CREATE (n:Person {name: $name})", Some(params!{"name" => "Alice"})).await?;
//! tx.commit().await?;
//!
//! driver.close().await?;
//! ```

pub mod bolt;
pub mod handlers;
pub mod retry;
mod driver;
mod error;
mod pool;
mod record;
mod session;
mod transaction;

#[cfg(test)]
pub(crate) mod testkit;

pub use self::bolt::{BoltConnection, BoltConnectionState, Connector, TcpConnector};
pub use driver::{Driver, DriverConfig, DriverConfigBuilder, ServerAddress, DEFAULT_PORT};
pub use error::{DriverError, DriverResult, ErrorCategory};
pub use pool::{ConnectionPool, PoolConfig, PoolConfigBuilder, PoolMetrics, PooledConnection};
pub use record::Record;
pub use retry::{run_with_retry, RetryExecutor, RetrySettings};
pub use session::{
    AccessMode, Counters, Query, QueryResult, QueryType, ResultSummary, Session, SessionConfig,
    SessionConfigBuilder,
};
pub use transaction::{Transaction, TransactionState};

/// Parameter and record value
pub type Value = crate::bolt::PackStreamValue;

/// Build a parameter map
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert(String::from($key), $crate::driver::Value::from($value));
        )+
        map
    }};
}
