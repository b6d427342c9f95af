//! # boltpool
//!
//! A Bolt v1 client driver core for graph databases: PackStream encoding,
//! pipelined request/response handling, connection pooling and
//! transactional retry.
//!
//! ## Features
//!
//! - **PackStream** - compact binary encoding of nulls, booleans, integers,
//!   floats, strings, lists, maps and graph structures
//! - **Pipelining** - requests are queued with one response handler each and
//!   flushed together; responses are matched to handlers in order
//! - **Connection Pooling** - bounded per-address pools with acquisition
//!   deadlines, liveness checks and maximum connection lifetime
//! - **Retry** - transaction functions are retried on transient failures with
//!   jittered exponential backoff
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use boltpool::{params, Driver, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Driver::new("bolt://localhost:7687")?;
//!     let session = driver.session(SessionConfig::default())?;
//!
//!     let result = session
//!         .run(
//!             "CREATE (n:Person {name: $name}) RETURN n",
//!             Some(params! {"name" => "Alice"}),
//!         )
//!         .await?;
//!
//!     for record in result {
//!         println!("{}", record);
//!     }
//!
//!     session.close().await?;
//!     driver.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! # use boltpool::{Driver, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687")?;
//! # let session = driver.session(SessionConfig::default())?;
//! let mut tx = session.begin_transaction().await?;
//! tx.run("CREATE (n:Node {id: 1})", None).await?;
//! tx.run("CREATE (n:Node {id: 2})", None).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transaction Functions
//!
//! The unit of work may run more than once; it must not commit itself.
//!
//! ```rust,no_run
//! # use boltpool::{Driver, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687")?;
//! # let session = driver.session(SessionConfig::default())?;
//! let created = session
//!     .write_transaction(|tx| {
//!         Box::pin(async move {
//!             let result = tx.run("CREATE (n:Node) RETURN n", None).await?;
//!             Ok(result.len())
//!         })
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use boltpool::DriverConfig;
//! use std::time::Duration;
//!
//! let config = DriverConfig::builder("bolt://localhost:7687")
//!     .unwrap()
//!     .with_max_connection_pool_size(50)
//!     .with_connection_acquisition_timeout(Duration::from_secs(10))
//!     .with_max_transaction_retry_time(Duration::from_secs(15))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_connection_pool_size, 50);
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! # use boltpool::{Driver, DriverError, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687")?;
//! # let session = driver.session(SessionConfig::default())?;
//! match session.run("RETURN 1", None).await {
//!     Ok(result) => println!("{} records", result.len()),
//!     Err(e) if e.is_retryable() => eprintln!("try again later: {}", e),
//!     Err(DriverError::PoolExhausted(msg)) => eprintln!("pool busy: {}", msg),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Connections, pool, retry, sessions and transactions
//! - [`bolt`] - PackStream, message format, framing and handshake

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod driver;

// Re-exports for convenience
pub use driver::{
    AccessMode, ConnectionPool, Driver, DriverConfig, DriverConfigBuilder, DriverError,
    DriverResult, PoolConfig, PoolMetrics, Query, QueryResult, Record, ResultSummary,
    RetrySettings, ServerAddress, Session, SessionConfig, SessionConfigBuilder, Transaction,
    Value,
};

pub use bolt::{BoltError, BoltVersion, Message, PackStreamValue};

/// Config alias for convenience
pub type Config = DriverConfig;
