//! Session Management
//!
//! A session borrows pooled connections for auto-commit statements and
//! explicit transactions. It holds no connection between calls.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::oneshot;

use super::bolt::connection::await_completion;
use super::bolt::BoltConnection;
use super::driver::DriverConfig;
use super::error::{DriverError, DriverResult};
use super::handlers::{
    GenericResponseHandler, Metadata, PullAllResponseHandler, RunResponseHandler,
};
use super::pool::ConnectionPool;
use super::record::Record;
use super::retry::RetryExecutor;
use super::transaction::Transaction;
use super::Value;
use crate::bolt::Message;

// ============================================================================
// AccessMode
// ============================================================================

/// Access mode
///
/// With a single server both modes reach the same address; the mode is
/// kept for logging and for callers that route themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Session configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Default access mode
    pub default_access_mode: AccessMode,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Set the access mode
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.default_access_mode = mode;
        self
    }
}

/// Session configuration builder
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn with_read_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Read;
        self
    }

    pub fn with_write_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Write;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// Query
// ============================================================================

/// Statement text and parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub parameters: HashMap<String, Value>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    /// Add one parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Add parameters, replacing existing keys
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// ResultSummary
// ============================================================================

/// Statement type reported in the stream's trailing metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    SchemaWrite,
}

impl QueryType {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(QueryType::ReadOnly),
            "rw" => Some(QueryType::ReadWrite),
            "w" => Some(QueryType::WriteOnly),
            "s" => Some(QueryType::SchemaWrite),
            _ => None,
        }
    }
}

/// Update counters from the `stats` map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
}

impl Counters {
    fn from_stats(stats: &HashMap<String, Value>) -> Self {
        let count = |key: &str| stats.get(key).and_then(|v| v.as_int()).unwrap_or(0);
        Self {
            nodes_created: count("nodes-created"),
            nodes_deleted: count("nodes-deleted"),
            relationships_created: count("relationships-created"),
            relationships_deleted: count("relationships-deleted"),
            properties_set: count("properties-set"),
            labels_added: count("labels-added"),
            labels_removed: count("labels-removed"),
            indexes_added: count("indexes-added"),
            indexes_removed: count("indexes-removed"),
            constraints_added: count("constraints-added"),
            constraints_removed: count("constraints-removed"),
        }
    }

    /// Whether the statement changed data
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
    }

    /// Whether the statement changed the schema
    pub fn contains_system_updates(&self) -> bool {
        self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }
}

/// Result summary
///
/// Timings are milliseconds as reported by the server, -1 when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub query: Query,
    pub query_type: Option<QueryType>,
    pub counters: Counters,
    pub result_available_after: i64,
    pub result_consumed_after: i64,
    /// Server agent of the connection that ran the statement
    pub server: Option<String>,
    /// Trailing PULL_ALL metadata, unparsed
    pub metadata: Metadata,
}

impl ResultSummary {
    fn new(
        query: Query,
        result_available_after: i64,
        metadata: Metadata,
        server: Option<String>,
    ) -> Self {
        let query_type = metadata
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(QueryType::from_code);
        let counters = metadata
            .get("stats")
            .and_then(|v| v.as_map())
            .map(Counters::from_stats)
            .unwrap_or_default();
        let result_consumed_after = metadata
            .get("result_consumed_after")
            .and_then(|v| v.as_int())
            .unwrap_or(-1);
        Self {
            query,
            query_type,
            counters,
            result_available_after,
            result_consumed_after,
            server,
            metadata,
        }
    }
}

// ============================================================================
// QueryResult
// ============================================================================

/// Fully buffered statement result
#[derive(Debug, Clone)]
pub struct QueryResult {
    keys: Arc<[String]>,
    records: Vec<Record>,
    summary: ResultSummary,
}

impl QueryResult {
    /// Column keys
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn summary(&self) -> &ResultSummary {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The only record; errors on zero or several.
    pub fn single(self) -> DriverResult<Record> {
        let count = self.records.len();
        let mut records = self.records.into_iter();
        match (records.next(), count) {
            (Some(record), 1) => Ok(record),
            (None, _) => Err(DriverError::session("Expected a single record, got none")),
            _ => Err(DriverError::session(format!(
                "Expected a single record, got {}",
                count
            ))),
        }
    }

    pub fn first(self) -> Option<Record> {
        self.records.into_iter().next()
    }

    /// Records and summary
    pub fn into_parts(self) -> (Vec<Record>, ResultSummary) {
        (self.records, self.summary)
    }
}

impl IntoIterator for QueryResult {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

// ============================================================================
// Statement round trips
// ============================================================================

/// Pipeline RUN + PULL_ALL and buffer the whole result.
pub(crate) async fn execute(
    connection: &mut BoltConnection,
    query: &Query,
) -> DriverResult<QueryResult> {
    let (run_tx, run_rx) = oneshot::channel();
    let (pull_tx, pull_rx) = oneshot::channel();
    connection.send(
        Message::run(query.text.clone(), query.parameters.clone()),
        RunResponseHandler::new(run_tx),
    )?;
    connection.send(Message::PullAll, PullAllResponseHandler::new(pull_tx))?;
    connection.sync().await?;

    let outcome = await_completion(pull_rx).await?;
    let run = run_rx.await.unwrap_or_default();

    let keys: Arc<[String]> = Arc::from(run.statement_keys);
    let records = outcome
        .records
        .into_iter()
        .map(|values| Record::new(keys.clone(), values))
        .collect();
    let summary = ResultSummary::new(
        query.clone(),
        run.result_available_after,
        outcome.metadata,
        connection.server_agent().map(str::to_string),
    );

    tracing::trace!(statement = %query.text, keys = keys.len(), "statement executed");
    Ok(QueryResult {
        keys,
        records,
        summary,
    })
}

/// Pipeline RUN + DISCARD_ALL for a statement whose records are not wanted.
pub(crate) async fn run_and_discard(
    connection: &mut BoltConnection,
    statement: &str,
) -> DriverResult<Metadata> {
    let (run_tx, _run_rx) = oneshot::channel();
    let (discard_tx, discard_rx) = oneshot::channel();
    connection.send(
        Message::run(statement, HashMap::new()),
        RunResponseHandler::new(run_tx),
    )?;
    connection.send(Message::DiscardAll, GenericResponseHandler::new(discard_tx))?;
    connection.sync().await?;
    await_completion(discard_rx).await
}

// ============================================================================
// Session
// ============================================================================

/// Database session
pub struct Session {
    driver_config: Arc<DriverConfig>,
    pool: Arc<ConnectionPool>,
    config: SessionConfig,
    open: RwLock<bool>,
}

impl Session {
    pub fn new(
        driver_config: Arc<DriverConfig>,
        pool: Arc<ConnectionPool>,
        config: SessionConfig,
    ) -> Self {
        Self {
            driver_config,
            pool,
            config,
            open: RwLock::new(true),
        }
    }

    /// Run an auto-commit statement
    pub async fn run(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;

        let mut query = query.into();
        if let Some(params) = params {
            query = query.with_params(params);
        }

        let mut conn = self
            .pool
            .acquire(&self.driver_config.address, self.pool.acquisition_deadline())
            .await?;
        let result = execute(conn.connection_mut()?, &query).await;
        conn.return_to_pool();
        result
    }

    /// Begin an explicit transaction on a connection of its own
    pub async fn begin_transaction(&self) -> DriverResult<Transaction> {
        self.ensure_open()?;

        let conn = self
            .pool
            .acquire(&self.driver_config.address, self.pool.acquisition_deadline())
            .await?;
        Transaction::begin(conn).await
    }

    /// Run `work` in a read transaction, retrying transient failures
    ///
    /// ```ignore
    /// let count = session
    ///     .read_transaction(|tx| Box::pin(async move {
    ///         let result = tx.run("MATCH (n) RETURN count(n) AS c", None).await?;
    ///         result.single()?.get_int("c")
    ///     }))
    ///     .await?;
    /// ```
    pub async fn read_transaction<F, T>(&self, work: F) -> DriverResult<T>
    where
        F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        self.execute_transaction(AccessMode::Read, work).await
    }

    /// Run `work` in a write transaction, retrying transient failures
    pub async fn write_transaction<F, T>(&self, work: F) -> DriverResult<T>
    where
        F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        self.execute_transaction(AccessMode::Write, work).await
    }

    async fn execute_transaction<F, T>(&self, mode: AccessMode, work: F) -> DriverResult<T>
    where
        F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        self.ensure_open()?;

        let executor = RetryExecutor::new(self.driver_config.retry_settings())?;
        let work = &work;
        executor
            .run(move || async move {
                let mut tx = self.begin_transaction().await?;
                match work(&mut tx).await {
                    Ok(value) => {
                        tx.commit().await?;
                        Ok(value)
                    }
                    Err(error) => {
                        if let Err(rollback) = tx.rollback().await {
                            tracing::debug!(?mode, error = %rollback, "rollback after failed unit of work failed");
                        }
                        Err(error)
                    }
                }
            })
            .await
    }

    /// Close the session; later calls fail
    pub async fn close(&self) -> DriverResult<()> {
        *self.open.write() = false;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if *self.open.read() {
            Ok(())
        } else {
            Err(DriverError::session("Session is closed"))
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.driver_config.address)
            .field("access_mode", &self.config.default_access_mode)
            .field("open", &*self.open.read())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
