//! Explicit transactions
//!
//! Bolt v1 has no transaction messages: BEGIN, COMMIT and ROLLBACK are plain
//! statements, each sent as RUN followed by DISCARD_ALL. A transaction owns
//! its pooled connection until it is committed, rolled back or dropped.

use std::collections::HashMap;

use super::error::{DriverError, DriverResult};
use super::pool::PooledConnection;
use super::session::{execute, run_and_discard, Query, QueryResult};
use super::Value;

// ============================================================================
// TransactionState
// ============================================================================

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    /// A statement or COMMIT failed; only rollback is allowed
    Failed,
}

impl TransactionState {
    /// Whether no further statements may run
    pub fn is_terminated(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Explicit transaction
///
/// Dropping a transaction that was neither committed nor rolled back returns
/// its connection with a RESET pending, which ends the server-side
/// transaction before the connection is reused.
pub struct Transaction {
    connection: Option<PooledConnection>,
    state: TransactionState,
}

impl Transaction {
    /// Send BEGIN on `connection`
    pub async fn begin(mut connection: PooledConnection) -> DriverResult<Self> {
        if let Err(e) = run_and_discard(connection.connection_mut()?, "BEGIN").await {
            connection.mark_needs_reset();
            return Err(e);
        }
        tracing::trace!(connection = connection.id(), "transaction started");
        Ok(Self {
            connection: Some(connection),
            state: TransactionState::Active,
        })
    }

    /// Run a statement inside the transaction
    pub async fn run(
        &mut self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<QueryResult> {
        self.ensure_active()?;

        let mut query = query.into();
        if let Some(p) = params {
            query = query.with_params(p);
        }

        let result = execute(self.connection_mut()?, &query).await;
        if result.is_err() {
            self.state = TransactionState::Failed;
        }
        result
    }

    /// Commit
    pub async fn commit(mut self) -> DriverResult<()> {
        self.ensure_active()?;

        match run_and_discard(self.connection_mut()?, "COMMIT").await {
            Ok(_) => {
                self.state = TransactionState::Committed;
                self.release();
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Failed;
                Err(e)
            }
        }
    }

    /// Roll back
    ///
    /// A failed transaction is not sent ROLLBACK; the RESET on release
    /// discards it instead.
    pub async fn rollback(mut self) -> DriverResult<()> {
        match self.state {
            TransactionState::Committed | TransactionState::RolledBack => Ok(()),
            TransactionState::Failed => {
                if let Some(conn) = self.connection.as_mut() {
                    conn.mark_needs_reset();
                }
                self.state = TransactionState::RolledBack;
                self.release();
                Ok(())
            }
            TransactionState::Active => {
                match run_and_discard(self.connection_mut()?, "ROLLBACK").await {
                    Ok(_) => {
                        self.state = TransactionState::RolledBack;
                        self.release();
                        Ok(())
                    }
                    Err(e) => {
                        self.state = TransactionState::Failed;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Roll back unless already terminated
    pub async fn close(self) -> DriverResult<()> {
        self.rollback().await
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_active(&self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(DriverError::transaction("Transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(DriverError::transaction("Transaction already rolled back"))
            }
            TransactionState::Failed => {
                Err(DriverError::transaction("Transaction in failed state"))
            }
        }
    }

    fn connection_mut(&mut self) -> DriverResult<&mut super::bolt::BoltConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| DriverError::transaction("No connection available"))?
            .connection_mut()
    }

    fn release(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.return_to_pool();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("connection", &self.connection.as_ref().map(|c| c.id()))
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            if matches!(self.state, TransactionState::Active | TransactionState::Failed) {
                tracing::debug!(
                    connection = conn.id(),
                    state = ?self.state,
                    "transaction dropped without commit or rollback"
                );
                conn.mark_needs_reset();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::{BoltErrorCode, Message};
    use crate::driver::bolt::Connector;
    use crate::driver::driver::{Driver, DriverConfig};
    use crate::driver::testkit::{StatementReply, TestConnector};
    use std::sync::Arc;

    fn statements(statement: &str) -> StatementReply {
        match statement {
            "BAD" => StatementReply::fail(BoltErrorCode::SYNTAX_ERROR, "Invalid input 'B'"),
            "RETURN 1 AS n" => StatementReply::rows(&["n"], vec![vec![Value::from(1i64)]]),
            _ => StatementReply::empty(),
        }
    }

    fn driver(connector: Arc<TestConnector>) -> Driver {
        let config = DriverConfig::builder("bolt://localhost:7687")
            .unwrap()
            .with_max_connection_pool_size(1)
            .build()
            .unwrap();
        Driver::with_connector(config, connector as Arc<dyn Connector>).unwrap()
    }

    fn run(statement: &str) -> Message {
        Message::run(statement, HashMap::new())
    }

    #[test]
    fn test_transaction_state() {
        assert!(!TransactionState::Active.is_terminated());
        assert!(TransactionState::Committed.is_terminated());
        assert!(TransactionState::RolledBack.is_terminated());
        assert!(TransactionState::Failed.is_terminated());
    }

    #[tokio::test]
    async fn test_commit() {
        let connector = TestConnector::with_statements(statements);
        let driver = driver(connector.clone());
        let session = driver.default_session().unwrap();

        let mut tx = session.begin_transaction().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Active);
        let result = tx.run("RETURN 1 AS n", None).await.unwrap();
        assert_eq!(result.single().unwrap().get_int("n").unwrap(), 1);
        tx.commit().await.unwrap();

        assert_eq!(
            connector.requests(),
            vec![
                run("BEGIN"),
                Message::DiscardAll,
                run("RETURN 1 AS n"),
                Message::PullAll,
                run("COMMIT"),
                Message::DiscardAll,
            ]
        );
        assert_eq!(driver.metrics().idle, 1);
    }

    #[tokio::test]
    async fn test_rollback() {
        let connector = TestConnector::with_statements(statements);
        let driver = driver(connector.clone());
        let session = driver.default_session().unwrap();

        let mut tx = session.begin_transaction().await.unwrap();
        tx.run("CREATE (n)", None).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(connector.statements(), ["BEGIN", "CREATE (n)", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_failed_statement_fails_transaction() {
        let connector = TestConnector::with_statements(statements);
        let driver = driver(connector.clone());
        let session = driver.default_session().unwrap();

        let mut tx = session.begin_transaction().await.unwrap();
        let err = tx.run("BAD", None).await.unwrap_err();
        assert_eq!(err.code(), Some(BoltErrorCode::SYNTAX_ERROR));
        assert_eq!(tx.state(), TransactionState::Failed);

        let err = tx.run("RETURN 1 AS n", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Transaction error: Transaction in failed state");
        tx.rollback().await.unwrap();

        // The next user of the connection waits for the RESET
        session.run("RETURN 1 AS n", None).await.unwrap();
        assert_eq!(
            connector.requests(),
            vec![
                run("BEGIN"),
                Message::DiscardAll,
                run("BAD"),
                Message::PullAll,
                Message::AckFailure,
                Message::Reset,
                run("RETURN 1 AS n"),
                Message::PullAll,
            ]
        );
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_resets_connection() {
        let connector = TestConnector::with_statements(statements);
        let driver = driver(connector.clone());
        let session = driver.default_session().unwrap();

        let tx = session.begin_transaction().await.unwrap();
        drop(tx);

        session.run("RETURN 1 AS n", None).await.unwrap();
        assert_eq!(
            connector.requests(),
            vec![
                run("BEGIN"),
                Message::DiscardAll,
                Message::Reset,
                run("RETURN 1 AS n"),
                Message::PullAll,
            ]
        );
    }

    #[tokio::test]
    async fn test_begin_failure() {
        let connector = TestConnector::with_statements(|statement| match statement {
            "BEGIN" => StatementReply::fail(
                BoltErrorCode::TRANSACTION_TERMINATED,
                "Database is shutting down",
            ),
            _ => StatementReply::empty(),
        });
        let driver = driver(connector);
        let session = driver.default_session().unwrap();

        let err = session.begin_transaction().await.unwrap_err();
        assert_eq!(err.code(), Some(BoltErrorCode::TRANSACTION_TERMINATED));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_close_rolls_back_active_transaction() {
        let connector = TestConnector::with_statements(statements);
        let driver = driver(connector.clone());
        let session = driver.default_session().unwrap();

        let tx = session.begin_transaction().await.unwrap();
        tx.close().await.unwrap();
        assert_eq!(connector.statements(), ["BEGIN", "ROLLBACK"]);
    }
}
