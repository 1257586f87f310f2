//! PostgreSQL transaction management.
//!
//! A transaction pins one pooled connection from `BEGIN` until `COMMIT` or
//! `ROLLBACK`; the connection goes back to the provider afterwards whatever
//! the outcome, and is closed instead of recycled when the final statement
//! failed.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::provider::{ConnectionProvider, ProviderConnection, QueryOutput};
use crate::{ConnectorError, Result, SqlValue};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted
    ReadUncommitted,
    /// Read committed (PostgreSQL default)
    #[default]
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable
    Serializable,
}

impl IsolationLevel {
    /// Returns the SQL isolation level string.
    pub fn to_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = ConnectorError;

    /// Accepts `READ COMMITTED`, `read_committed`, `ReadCommitted` and
    /// similar spellings.
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match folded.as_str() {
            "READUNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READCOMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLEREAD" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            _ => Err(ConnectorError::Validation(format!("Unknown isolation level '{}'", s))),
        }
    }
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write transaction (default)
    #[default]
    ReadWrite,
    /// Read-only transaction - no writes allowed
    ReadOnly,
}

impl AccessMode {
    /// Returns the SQL access mode string.
    pub fn to_sql(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

/// Options for `BEGIN`.
///
/// # Examples
///
/// ```
/// use ouroboros_pg_connector::transaction::{IsolationLevel, TransactionOptions};
///
/// let options = TransactionOptions::new().isolation_level(IsolationLevel::Serializable);
/// assert_eq!(options.to_sql(), "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE");
///
/// let report = TransactionOptions::new()
///     .isolation_level(IsolationLevel::Serializable)
///     .read_only()
///     .deferrable(true);
/// assert_eq!(
///     report.to_sql(),
///     "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ ONLY, DEFERRABLE"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub access_mode: AccessMode,
    /// Only meaningful for SERIALIZABLE READ ONLY.
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    pub fn read_write(mut self) -> Self {
        self.access_mode = AccessMode::ReadWrite;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    /// The `BEGIN TRANSACTION ...` statement. The access mode is spelled out
    /// only when read-only.
    pub fn to_sql(&self) -> String {
        let mut parts = vec![format!("ISOLATION LEVEL {}", self.isolation_level.to_sql())];
        if self.access_mode == AccessMode::ReadOnly {
            parts.push(self.access_mode.to_sql().to_string());
            if self.isolation_level == IsolationLevel::Serializable && self.deferrable {
                parts.push("DEFERRABLE".to_string());
            }
        }
        format!("BEGIN TRANSACTION {}", parts.join(", "))
    }
}

impl From<IsolationLevel> for TransactionOptions {
    fn from(level: IsolationLevel) -> Self {
        TransactionOptions::new().isolation_level(level)
    }
}

static NEXT_DELEGATE_ID: AtomicU64 = AtomicU64::new(1);

/// An open transaction.
///
/// Dropping it while still active closes its connection, which makes the
/// server roll back.
pub struct Transaction<P: ConnectionProvider> {
    id: u64,
    /// Delegate that began the transaction.
    owner: u64,
    options: TransactionOptions,
    provider: Arc<P>,
    connection: Option<P::Connection>,
}

impl<P: ConnectionProvider> std::fmt::Debug for Transaction<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionProvider> Transaction<P> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    /// True until commit or rollback.
    pub fn is_active(&self) -> bool {
        self.connection.is_some()
    }

    fn pinned(&mut self) -> Result<&mut P::Connection> {
        self.connection.as_mut().ok_or(ConnectorError::ConnectionMissing)
    }

    /// Executes a statement inside the transaction.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::ConnectionMissing`] after commit or rollback,
    /// otherwise the statement's own error.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput> {
        let tx_id = self.id;
        let conn = self.pinned()?;
        debug!(tx_id, sql = %sql, "Executing in transaction");
        conn.execute(sql, params).await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    /// Runs the final statement, then always hands the connection back.
    async fn finish(&mut self, statement: &str) -> Result<()> {
        let outcome = self.pinned()?.execute(statement, &[]).await;
        let Some(conn) = self.connection.take() else {
            return Err(ConnectorError::ConnectionMissing);
        };

        let discard = outcome.is_err();
        let released = self.provider.release(conn, discard).await;
        debug!(tx_id = self.id, statement, discard, "Transaction finished");

        outcome?;
        released
    }
}

impl<P: ConnectionProvider> Drop for Transaction<P> {
    fn drop(&mut self) {
        let Some(conn) = self.connection.take() else {
            return;
        };
        warn!(tx_id = self.id, "Transaction dropped while active, closing its connection");
        let provider = Arc::clone(&self.provider);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = provider.release(conn, true).await {
                        warn!(error = %e, "Failed to close connection of dropped transaction");
                    }
                });
            }
            Err(_) => drop(conn),
        }
    }
}

/// Begins transactions on connections from a provider.
///
/// Each delegate only drives the transactions it began; a handle from
/// another delegate is rejected with [`ConnectorError::TransactionNotActive`].
pub struct TransactionDelegate<P: ConnectionProvider> {
    provider: Arc<P>,
    id: u64,
    next_id: AtomicU64,
}

impl<P: ConnectionProvider> TransactionDelegate<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            id: NEXT_DELEGATE_ID.fetch_add(1, Ordering::Relaxed),
            next_id: AtomicU64::new(1),
        }
    }

    fn check_owner(&self, tx: &Transaction<P>) -> Result<()> {
        if tx.owner != self.id {
            debug!(tx_id = tx.id, owner = tx.owner, delegate = self.id, "Transaction begun elsewhere");
            return Err(ConnectorError::TransactionNotActive);
        }
        Ok(())
    }

    /// Checks out a connection and issues `BEGIN TRANSACTION ...` on it.
    ///
    /// # Errors
    ///
    /// Returns the acquire or `BEGIN` error; in the latter case the
    /// connection is closed before returning.
    #[instrument(skip_all)]
    pub async fn begin(&self, options: impl Into<TransactionOptions>) -> Result<Transaction<P>> {
        let options = options.into();
        let mut conn = self.provider.acquire().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = conn.execute(&options.to_sql(), &[]).await {
            if let Err(release_err) = self.provider.release(conn, true).await {
                warn!(error = %release_err, "Failed to close connection after BEGIN failed");
            }
            return Err(e);
        }

        debug!(
            tx_id = id,
            isolation_level = ?options.isolation_level,
            access_mode = ?options.access_mode,
            "Started transaction"
        );
        Ok(Transaction {
            id,
            owner: self.id,
            options,
            provider: Arc::clone(&self.provider),
            connection: Some(conn),
        })
    }

    /// Executes a statement inside `tx`.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::TransactionNotActive`] when `tx` was begun by
    /// another delegate, [`ConnectorError::ConnectionMissing`] after commit
    /// or rollback, otherwise the statement's own error.
    pub async fn execute(&self, tx: &mut Transaction<P>, sql: &str, params: &[SqlValue]) -> Result<QueryOutput> {
        self.check_owner(tx)?;
        tx.execute(sql, params).await
    }

    pub async fn commit(&self, tx: &mut Transaction<P>) -> Result<()> {
        self.check_owner(tx)?;
        tx.commit().await
    }

    pub async fn rollback(&self, tx: &mut Transaction<P>) -> Result<()> {
        self.check_owner(tx)?;
        tx.rollback().await
    }
}
