//! Execution seams.
//!
//! The compiler and the synchronizer never talk to sqlx directly; they go
//! through [`ConnectionProvider`], which [`crate::PgProvider`] implements over
//! a sqlx pool and tests implement in memory.

use async_trait::async_trait;

use crate::{ParameterizedFragment, Result, Row, SqlValue};

/// Outcome of one `execute` call.
///
/// For multi-statement batches `rows` holds the rows of every statement in
/// order and `rows_affected` is the sum over all statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows, rows_affected: 0 }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self { rows: Vec::new(), rows_affected }
    }
}

/// A connection checked out of the provider's pool.
#[async_trait]
pub trait ProviderConnection: Send {
    /// Executes `sql` with positional `$n` parameters on this connection.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput>;
}

/// Source of connections and one-shot statement execution.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    type Connection: ProviderConnection + 'static;

    /// Executes `sql` on any pooled connection.
    ///
    /// With an empty parameter list `sql` may hold several `;`-separated
    /// statements; they are sent as one request and stop at the first failure.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput>;

    /// Checks a connection out of the pool.
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Returns a connection to the pool, or closes it when `discard` is set.
    async fn release(&self, conn: Self::Connection, discard: bool) -> Result<()>;

    /// Executes a compiled fragment.
    async fn execute_fragment(&self, fragment: &ParameterizedFragment) -> Result<QueryOutput> {
        self.execute(fragment.sql(), fragment.params()).await
    }
}
