//! PostgreSQL connection management with connection pooling.
//!
//! [`PgProvider`] wraps SQLx's pool and implements [`ConnectionProvider`].
//! Failures surface as-is; nothing here retries.

use async_trait::async_trait;
use futures::stream::{BoxStream, TryStreamExt};
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{Either, Executor, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::provider::{ConnectionProvider, ProviderConnection, QueryOutput};
use crate::types::{build_arguments, decode_row};
use crate::{ConnectorError, Result, SqlValue};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout: u64,
    /// Maximum lifetime of a connection in seconds.
    pub max_lifetime: Option<u64>,
    /// Idle timeout in seconds.
    pub idle_timeout: Option<u64>,
    /// Number of prepared statements to cache per connection.
    /// Set to 0 to disable caching.
    pub statement_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connect_timeout: 30,
            max_lifetime: Some(1800), // 30 minutes
            idle_timeout: Some(600),  // 10 minutes
            statement_cache_capacity: 100,
        }
    }
}

impl PoolConfig {
    fn pool_options(&self) -> PgPoolOptions {
        let mut pool_options = PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout));

        if let Some(max_lifetime_secs) = self.max_lifetime {
            pool_options = pool_options.max_lifetime(Duration::from_secs(max_lifetime_secs));
        }
        if let Some(idle_timeout_secs) = self.idle_timeout {
            pool_options = pool_options.idle_timeout(Duration::from_secs(idle_timeout_secs));
        }
        pool_options
    }
}

/// Pooled PostgreSQL provider.
#[derive(Clone)]
pub struct PgProvider {
    pool: PgPool,
}

impl std::fmt::Debug for PgProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgProvider")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

impl PgProvider {
    /// Creates a new connection pool and verifies it with a round trip.
    ///
    /// # Errors
    ///
    /// Returns error if the URI is invalid or the server is unreachable.
    #[instrument(skip(uri), fields(
        min_connections = config.min_connections,
        max_connections = config.max_connections
    ))]
    pub async fn connect(uri: &str, config: &PoolConfig) -> Result<Self> {
        if uri.is_empty() {
            return Err(ConnectorError::Connection(
                "Connection URI cannot be empty".to_string(),
            ));
        }

        info!("Initializing connection pool");

        let connect_options = PgConnectOptions::from_str(uri)
            .map_err(|e| ConnectorError::Connection(format!("Invalid connection URI: {}", e)))?
            .statement_cache_capacity(config.statement_cache_capacity);

        let pool = config.pool_options().connect_with(connect_options).await?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| ConnectorError::Connection(format!("Failed to verify connection: {}", e)))?;

        info!("Connection pool initialized successfully");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Pings the database to verify connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Runs one request on `executor` and gathers every result set.
///
/// Without parameters the text goes over the simple protocol, so a
/// `;`-joined batch is accepted.
async fn run<'c, E>(executor: E, sql: &'c str, params: &[SqlValue]) -> Result<QueryOutput>
where
    E: Executor<'c, Database = Postgres>,
{
    debug!(sql = %sql, params = params.len(), "Executing SQL");

    let mut stream: BoxStream<'c, std::result::Result<Either<PgQueryResult, PgRow>, sqlx::Error>> =
        if params.is_empty() {
            executor.fetch_many(sqlx::raw_sql(sql))
        } else {
            let arguments = build_arguments(params)?;
            executor.fetch_many(sqlx::query_with(sql, arguments))
        };

    let mut output = QueryOutput::default();
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => output.rows_affected += done.rows_affected(),
            Either::Right(row) => output.rows.push(decode_row(&row)?),
        }
    }
    Ok(output)
}

/// A pooled connection owned by one caller until released.
pub struct PgPooledConnection {
    conn: PoolConnection<Postgres>,
}

impl std::fmt::Debug for PgPooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPooledConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderConnection for PgPooledConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput> {
        run(&mut *self.conn, sql, params).await
    }
}

#[async_trait]
impl ConnectionProvider for PgProvider {
    type Connection = PgPooledConnection;

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput> {
        run(&self.pool, sql, params).await
    }

    async fn acquire(&self) -> Result<PgPooledConnection> {
        let conn = self.pool.acquire().await?;
        Ok(PgPooledConnection { conn })
    }

    async fn release(&self, conn: PgPooledConnection, discard: bool) -> Result<()> {
        if !discard {
            // Dropping a PoolConnection hands it back to the pool.
            drop(conn);
            return Ok(());
        }

        let raw = conn.conn.detach();
        if let Err(e) = sqlx::Connection::close(raw).await {
            warn!(error = %e, "Failed to close discarded connection");
            return Err(e.into());
        }
        debug!("Discarded connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();

        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.connect_timeout, 30);
        assert_eq!(config.max_lifetime, Some(1800));
        assert_eq!(config.idle_timeout, Some(600));
        assert_eq!(config.statement_cache_capacity, 100);
    }

    #[test]
    fn test_pool_config_partial_json() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"max_connections": 25, "idle_timeout": null}"#).unwrap();

        assert_eq!(config.max_connections, 25);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_lifetime, Some(1800));
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_uri() {
        let err = PgProvider::connect("", &PoolConfig::default()).await.unwrap_err();
        assert_eq!(
            err,
            ConnectorError::Connection("Connection URI cannot be empty".to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_uri() {
        let err = PgProvider::connect("not a uri", &PoolConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Connection(_)));
    }
}
