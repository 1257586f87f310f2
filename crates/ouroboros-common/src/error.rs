//! Error types for the PostgreSQL connector

use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// SQLSTATE raised by `CREATE SCHEMA` when the schema already exists.
pub const DUPLICATE_SCHEMA: &str = "42P06";

/// Unified error type for all connector operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectorError {
    /// Pool exhaustion, network failure, invalid connection URI
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement rejected by the server. `code` is the SQLSTATE when known.
    #[error("Database error: {message}")]
    Database {
        code: Option<String>,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Malformed filter, order or value handed to the SQL compiler
    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Index shorthand that cannot be normalized
    #[error("Invalid index definition: {0}")]
    InvalidIndex(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The transaction handle no longer owns a connection
    #[error("Connection does not exist")]
    ConnectionMissing,

    /// The pinned connection belongs to another (or no) transaction
    #[error("Transaction is not active")]
    TransactionNotActive,

    #[error("Internal error: {0}")]
    Internal(String),

    /// Unique constraint violation (SQLSTATE 23505)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Foreign key constraint violation (SQLSTATE 23503)
    #[error("Foreign key constraint violation: {0}")]
    ForeignKey(String),

    /// Deadlock detected (SQLSTATE 40P01)
    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transient error: {0}")]
    Transient(String),
}

impl ConnectorError {
    /// Builds a statement error carrying a SQLSTATE.
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        ConnectorError::Database {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Returns the SQLSTATE of a statement error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            ConnectorError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns true if this error is potentially retryable by the caller.
    ///
    /// The connector itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Deadlock(_) | ConnectorError::Timeout(_) | ConnectorError::Transient(_)
        )
    }

    /// Returns true if this is a constraint violation error
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            ConnectorError::Conflict(_) | ConnectorError::ForeignKey(_)
        )
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization(err.to_string())
    }
}

// PostgreSQL-specific error conversions (when postgres-errors feature is enabled)
#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for ConnectorError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => ConnectorError::Connection(err.to_string()),
            Error::Database(db_err) => {
                // See: https://www.postgresql.org/docs/current/errcodes-appendix.html
                let code = db_err.code().map(|c| c.to_string());
                if let Some(code_str) = code.as_deref() {
                    match code_str {
                        "23505" | "23P01" => return ConnectorError::Conflict(err.to_string()),
                        "23503" => return ConnectorError::ForeignKey(err.to_string()),
                        "23502" | "23514" => return ConnectorError::Validation(err.to_string()),
                        "40P01" => return ConnectorError::Deadlock(err.to_string()),
                        c if c.starts_with("40") => {
                            return ConnectorError::Transient(err.to_string())
                        }
                        c if c.starts_with("08") => {
                            return ConnectorError::Connection(err.to_string())
                        }
                        "57P01" | "57P02" | "57P03" => {
                            return ConnectorError::Transient(err.to_string())
                        }
                        _ => {}
                    }
                }
                ConnectorError::Database {
                    code,
                    message: db_err.message().to_string(),
                }
            }
            Error::Io(_) | Error::Tls(_) | Error::Protocol(_) => {
                ConnectorError::Connection(err.to_string())
            }
            Error::RowNotFound => ConnectorError::Query("Row not found".to_string()),
            Error::TypeNotFound { .. } => ConnectorError::Deserialization(err.to_string()),
            Error::ColumnIndexOutOfBounds { .. } | Error::ColumnNotFound(_) => {
                ConnectorError::Query(err.to_string())
            }
            Error::ColumnDecode { .. } | Error::Decode(_) => {
                ConnectorError::Deserialization(err.to_string())
            }
            Error::PoolTimedOut => ConnectorError::Timeout("Connection pool timed out".to_string()),
            Error::PoolClosed => ConnectorError::Connection("Connection pool closed".to_string()),
            Error::WorkerCrashed => ConnectorError::Internal("Worker thread crashed".to_string()),
            _ => ConnectorError::Database {
                code: None,
                message: err.to_string(),
            },
        }
    }
}
