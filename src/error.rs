//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant corresponds to one failure class callers can branch on, and the
//! connection-level variants carry a suggestion to help operators recover.

use crate::models::OperationClass;
use thiserror::Error;

/// Maximum number of characters of a statement echoed back in error messages.
const STATEMENT_PREVIEW_CHARS: usize = 80;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Unsupported backend: {backend}")]
    UnsupportedBackend { backend: String },

    #[error("Connection failed: {message}")]
    ConnectionFailure { message: String, suggestion: String },

    #[error("Malformed query: {message}")]
    MalformedQuery { message: String },

    #[error("Statement does not match operation class {expected}: {statement}")]
    StatementKindMismatch { expected: String, statement: String },

    #[error("Columns unavailable: {message}")]
    ColumnsUnavailable { message: String },

    #[error("Failed to decode column '{column}': {message}")]
    RowDecode { column: String, message: String },

    #[error("Backup script is empty")]
    EmptyScript,

    #[error("Batch contains no statements")]
    EmptyBatch,

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an unsupported backend error.
    pub fn unsupported_backend(backend: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            backend: backend.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a malformed query error.
    pub fn malformed_query(message: impl Into<String>) -> Self {
        Self::MalformedQuery {
            message: message.into(),
        }
    }

    /// Create a statement kind mismatch error. Long statements are shortened.
    pub fn statement_kind_mismatch(expected: impl Into<String>, statement: &str) -> Self {
        let statement = match statement.char_indices().nth(STATEMENT_PREVIEW_CHARS) {
            Some((cut, _)) => format!("{}...", &statement[..cut]),
            None => statement.to_string(),
        };
        Self::StatementKindMismatch {
            expected: expected.into(),
            statement,
        }
    }

    /// Create a statement kind mismatch error for a declared operation class.
    pub fn kind_mismatch(expected: OperationClass, statement: &str) -> Self {
        Self::statement_kind_mismatch(expected.to_string(), statement)
    }

    /// Create a columns unavailable error.
    pub fn columns_unavailable(message: impl Into<String>) -> Self {
        Self::ColumnsUnavailable {
            message: message.into(),
        }
    }

    /// Create a row decode error.
    pub fn row_decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RowDecode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailure { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailure { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::row_decode(col.clone(), format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::row_decode(
                index.to_string(),
                format!("Column index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::row_decode(index, source.to_string())
            }
            sqlx::Error::Decode(source) => DbError::row_decode("?", source.to_string()),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert SQL Server driver errors to DbError.
#[cfg(feature = "mssql")]
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TdsError;
        match err {
            TdsError::Server(token) => DbError::database(
                token.message().to_string(),
                Some(token.code().to_string()),
                "Check the SQL syntax and referenced objects",
            ),
            TdsError::Io { message, .. } => DbError::connection(
                format!("I/O error: {}", message),
                "Check network connectivity and database server status",
            ),
            TdsError::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Verify TLS configuration and certificates",
            ),
            TdsError::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            TdsError::Conversion(msg) => DbError::row_decode("?", msg.to_string()),
            other => DbError::internal(format!("SQL Server error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::EmptyBatch.suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::malformed_query("missing :id").is_retryable());
        assert!(!DbError::EmptyScript.is_retryable());
    }

    #[test]
    fn test_statement_preview_is_shortened() {
        let long = format!("SELECT {} FROM t", "x, ".repeat(100));
        let err = DbError::kind_mismatch(OperationClass::Insert, &long);
        match err {
            DbError::StatementKindMismatch {
                expected,
                statement,
            } => {
                assert_eq!(expected, "INSERT");
                assert!(statement.ends_with("..."));
                assert!(statement.chars().count() <= STATEMENT_PREVIEW_CHARS + 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_short_statement_kept_verbatim() {
        let err = DbError::kind_mismatch(OperationClass::Update, "SELECT 1");
        assert!(err.to_string().contains("SELECT 1"));
        assert!(err.to_string().contains("UPDATE"));
    }

    #[test]
    fn test_sqlx_pool_closed_maps_to_connection_failure() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::ConnectionFailure { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_database() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::Database { .. }));
    }
}
