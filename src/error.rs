//! Error types for the database wrappers.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Two conditions are recoverable and are handled locally by the wrappers:
//! [`DbError::AlreadyClosed`] (swallowed by `close`) and
//! [`DbError::ExclusiveAccessDenied`] (swallowed by Access compaction).
//! Everything else propagates unchanged to the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Connection already closed: {message}")]
    AlreadyClosed { message: String },

    #[error("Database file already exists: {}", path.display())]
    FileAlreadyExists { path: PathBuf },

    #[error("Could not gain exclusive access to {}", path.display())]
    ExclusiveAccessDenied { path: PathBuf },

    #[error("Automation error: {message}")]
    Automation {
        message: String,
        /// COM HRESULT reported by the automation host, when available
        hresult: Option<i64>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
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

    pub fn already_closed(message: impl Into<String>) -> Self {
        Self::AlreadyClosed {
            message: message.into(),
        }
    }

    pub fn file_already_exists(path: impl Into<PathBuf>) -> Self {
        Self::FileAlreadyExists { path: path.into() }
    }

    pub fn exclusive_access_denied(path: impl Into<PathBuf>) -> Self {
        Self::ExclusiveAccessDenied { path: path.into() }
    }

    /// Create an automation error, optionally carrying the COM HRESULT.
    pub fn automation(message: impl Into<String>, hresult: Option<i64>) -> Self {
        Self::Automation {
            message: message.into(),
            hresult,
        }
    }

    /// Create a timeout error for a wait bounded by `limit`.
    ///
    /// Limits beyond `u32::MAX` seconds saturate.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs: u32::try_from(limit.as_secs()).unwrap_or(u32::MAX),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
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
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::FileAlreadyExists { .. } => {
                Some("Pass delete_if_exists = true to replace the existing file")
            }
            _ => None,
        }
    }

    /// Get the SQLSTATE reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check whether this error is one of the conditions the wrappers recover from locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyClosed { .. } | Self::ExclusiveAccessDenied { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection parameters and credentials",
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
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the selected column names",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert ODBC driver manager errors to DbError.
impl From<odbc_api::Error> for DbError {
    fn from(err: odbc_api::Error) -> Self {
        let message = err.to_string();
        match err {
            odbc_api::Error::Diagnostics { record, .. } => {
                let state = record.state.as_str().to_string();
                if state.starts_with("08") {
                    DbError::connection(message, "Check the DSN, driver name and credentials")
                } else {
                    DbError::database(
                        message,
                        Some(state),
                        "Check the SQL syntax and referenced objects",
                    )
                }
            }
            _ => DbError::connection(message, "Check that the ODBC driver is installed"),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
