//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, and query failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Covers all error cases for database connection, initialization,
/// and basic operations. Business-rule failures are handled by the
/// service-layer `DocumentError`.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// A unique or primary key constraint rejected the write
    #[error("Duplicate key: {context}")]
    DuplicateKey { context: String },

    /// The statement referenced a table that does not exist yet
    #[error("Missing table: {table}")]
    MissingTable { table: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Classify a libsql error raised while running a statement on `table`
    ///
    /// Unique/primary key violations and missing tables get their own variants
    /// so callers can translate them; anything else keeps the message as context.
    pub fn from_statement(table: &str, action: &str, err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("UNIQUE constraint failed")
            || message.contains("PRIMARY KEY constraint failed")
        {
            Self::DuplicateKey {
                context: format!("{} on {}: {}", action, table, message),
            }
        } else if message.contains("no such table") {
            Self::MissingTable {
                table: table.to_string(),
            }
        } else {
            Self::sql_execution(format!("Failed to {} on {}: {}", action, table, message))
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    pub fn is_missing_table(&self) -> bool {
        matches!(self, Self::MissingTable { .. })
    }
}
