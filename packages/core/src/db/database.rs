//! Database Connection Management
//!
//! This module provides the core database connection and initialization
//! functionality using libsql for DocSpace's metadata-driven tables.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **Meta tables**: Type definitions, customizations, singles and series
//!   live in fixed tables created here; per-type document tables are created
//!   by the schema service from effective schemas
//! - **WAL mode**: Write-Ahead Logging so readers never block the writer
//! - **Write transactions**: `BEGIN IMMEDIATE` takes the write lock up front,
//!   standing in for `SELECT ... FOR UPDATE` (which SQLite lacks)
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions** so concurrent
//! writers wait on the busy timeout instead of failing with `SQLITE_BUSY`.
//!
//! ```no_run
//! # use docspace_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/docspace.db")).await?;
//! let conn = db_service.begin_write().await?;
//! // ... statements covered by the write lock ...
//! DatabaseService::commit(&conn).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DocStoreConfig;
use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Table holding base type definitions
pub const DOCTYPE_TABLE: &str = "tabDocType";
/// Table holding base field definitions
pub const DOCFIELD_TABLE: &str = "tabDocField";
/// Table holding user-added fields
pub const CUSTOM_FIELD_TABLE: &str = "tabCustom Field";
/// Table holding property overrides
pub const PROPERTY_SETTER_TABLE: &str = "tabProperty Setter";
/// Key/value table for single-instance types
pub const SINGLES_TABLE: &str = "tabSingles";
/// Named counters used by the naming engine
pub const SERIES_TABLE: &str = "tabSeries";

/// Columns shared by `tabDocField` and `tabCustom Field`
const FIELD_COLUMNS: &str = "fieldname TEXT NOT NULL,
    label TEXT NOT NULL DEFAULT '',
    fieldtype TEXT NOT NULL,
    options TEXT,
    reqd INTEGER NOT NULL DEFAULT 0,
    permlevel INTEGER NOT NULL DEFAULT 0,
    idx INTEGER NOT NULL DEFAULT 0,
    insert_after TEXT,
    default_value TEXT,
    hidden INTEGER NOT NULL DEFAULT 0,
    read_only INTEGER NOT NULL DEFAULT 0,
    allow_on_submit INTEGER NOT NULL DEFAULT 0";

/// Database service for managing the libsql connection and meta tables
///
/// # Examples
///
/// ```no_run
/// use docspace_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/docspace.db");
///     let db_service = DatabaseService::new(db_path).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
}

/// Quote an identifier for use in SQL (`tabSales Invoice` -> `"tabSales Invoice"`)
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Deterministic table name of a non-single type
pub fn table_name(doctype: &str) -> String {
    format!("tab{}", doctype)
}

impl DatabaseService {
    /// Create a new DatabaseService with default configuration
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the meta tables (CREATE TABLE IF NOT EXISTS)
    /// 4. Enable WAL mode and the busy timeout
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_config(db_path, &DocStoreConfig::default()).await
    }

    /// Create a new DatabaseService using the given configuration
    pub async fn with_config(
        db_path: PathBuf,
        config: &DocStoreConfig,
    ) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms: config.busy_timeout_ms,
        };

        service.initialize_schema().await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize the meta tables
    ///
    /// Idempotent: safe to call on every start.
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name TEXT PRIMARY KEY,
                    autoname TEXT,
                    is_single INTEGER NOT NULL DEFAULT 0,
                    is_submittable INTEGER NOT NULL DEFAULT 0,
                    is_child_table INTEGER NOT NULL DEFAULT 0,
                    name_case TEXT NOT NULL DEFAULT 'as_is',
                    title_field TEXT,
                    version INTEGER NOT NULL DEFAULT 0,
                    modified TEXT
                )",
                quote_ident(DOCTYPE_TABLE)
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    parent TEXT NOT NULL,
                    {},
                    PRIMARY KEY (parent, fieldname)
                )",
                quote_ident(DOCFIELD_TABLE),
                FIELD_COLUMNS
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name TEXT PRIMARY KEY,
                    dt TEXT NOT NULL,
                    {},
                    UNIQUE (dt, fieldname)
                )",
                quote_ident(CUSTOM_FIELD_TABLE),
                FIELD_COLUMNS
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    doc_type TEXT NOT NULL,
                    field_name TEXT,
                    property TEXT NOT NULL,
                    value TEXT NOT NULL,
                    modified TEXT
                )",
                quote_ident(PROPERTY_SETTER_TABLE)
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_property_setter_key
                 ON {} (doc_type, IFNULL(field_name, ''), property)",
                quote_ident(PROPERTY_SETTER_TABLE)
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    doctype TEXT NOT NULL,
                    field TEXT NOT NULL,
                    value TEXT,
                    PRIMARY KEY (doctype, field)
                )",
                quote_ident(SINGLES_TABLE)
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name TEXT PRIMARY KEY,
                    current INTEGER NOT NULL DEFAULT 0
                )",
                quote_ident(SERIES_TABLE)
            ),
        ];

        for statement in statements.iter() {
            conn.execute(statement, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("{}: {}", statement, e))
            })?;
        }

        tracing::debug!("Initialized meta tables at {:?}", self.db_path);

        Ok(())
    }

    /// Get a raw connection to the database
    ///
    /// Prefer `connect_with_timeout()` in async code.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout configured
    ///
    /// Sets the configured busy timeout so concurrent writers wait and retry
    /// instead of failing immediately when the database is locked.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .await?;

        Ok(conn)
    }

    /// Open a connection and start a write transaction on it
    ///
    /// `BEGIN IMMEDIATE` acquires the database write lock before any read, so
    /// reads made inside the transaction cannot be invalidated by another
    /// writer until `commit` or `rollback`.
    pub async fn begin_write(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e)))?;
        Ok(conn)
    }

    /// Commit the transaction started by `begin_write`
    pub async fn commit(conn: &libsql::Connection) -> Result<(), DatabaseError> {
        conn.execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to commit: {}", e)))?;
        Ok(())
    }

    /// Roll back the transaction started by `begin_write`
    ///
    /// Failures are logged, not returned: the caller is already propagating
    /// the error that caused the rollback, and SQLite discards an unfinished
    /// transaction when the connection closes.
    pub async fn rollback(conn: &libsql::Connection) {
        if let Err(e) = conn.execute("ROLLBACK", ()).await {
            tracing::warn!("Rollback failed: {}", e);
        }
    }

    /// Commit on `Ok`, roll back on `Err`, and hand the result back
    pub async fn finish<T, E>(conn: &libsql::Connection, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        match result {
            Ok(value) => {
                Self::commit(conn).await?;
                Ok(value)
            }
            Err(e) => {
                Self::rollback(conn).await;
                Err(e)
            }
        }
    }

    /// Check whether a table exists
    pub async fn table_exists(
        conn: &libsql::Connection,
        table: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to inspect tables: {}", e)))?;

        Ok(rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path.clone()).await.unwrap();

        assert_eq!(db_service.db_path, db_path);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_meta_tables_created() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        for table in [
            DOCTYPE_TABLE,
            DOCFIELD_TABLE,
            CUSTOM_FIELD_TABLE,
            PROPERTY_SETTER_TABLE,
            SINGLES_TABLE,
            SERIES_TABLE,
        ] {
            assert!(
                DatabaseService::table_exists(&conn, table).await.unwrap(),
                "missing {}",
                table
            );
        }
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect().unwrap();

        let mut stmt = conn.prepare("PRAGMA journal_mode").await.unwrap();
        let mut rows = stmt.query(()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let mode: String = row.get(0).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let _db_service = DatabaseService::new(nested_path.clone()).await.unwrap();

        assert!(nested_path.exists());
    }

    #[tokio::test]
    async fn test_idempotent_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _first = DatabaseService::new(db_path.clone()).await.unwrap();
        let second = DatabaseService::new(db_path).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let conn = db_service.begin_write().await.unwrap();
        conn.execute(
            "INSERT INTO tabSeries (name, current) VALUES ('X', 5)",
            (),
        )
        .await
        .unwrap();
        DatabaseService::rollback(&conn).await;

        let conn = db_service.connect_with_timeout().await.unwrap();
        let mut rows = conn
            .query("SELECT current FROM tabSeries WHERE name = 'X'", ())
            .await
            .unwrap();
        assert!(rows.next().await.unwrap().is_none());
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(table_name("Sales Invoice"), "tabSales Invoice");
        assert_eq!(quote_ident("tabSales Invoice"), "\"tabSales Invoice\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
