//! Named Counters
//!
//! A series is a `(name, current)` row in `tabSeries`. It is created on first
//! use and incremented with a single upsert, so two writers can never observe
//! the same value. Callers run these inside the `BEGIN IMMEDIATE` transaction
//! of the document being named; a rolled back insert gives its number back.

use crate::db::database::{quote_ident, SERIES_TABLE};
use crate::db::error::DatabaseError;

/// Increment the series `key` and return the new value (first use returns 1)
pub async fn next_value(conn: &libsql::Connection, key: &str) -> Result<i64, DatabaseError> {
    let sql = format!(
        "INSERT INTO {} (name, current) VALUES (?, 1)
         ON CONFLICT(name) DO UPDATE SET current = current + 1
         RETURNING current",
        quote_ident(SERIES_TABLE)
    );

    let mut rows = conn
        .query(&sql, [key])
        .await
        .map_err(|e| DatabaseError::from_statement(SERIES_TABLE, "increment", e))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to read series '{}': {}", key, e)))?
        .ok_or_else(|| DatabaseError::sql_execution(format!("Series '{}' returned no value", key)))?;

    let current: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::sql_execution(format!("Invalid series value: {}", e)))?;

    tracing::debug!("Series '{}' advanced to {}", key, current);
    Ok(current)
}

/// Current value of a series, `None` if it was never used
pub async fn current_value(
    conn: &libsql::Connection,
    key: &str,
) -> Result<Option<i64>, DatabaseError> {
    let sql = format!(
        "SELECT current FROM {} WHERE name = ?",
        quote_ident(SERIES_TABLE)
    );

    let mut rows = conn
        .query(&sql, [key])
        .await
        .map_err(|e| DatabaseError::from_statement(SERIES_TABLE, "select", e))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
    {
        Some(row) => Ok(Some(row.get(0).map_err(|e| {
            DatabaseError::sql_execution(format!("Invalid series value: {}", e))
        })?)),
        None => Ok(None),
    }
}

/// Reset a series so the next generated value is `value + 1`
pub async fn set_value(
    conn: &libsql::Connection,
    key: &str,
    value: i64,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "INSERT INTO {} (name, current) VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET current = excluded.current",
        quote_ident(SERIES_TABLE)
    );

    conn.execute(&sql, libsql::params![key, value])
        .await
        .map_err(|e| DatabaseError::from_statement(SERIES_TABLE, "reset", e))?;

    tracing::info!("Series '{}' reset to {}", key, value);
    Ok(())
}
