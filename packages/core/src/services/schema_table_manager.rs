//! Schema Table Manager
//!
//! Handles DDL (Data Definition Language) generation for document tables.
//!
//! ## Responsibilities
//!
//! - Generating `CREATE TABLE` for a type's `tab<Type>` table
//! - Mapping field kinds to SQLite column types
//! - Generating `ALTER TABLE ... ADD COLUMN` for fields added since the table
//!   was created (columns are never dropped)
//! - Generating indexes on `parent` and `modified`
//!
//! ## Example Usage
//!
//! ```rust
//! use docspace_core::models::{DocField, DocType, FieldKind};
//! use docspace_core::services::SchemaTableManager;
//!
//! let table_manager = SchemaTableManager::new();
//! let task = DocType::new("Task").with_field(DocField::new("subject", FieldKind::Data));
//!
//! let ddl = table_manager.create_table_statement(&task).unwrap();
//! assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"tabTask\""));
//! ```

use crate::db::{quote_ident, table_name, DatabaseError};
use crate::models::{validate_doctype_name, validate_fieldname, DocType};
use crate::services::DocumentError;
use std::collections::HashSet;

/// Standard column definitions shared by every document table
const STANDARD_COLUMNS: [(&str, &str); 10] = [
    ("name", "TEXT PRIMARY KEY"),
    ("owner", "TEXT"),
    ("creation", "TEXT"),
    ("modified", "TEXT"),
    ("modified_by", "TEXT"),
    ("docstatus", "INTEGER NOT NULL DEFAULT 0"),
    ("parent", "TEXT"),
    ("parenttype", "TEXT"),
    ("parentfield", "TEXT"),
    ("idx", "INTEGER"),
];

/// DDL generator for document tables
///
/// ## Design
///
/// The generator methods are pure. `sync_table` executes them on the caller's
/// connection so table changes commit with the definition change that caused
/// them.
#[derive(Debug, Default, Clone)]
pub struct SchemaTableManager;

impl SchemaTableManager {
    /// Create a new SchemaTableManager
    pub fn new() -> Self {
        Self
    }

    fn validate(schema: &DocType) -> Result<(), DocumentError> {
        validate_doctype_name(&schema.name).map_err(DocumentError::validation)?;
        for field in schema.column_fields() {
            validate_fieldname(&field.fieldname).map_err(DocumentError::validation)?;
        }
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` for a non-single type
    pub fn create_table_statement(&self, schema: &DocType) -> Result<String, DocumentError> {
        Self::validate(schema)?;

        let mut columns: Vec<String> = STANDARD_COLUMNS
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty))
            .collect();

        let standard: HashSet<&str> = STANDARD_COLUMNS.iter().map(|(name, _)| *name).collect();
        for field in schema.column_fields() {
            if standard.contains(field.fieldname.as_str()) {
                continue;
            }
            columns.push(format!(
                "{} {}",
                quote_ident(&field.fieldname),
                field.fieldtype.column_type()
            ));
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(&table_name(&schema.name)),
            columns.join(",\n    ")
        ))
    }

    /// `ALTER TABLE ... ADD COLUMN` for every value field missing from `existing`
    pub fn add_column_statements(
        &self,
        schema: &DocType,
        existing: &HashSet<String>,
    ) -> Result<Vec<String>, DocumentError> {
        Self::validate(schema)?;

        let table = quote_ident(&table_name(&schema.name));
        Ok(schema
            .column_fields()
            .filter(|field| !existing.contains(&field.fieldname))
            .map(|field| {
                format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table,
                    quote_ident(&field.fieldname),
                    field.fieldtype.column_type()
                )
            })
            .collect())
    }

    /// Indexes on `parent` and `modified`
    pub fn index_statements(&self, schema: &DocType) -> Vec<String> {
        let table = table_name(&schema.name);
        ["parent", "modified"]
            .iter()
            .map(|column| {
                format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&format!("idx_{}_{}", table, column)),
                    quote_ident(&table),
                    column
                )
            })
            .collect()
    }

    /// Column names of an existing table (empty if the table does not exist)
    pub async fn existing_columns(
        &self,
        conn: &libsql::Connection,
        doctype: &str,
    ) -> Result<HashSet<String>, DocumentError> {
        let table = table_name(doctype);
        let mut rows = conn
            .query(&format!("PRAGMA table_info({})", quote_ident(&table)), ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to inspect {}: {}", table, e)))?;

        let mut columns = HashSet::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            let name: String = row
                .get(1)
                .map_err(|e| DatabaseError::sql_execution(e.to_string()))?;
            columns.insert(name);
        }
        Ok(columns)
    }

    /// Create or extend the table of a type to match its effective schema
    ///
    /// Single types have no table of their own and are skipped. Returns the
    /// statements that were executed.
    pub async fn sync_table(
        &self,
        conn: &libsql::Connection,
        schema: &DocType,
    ) -> Result<Vec<String>, DocumentError> {
        if schema.is_single {
            return Ok(Vec::new());
        }

        let existing = self.existing_columns(conn, &schema.name).await?;
        let mut statements = Vec::new();
        if existing.is_empty() {
            statements.push(self.create_table_statement(schema)?);
        } else {
            statements.extend(self.add_column_statements(schema, &existing)?);
        }
        statements.extend(self.index_statements(schema));

        for statement in &statements {
            conn.execute(statement, ())
                .await
                .map_err(|e| DatabaseError::sql_execution(format!("{}: {}", statement, e)))?;
        }

        tracing::debug!(
            "Synchronized table for {} ({} statements)",
            schema.name,
            statements.len()
        );
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocField, FieldKind};

    fn invoice() -> DocType {
        DocType::new("Sales Invoice")
            .with_field(DocField::new("customer", FieldKind::Link).with_options("Customer"))
            .with_field(DocField::new("details", FieldKind::SectionBreak))
            .with_field(DocField::new("qty", FieldKind::Int))
            .with_field(DocField::new("grand_total", FieldKind::Currency))
            .with_field(DocField::new("items", FieldKind::Table).with_options("Sales Invoice Item"))
    }

    #[test]
    fn test_create_table_maps_kinds() {
        let ddl = SchemaTableManager::new()
            .create_table_statement(&invoice())
            .unwrap();

        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"tabSales Invoice\""));
        assert!(ddl.contains("\"name\" TEXT PRIMARY KEY"));
        assert!(ddl.contains("\"docstatus\" INTEGER NOT NULL DEFAULT 0"));
        assert!(ddl.contains("\"customer\" TEXT"));
        assert!(ddl.contains("\"qty\" INTEGER"));
        assert!(ddl.contains("\"grand_total\" REAL"));
        assert!(!ddl.contains("\"items\""));
        assert!(!ddl.contains("\"details\""));
    }

    #[test]
    fn test_add_columns_only_for_missing_fields() {
        let existing: HashSet<String> = ["name", "customer", "qty"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let statements = SchemaTableManager::new()
            .add_column_statements(&invoice(), &existing)
            .unwrap();

        assert_eq!(
            statements,
            vec!["ALTER TABLE \"tabSales Invoice\" ADD COLUMN \"grand_total\" REAL".to_string()]
        );
    }

    #[test]
    fn test_invalid_fieldname_rejected() {
        let bad = DocType::new("Task").with_field(DocField::new("Bad Name", FieldKind::Data));
        assert!(SchemaTableManager::new().create_table_statement(&bad).is_err());
    }

    #[test]
    fn test_index_statements() {
        let statements = SchemaTableManager::new().index_statements(&DocType::new("Task"));
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("(parent)"));
        assert!(statements[1].contains("(modified)"));
    }
}
