//! Document Row Persistence
//!
//! Row-level SQL for documents. Multi-row types live in `tab<Type>` with the
//! standard columns followed by one column per value field of the effective
//! schema. Single types live in `tabSingles` as `(doctype, field, value)` rows.
//!
//! Nothing here opens a transaction, runs naming, or checks business rules:
//! callers pass the connection of the write transaction they hold and get raw
//! outcomes back (rows affected, `DuplicateKey`, `MissingTable`).

use crate::db::database::{quote_ident, table_name, SINGLES_TABLE};
use crate::db::error::DatabaseError;
use crate::models::{
    format_datetime, parse_datetime, DocStatus, DocType, Document, Value, STANDARD_FIELDS,
};
use chrono::NaiveDateTime;

/// Concurrency snapshot of a stored row
#[derive(Debug, Clone, PartialEq)]
pub struct LockState {
    pub modified: Option<NaiveDateTime>,
    pub docstatus: DocStatus,
}

/// A row referencing a document through a Link field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Type holding the Link field (for child rows, the child type)
    pub doctype: String,
    pub name: String,
    pub field: String,
    /// Top-level record owning the row (`parenttype`/`parent` for child rows)
    pub owner_doctype: String,
    pub owner_name: String,
}

fn read_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::sql_execution(format!("Failed to read row: {}", e))
}

fn raw_text(raw: libsql::Value) -> Option<String> {
    match Value::from_sql(raw) {
        Value::Null => None,
        other => other.to_text(),
    }
}

fn raw_int(raw: libsql::Value) -> Option<i64> {
    Value::from_sql(raw).as_i64()
}

fn text_param(value: &Option<String>) -> libsql::Value {
    value
        .as_ref()
        .map(|s| libsql::Value::Text(s.clone()))
        .unwrap_or(libsql::Value::Null)
}

fn datetime_param(value: &Option<NaiveDateTime>) -> libsql::Value {
    value
        .as_ref()
        .map(|dt| libsql::Value::Text(format_datetime(dt)))
        .unwrap_or(libsql::Value::Null)
}

fn standard_params(doc: &Document) -> Vec<libsql::Value> {
    vec![
        text_param(&doc.name),
        text_param(&doc.owner),
        datetime_param(&doc.creation),
        datetime_param(&doc.modified),
        text_param(&doc.modified_by),
        libsql::Value::Integer(doc.docstatus.as_i64()),
        text_param(&doc.parent),
        text_param(&doc.parenttype),
        text_param(&doc.parentfield),
        doc.idx
            .map(libsql::Value::Integer)
            .unwrap_or(libsql::Value::Null),
    ]
}

/// Columns written for a document of this schema, standard columns first
fn column_list(schema: &DocType) -> Vec<String> {
    STANDARD_FIELDS
        .iter()
        .map(|c| c.to_string())
        .chain(schema.column_fields().map(|f| f.fieldname.clone()))
        .collect()
}

fn quoted_columns(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keys of the value bag that are not columns of the schema
pub fn unknown_fields(schema: &DocType, doc: &Document) -> Vec<String> {
    doc.fields
        .keys()
        .filter(|key| !schema.column_fields().any(|f| &f.fieldname == *key))
        .cloned()
        .collect()
}

/// Whether `field` names a standard column or a value field of the schema
pub fn is_column(schema: &DocType, field: &str) -> bool {
    STANDARD_FIELDS.contains(&field) || schema.column_fields().any(|f| f.fieldname == field)
}

fn document_from_row(schema: &DocType, row: &libsql::Row) -> Result<Document, DatabaseError> {
    let name = raw_text(row.get_value(0).map_err(read_err)?).unwrap_or_default();
    let mut doc = Document::persisted(schema.name.clone(), name);

    doc.owner = raw_text(row.get_value(1).map_err(read_err)?);
    doc.creation = raw_text(row.get_value(2).map_err(read_err)?).and_then(|s| parse_datetime(&s));
    doc.modified = raw_text(row.get_value(3).map_err(read_err)?).and_then(|s| parse_datetime(&s));
    doc.modified_by = raw_text(row.get_value(4).map_err(read_err)?);
    doc.docstatus = raw_int(row.get_value(5).map_err(read_err)?)
        .map(DocStatus::try_from)
        .transpose()
        .map_err(DatabaseError::sql_execution)?
        .unwrap_or_default();
    doc.parent = raw_text(row.get_value(6).map_err(read_err)?);
    doc.parenttype = raw_text(row.get_value(7).map_err(read_err)?);
    doc.parentfield = raw_text(row.get_value(8).map_err(read_err)?);
    doc.idx = raw_int(row.get_value(9).map_err(read_err)?);

    for (offset, field) in schema.column_fields().enumerate() {
        let raw = row
            .get_value((STANDARD_FIELDS.len() + offset) as i32)
            .map_err(read_err)?;
        doc.fields.insert(
            field.fieldname.clone(),
            Value::from_sql(raw).coerce(field.fieldtype),
        );
    }

    Ok(doc)
}

/// Load one row of a multi-row type
pub async fn load_row(
    conn: &libsql::Connection,
    schema: &DocType,
    name: &str,
) -> Result<Option<Document>, DatabaseError> {
    let table = table_name(&schema.name);
    let sql = format!(
        "SELECT {} FROM {} WHERE name = ?",
        quoted_columns(&column_list(schema)),
        quote_ident(&table)
    );

    let mut rows = conn
        .query(&sql, [name])
        .await
        .map_err(|e| DatabaseError::from_statement(&table, "select", e))?;

    match rows.next().await.map_err(read_err)? {
        Some(row) => Ok(Some(document_from_row(schema, &row)?)),
        None => Ok(None),
    }
}

/// Rebuild a single-type document from `tabSingles`
///
/// Returns `None` when the type has never been saved.
pub async fn load_single(
    conn: &libsql::Connection,
    schema: &DocType,
) -> Result<Option<Document>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT field, value FROM {} WHERE doctype = ?",
                quote_ident(SINGLES_TABLE)
            ),
            [schema.name.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(SINGLES_TABLE, "select", e))?;

    let mut doc = Document::persisted(schema.name.clone(), schema.name.clone());
    let mut found = false;

    while let Some(row) = rows.next().await.map_err(read_err)? {
        found = true;
        let field: String = row.get(0).map_err(read_err)?;
        let value = raw_text(row.get_value(1).map_err(read_err)?);

        match field.as_str() {
            "owner" => doc.owner = value,
            "creation" => doc.creation = value.and_then(|s| parse_datetime(&s)),
            "modified" => doc.modified = value.and_then(|s| parse_datetime(&s)),
            "modified_by" => doc.modified_by = value,
            "docstatus" => {
                doc.docstatus = value
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(DocStatus::try_from)
                    .transpose()
                    .map_err(DatabaseError::sql_execution)?
                    .unwrap_or_default()
            }
            _ => {
                if let Some(def) = schema.field(&field).filter(|f| f.fieldtype.has_column()) {
                    doc.fields
                        .insert(field.clone(), Value::from(value).coerce(def.fieldtype));
                }
            }
        }
    }

    if !found {
        return Ok(None);
    }

    for field in schema.column_fields() {
        doc.fields
            .entry(field.fieldname.clone())
            .or_insert(Value::Null);
    }

    Ok(Some(doc))
}

/// Insert a row; an existing name yields `DuplicateKey`
pub async fn insert_row(
    conn: &libsql::Connection,
    schema: &DocType,
    doc: &Document,
) -> Result<(), DatabaseError> {
    let table = table_name(&schema.name);
    let columns = column_list(schema);
    let placeholders = vec!["?"; columns.len()].join(", ");

    let mut params = standard_params(doc);
    params.extend(
        schema
            .column_fields()
            .map(|f| doc.get(&f.fieldname).map(Value::to_sql).unwrap_or(libsql::Value::Null)),
    );

    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table),
            quoted_columns(&columns),
            placeholders
        ),
        libsql::params_from_iter(params),
    )
    .await
    .map_err(|e| DatabaseError::from_statement(&table, "insert", e))?;

    tracing::debug!("Inserted {} '{}'", schema.name, doc.display_name());
    Ok(())
}

/// Full-row update by name, returning the number of rows changed
///
/// Child rows only match under their own parent, so a row of another parent
/// sharing the name is never overwritten.
pub async fn update_row(
    conn: &libsql::Connection,
    schema: &DocType,
    doc: &Document,
) -> Result<u64, DatabaseError> {
    let table = table_name(&schema.name);
    let columns = column_list(schema);
    let assignments = columns
        .iter()
        .skip(1)
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut params: Vec<libsql::Value> = standard_params(doc).into_iter().skip(1).collect();
    params.extend(
        schema
            .column_fields()
            .map(|f| doc.get(&f.fieldname).map(Value::to_sql).unwrap_or(libsql::Value::Null)),
    );
    params.push(text_param(&doc.name));

    let mut filter = "name = ?".to_string();
    if schema.is_child_table {
        filter.push_str(" AND parent IS ? AND parenttype IS ?");
        params.push(text_param(&doc.parent));
        params.push(text_param(&doc.parenttype));
    }

    let affected = conn
        .execute(
            &format!(
                "UPDATE {} SET {} WHERE {}",
                quote_ident(&table),
                assignments,
                filter
            ),
            libsql::params_from_iter(params),
        )
        .await
        .map_err(|e| DatabaseError::from_statement(&table, "update", e))?;

    tracing::debug!("Updated {} '{}' ({} rows)", schema.name, doc.display_name(), affected);
    Ok(affected)
}

/// Replace every `tabSingles` row of a single type
pub async fn write_single(
    conn: &libsql::Connection,
    schema: &DocType,
    doc: &Document,
) -> Result<(), DatabaseError> {
    delete_single(conn, &schema.name).await?;

    let insert = format!(
        "INSERT INTO {} (doctype, field, value) VALUES (?, ?, ?)",
        quote_ident(SINGLES_TABLE)
    );

    let mut entries: Vec<(String, libsql::Value)> = vec![
        ("owner".to_string(), text_param(&doc.owner)),
        ("creation".to_string(), datetime_param(&doc.creation)),
        ("modified".to_string(), datetime_param(&doc.modified)),
        ("modified_by".to_string(), text_param(&doc.modified_by)),
        (
            "docstatus".to_string(),
            libsql::Value::Text(doc.docstatus.as_i64().to_string()),
        ),
    ];
    for field in schema.column_fields() {
        let value = doc
            .get(&field.fieldname)
            .and_then(Value::to_text)
            .map(libsql::Value::Text)
            .unwrap_or(libsql::Value::Null);
        entries.push((field.fieldname.clone(), value));
    }

    for (field, value) in entries {
        conn.execute(
            &insert,
            libsql::params_from_iter(vec![
                libsql::Value::Text(schema.name.clone()),
                libsql::Value::Text(field),
                value,
            ]),
        )
        .await
        .map_err(|e| DatabaseError::from_statement(SINGLES_TABLE, "insert", e))?;
    }

    tracing::debug!("Wrote single {}", schema.name);
    Ok(())
}

pub async fn delete_single(conn: &libsql::Connection, doctype: &str) -> Result<u64, DatabaseError> {
    conn.execute(
        &format!("DELETE FROM {} WHERE doctype = ?", quote_ident(SINGLES_TABLE)),
        [doctype],
    )
    .await
    .map_err(|e| DatabaseError::from_statement(SINGLES_TABLE, "delete", e))
}

/// Delete one row, returning the number of rows removed
pub async fn delete_row(
    conn: &libsql::Connection,
    doctype: &str,
    name: &str,
) -> Result<u64, DatabaseError> {
    let table = table_name(doctype);
    conn.execute(
        &format!("DELETE FROM {} WHERE name = ?", quote_ident(&table)),
        [name],
    )
    .await
    .map_err(|e| DatabaseError::from_statement(&table, "delete", e))
}

/// Read `modified` and `docstatus` of a stored document
///
/// Inside a `BEGIN IMMEDIATE` transaction the result cannot go stale before
/// commit.
pub async fn lock_state(
    conn: &libsql::Connection,
    schema: &DocType,
    name: &str,
) -> Result<Option<LockState>, DatabaseError> {
    if schema.is_single {
        return Ok(load_single(conn, schema).await?.map(|doc| LockState {
            modified: doc.modified,
            docstatus: doc.docstatus,
        }));
    }

    let table = table_name(&schema.name);
    let mut rows = conn
        .query(
            &format!(
                "SELECT modified, docstatus FROM {} WHERE name = ?",
                quote_ident(&table)
            ),
            [name],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(&table, "select", e))?;

    let Some(row) = rows.next().await.map_err(read_err)? else {
        return Ok(None);
    };

    let modified = raw_text(row.get_value(0).map_err(read_err)?).and_then(|s| parse_datetime(&s));
    let docstatus = DocStatus::try_from(raw_int(row.get_value(1).map_err(read_err)?).unwrap_or(0))
        .map_err(DatabaseError::sql_execution)?;

    Ok(Some(LockState {
        modified,
        docstatus,
    }))
}

/// Whether a row with this name exists; a missing table counts as no rows
pub async fn exists(
    conn: &libsql::Connection,
    doctype: &str,
    name: &str,
) -> Result<bool, DatabaseError> {
    let table = table_name(doctype);
    let result = conn
        .query(
            &format!("SELECT 1 FROM {} WHERE name = ? LIMIT 1", quote_ident(&table)),
            [name],
        )
        .await;

    let mut rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            let err = DatabaseError::from_statement(&table, "select", e);
            if err.is_missing_table() {
                return Ok(false);
            }
            return Err(err);
        }
    };

    Ok(rows.next().await.map_err(read_err)?.is_some())
}

/// Read one column of one row; `None` when the row does not exist
pub async fn get_value(
    conn: &libsql::Connection,
    schema: &DocType,
    name: &str,
    field: &str,
) -> Result<Option<Value>, DatabaseError> {
    let table = table_name(&schema.name);
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM {} WHERE name = ?",
                quote_ident(field),
                quote_ident(&table)
            ),
            [name],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(&table, "select", e))?;

    let Some(row) = rows.next().await.map_err(read_err)? else {
        return Ok(None);
    };

    let value = Value::from_sql(row.get_value(0).map_err(read_err)?);
    Ok(Some(match schema.field(field) {
        Some(def) => value.coerce(def.fieldtype),
        None => value,
    }))
}

/// Upsert one `tabSingles` value
pub async fn set_single_field(
    conn: &libsql::Connection,
    doctype: &str,
    field: &str,
    value: &Value,
) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO {} (doctype, field, value) VALUES (?, ?, ?)
             ON CONFLICT(doctype, field) DO UPDATE SET value = excluded.value",
            quote_ident(SINGLES_TABLE)
        ),
        libsql::params_from_iter(vec![
            libsql::Value::Text(doctype.to_string()),
            libsql::Value::Text(field.to_string()),
            value
                .to_text()
                .map(libsql::Value::Text)
                .unwrap_or(libsql::Value::Null),
        ]),
    )
    .await
    .map_err(|e| DatabaseError::from_statement(SINGLES_TABLE, "upsert", e))?;
    Ok(())
}

/// Child rows of one Table field ordered by `idx`; a missing table yields none
pub async fn load_children(
    conn: &libsql::Connection,
    child_schema: &DocType,
    parenttype: &str,
    parent: &str,
    parentfield: &str,
) -> Result<Vec<Document>, DatabaseError> {
    let table = table_name(&child_schema.name);
    let result = conn
        .query(
            &format!(
                "SELECT {} FROM {} WHERE parent = ? AND parenttype = ? AND parentfield = ?
                 ORDER BY idx",
                quoted_columns(&column_list(child_schema)),
                quote_ident(&table)
            ),
            [parent, parenttype, parentfield],
        )
        .await;

    let mut rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            let err = DatabaseError::from_statement(&table, "select", e);
            if err.is_missing_table() {
                tracing::warn!("Child table {} missing; treating as empty", table);
                return Ok(Vec::new());
            }
            return Err(err);
        }
    };

    let mut children = Vec::new();
    while let Some(row) = rows.next().await.map_err(read_err)? {
        children.push(document_from_row(child_schema, &row)?);
    }
    Ok(children)
}

/// Delete child rows of one Table field whose names are not in `keep`
///
/// Returns the number of rows removed; a missing table removes nothing.
pub async fn delete_children_except(
    conn: &libsql::Connection,
    child_type: &str,
    parenttype: &str,
    parent: &str,
    parentfield: &str,
    keep: &[String],
) -> Result<u64, DatabaseError> {
    let table = table_name(child_type);
    let mut sql = format!(
        "DELETE FROM {} WHERE parent = ? AND parenttype = ? AND parentfield = ?",
        quote_ident(&table)
    );
    if !keep.is_empty() {
        sql.push_str(&format!(
            " AND name NOT IN ({})",
            vec!["?"; keep.len()].join(", ")
        ));
    }

    let mut params = vec![
        libsql::Value::Text(parent.to_string()),
        libsql::Value::Text(parenttype.to_string()),
        libsql::Value::Text(parentfield.to_string()),
    ];
    params.extend(keep.iter().map(|n| libsql::Value::Text(n.clone())));

    match conn.execute(&sql, libsql::params_from_iter(params)).await {
        Ok(affected) => Ok(affected),
        Err(e) => {
            let err = DatabaseError::from_statement(&table, "delete", e);
            if err.is_missing_table() {
                tracing::warn!("Child table {} missing; nothing to delete", table);
                Ok(0)
            } else {
                Err(err)
            }
        }
    }
}

/// Non-cancelled rows of `doctype` whose `field` equals `value`
///
/// A missing table yields no references.
pub async fn find_references(
    conn: &libsql::Connection,
    doctype: &str,
    field: &str,
    value: &str,
) -> Result<Vec<Reference>, DatabaseError> {
    let table = table_name(doctype);
    let result = conn
        .query(
            &format!(
                "SELECT name, parenttype, parent FROM {} WHERE {} = ? AND docstatus < 2",
                quote_ident(&table),
                quote_ident(field)
            ),
            [value],
        )
        .await;

    let mut rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            let err = DatabaseError::from_statement(&table, "select", e);
            if err.is_missing_table() {
                return Ok(Vec::new());
            }
            return Err(err);
        }
    };

    let mut references = Vec::new();
    while let Some(row) = rows.next().await.map_err(read_err)? {
        let name = raw_text(row.get_value(0).map_err(read_err)?).unwrap_or_default();
        let parenttype = raw_text(row.get_value(1).map_err(read_err)?);
        let parent = raw_text(row.get_value(2).map_err(read_err)?);

        let (owner_doctype, owner_name) = match (parenttype, parent) {
            (Some(pt), Some(p)) => (pt, p),
            _ => (doctype.to_string(), name.clone()),
        };

        references.push(Reference {
            doctype: doctype.to_string(),
            name,
            field: field.to_string(),
            owner_doctype,
            owner_name,
        });
    }
    Ok(references)
}

/// Change the primary key of one row
pub async fn rename_row(
    conn: &libsql::Connection,
    doctype: &str,
    old: &str,
    new: &str,
) -> Result<u64, DatabaseError> {
    let table = table_name(doctype);
    conn.execute(
        &format!("UPDATE {} SET name = ? WHERE name = ?", quote_ident(&table)),
        [new, old],
    )
    .await
    .map_err(|e| DatabaseError::from_statement(&table, "rename", e))
}

/// Re-point child rows of a renamed parent
pub async fn repoint_children(
    conn: &libsql::Connection,
    child_type: &str,
    parenttype: &str,
    old: &str,
    new: &str,
) -> Result<u64, DatabaseError> {
    let table = table_name(child_type);
    match conn
        .execute(
            &format!(
                "UPDATE {} SET parent = ? WHERE parent = ? AND parenttype = ?",
                quote_ident(&table)
            ),
            [new, old, parenttype],
        )
        .await
    {
        Ok(affected) => Ok(affected),
        Err(e) => {
            let err = DatabaseError::from_statement(&table, "update", e);
            if err.is_missing_table() {
                Ok(0)
            } else {
                Err(err)
            }
        }
    }
}

/// Rewrite a Link column from `old` to `new` across a whole table
pub async fn rewrite_links(
    conn: &libsql::Connection,
    doctype: &str,
    field: &str,
    old: &str,
    new: &str,
) -> Result<u64, DatabaseError> {
    let table = table_name(doctype);
    match conn
        .execute(
            &format!(
                "UPDATE {} SET {} = ? WHERE {} = ?",
                quote_ident(&table),
                quote_ident(field),
                quote_ident(field)
            ),
            [new, old],
        )
        .await
    {
        Ok(affected) => Ok(affected),
        Err(e) => {
            let err = DatabaseError::from_statement(&table, "update", e);
            if err.is_missing_table() {
                Ok(0)
            } else {
                Err(err)
            }
        }
    }
}

/// Rewrite a Link value stored in `tabSingles`
pub async fn rewrite_single_links(
    conn: &libsql::Connection,
    doctype: &str,
    field: &str,
    old: &str,
    new: &str,
) -> Result<u64, DatabaseError> {
    conn.execute(
        &format!(
            "UPDATE {} SET value = ? WHERE doctype = ? AND field = ? AND value = ?",
            quote_ident(SINGLES_TABLE)
        ),
        [new, doctype, field, old],
    )
    .await
    .map_err(|e| DatabaseError::from_statement(SINGLES_TABLE, "update", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseService;
    use crate::models::{DocField, FieldKind};
    use tempfile::TempDir;

    fn item_schema() -> DocType {
        DocType::new("Item")
            .with_field(DocField::new("item_name", FieldKind::Data))
            .with_field(DocField::new("qty", FieldKind::Int))
            .with_field(DocField::new("rate", FieldKind::Currency))
    }

    async fn setup() -> (libsql::Connection, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("docs.db"))
            .await
            .unwrap();
        let conn = db.connect_with_timeout().await.unwrap();
        conn.execute(
            "CREATE TABLE \"tabItem\" (
                name TEXT PRIMARY KEY, owner TEXT, creation TEXT, modified TEXT,
                modified_by TEXT, docstatus INTEGER NOT NULL DEFAULT 0, parent TEXT,
                parenttype TEXT, parentfield TEXT, idx INTEGER,
                item_name TEXT, qty INTEGER, rate REAL
            )",
            (),
        )
        .await
        .unwrap();
        (conn, temp_dir)
    }

    fn item(name: &str, qty: i64) -> Document {
        let mut doc = Document::new("Item");
        doc.name = Some(name.to_string());
        doc.set("item_name", format!("Item {}", name));
        doc.set("qty", qty);
        doc.set("rate", "12.5");
        doc
    }

    #[tokio::test]
    async fn test_insert_and_load_row_coerces_values() {
        let (conn, _temp) = setup().await;
        let schema = item_schema();

        insert_row(&conn, &schema, &item("I-1", 3)).await.unwrap();
        let loaded = load_row(&conn, &schema, "I-1").await.unwrap().unwrap();

        assert!(!loaded.is_local());
        assert_eq!(loaded.get("qty"), Some(&Value::Int(3)));
        assert_eq!(loaded.get("rate"), Some(&Value::Float(12.5)));
        assert_eq!(loaded.docstatus, DocStatus::Draft);
        assert!(load_row(&conn, &schema, "I-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_duplicate_key() {
        let (conn, _temp) = setup().await;
        let schema = item_schema();

        insert_row(&conn, &schema, &item("I-1", 1)).await.unwrap();
        let err = insert_row(&conn, &schema, &item("I-1", 2)).await.unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[tokio::test]
    async fn test_update_missing_row_affects_nothing() {
        let (conn, _temp) = setup().await;
        let schema = item_schema();

        assert_eq!(update_row(&conn, &schema, &item("ghost", 1)).await.unwrap(), 0);

        insert_row(&conn, &schema, &item("I-1", 1)).await.unwrap();
        assert_eq!(update_row(&conn, &schema, &item("I-1", 9)).await.unwrap(), 1);
        assert_eq!(
            get_value(&conn, &schema, "I-1", "qty").await.unwrap(),
            Some(Value::Int(9))
        );
    }

    #[tokio::test]
    async fn test_missing_child_table_counts_as_empty() {
        let (conn, _temp) = setup().await;
        let schema = DocType::new("Nowhere Row").child_table();

        let children = load_children(&conn, &schema, "Order", "O-1", "items")
            .await
            .unwrap();
        assert!(children.is_empty());
        assert_eq!(
            delete_children_except(&conn, "Nowhere Row", "Order", "O-1", "items", &[])
                .await
                .unwrap(),
            0
        );
        assert!(!exists(&conn, "Nowhere Row", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_single_round_trip() {
        let (conn, _temp) = setup().await;
        let schema = DocType::new("Settings")
            .single()
            .with_field(DocField::new("company", FieldKind::Data))
            .with_field(DocField::new("max_items", FieldKind::Int));

        assert!(load_single(&conn, &schema).await.unwrap().is_none());

        let mut doc = Document::new("Settings");
        doc.set("company", "Acme");
        doc.set("max_items", 10_i64);
        write_single(&conn, &schema, &doc).await.unwrap();

        let loaded = load_single(&conn, &schema).await.unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Settings"));
        assert_eq!(loaded.get("max_items"), Some(&Value::Int(10)));

        set_single_field(&conn, "Settings", "company", &Value::from("Globex"))
            .await
            .unwrap();
        let loaded = load_single(&conn, &schema).await.unwrap().unwrap();
        assert_eq!(loaded.get_str("company"), Some("Globex"));
    }

    #[test]
    fn test_unknown_fields() {
        let schema = item_schema();
        let mut doc = item("I-1", 1);
        doc.set("colour", "red");
        assert_eq!(unknown_fields(&schema, &doc), vec!["colour".to_string()]);
        assert!(is_column(&schema, "modified"));
        assert!(!is_column(&schema, "colour"));
    }
}
