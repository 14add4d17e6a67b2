//! Type Definition Storage
//!
//! SQL for the meta tables: base definitions (`tabDocType`, `tabDocField`) and
//! the two customization tables (`tabCustom Field`, `tabProperty Setter`).
//! Every function takes the caller's connection; none of them opens a
//! transaction or touches the schema cache. Merging and cache invalidation
//! belong to the schema assembler.

use crate::db::database::{
    quote_ident, CUSTOM_FIELD_TABLE, DOCFIELD_TABLE, DOCTYPE_TABLE, PROPERTY_SETTER_TABLE,
};
use crate::db::error::DatabaseError;
use crate::models::{format_datetime, CustomField, DocField, DocType, FieldKind, PropertySetter};
use chrono::Local;

const FIELD_SELECT: &str = "fieldname, label, fieldtype, options, reqd, permlevel, idx, \
                            insert_after, default_value, hidden, read_only, allow_on_submit";

fn text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn int(value: bool) -> libsql::Value {
    libsql::Value::Integer(value as i64)
}

fn field_params(field: &DocField) -> Vec<libsql::Value> {
    vec![
        libsql::Value::Text(field.fieldname.clone()),
        libsql::Value::Text(field.label.clone()),
        libsql::Value::Text(field.fieldtype.as_str().to_string()),
        text(field.options.as_deref()),
        int(field.reqd),
        libsql::Value::Integer(field.permlevel),
        libsql::Value::Integer(field.idx),
        text(field.insert_after.as_deref()),
        text(field.default.as_deref()),
        int(field.hidden),
        int(field.read_only),
        int(field.allow_on_submit),
    ]
}

/// Read a field definition whose columns start at `offset` (in `FIELD_SELECT` order)
fn field_from_row(row: &libsql::Row, offset: i32) -> Result<DocField, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::sql_execution(format!("Invalid field row: {}", e));

    let fieldname: String = row.get(offset).map_err(col)?;
    let fieldtype_raw: String = row.get(offset + 2).map_err(col)?;
    let fieldtype: FieldKind = fieldtype_raw.parse().map_err(|e: String| {
        DatabaseError::sql_execution(format!("Field '{}': {}", fieldname, e))
    })?;

    Ok(DocField {
        label: row.get(offset + 1).map_err(col)?,
        fieldtype,
        options: row.get(offset + 3).map_err(col)?,
        reqd: row.get::<i64>(offset + 4).map_err(col)? != 0,
        permlevel: row.get(offset + 5).map_err(col)?,
        idx: row.get(offset + 6).map_err(col)?,
        insert_after: row.get(offset + 7).map_err(col)?,
        default: row.get(offset + 8).map_err(col)?,
        hidden: row.get::<i64>(offset + 9).map_err(col)? != 0,
        read_only: row.get::<i64>(offset + 10).map_err(col)? != 0,
        allow_on_submit: row.get::<i64>(offset + 11).map_err(col)? != 0,
        fieldname,
    })
}

async fn next_row(rows: &mut libsql::Rows) -> Result<Option<libsql::Row>, DatabaseError> {
    rows.next()
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to read row: {}", e)))
}

/// Upsert a base definition and replace its field rows
///
/// Returns the new version (previous version + 1, or 1 on first install).
pub async fn save_doctype(
    conn: &libsql::Connection,
    doctype: &DocType,
) -> Result<i64, DatabaseError> {
    let previous = doctype_version(conn, &doctype.name).await?;
    let version = previous.unwrap_or(0) + 1;

    conn.execute(
        &format!(
            "INSERT INTO {} (name, autoname, is_single, is_submittable, is_child_table,
                             name_case, title_field, version, modified)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                 autoname = excluded.autoname,
                 is_single = excluded.is_single,
                 is_submittable = excluded.is_submittable,
                 is_child_table = excluded.is_child_table,
                 name_case = excluded.name_case,
                 title_field = excluded.title_field,
                 version = excluded.version,
                 modified = excluded.modified",
            quote_ident(DOCTYPE_TABLE)
        ),
        libsql::params_from_iter(vec![
            libsql::Value::Text(doctype.name.clone()),
            text(doctype.autoname.as_deref()),
            int(doctype.is_single),
            int(doctype.is_submittable),
            int(doctype.is_child_table),
            libsql::Value::Text(doctype.name_case.as_str().to_string()),
            text(doctype.title_field.as_deref()),
            libsql::Value::Integer(version),
            libsql::Value::Text(format_datetime(&Local::now().naive_local())),
        ]),
    )
    .await
    .map_err(|e| DatabaseError::from_statement(DOCTYPE_TABLE, "upsert", e))?;

    conn.execute(
        &format!("DELETE FROM {} WHERE parent = ?", quote_ident(DOCFIELD_TABLE)),
        [doctype.name.as_str()],
    )
    .await
    .map_err(|e| DatabaseError::from_statement(DOCFIELD_TABLE, "delete", e))?;

    let insert = format!(
        "INSERT INTO {} (parent, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        quote_ident(DOCFIELD_TABLE),
        FIELD_SELECT
    );
    for (position, field) in doctype.fields.iter().enumerate() {
        let mut field = field.clone();
        if field.idx == 0 {
            field.idx = position as i64 + 1;
        }
        let mut params = vec![libsql::Value::Text(doctype.name.clone())];
        params.extend(field_params(&field));
        conn.execute(&insert, libsql::params_from_iter(params))
            .await
            .map_err(|e| DatabaseError::from_statement(DOCFIELD_TABLE, "insert", e))?;
    }

    Ok(version)
}

async fn doctype_version(
    conn: &libsql::Connection,
    name: &str,
) -> Result<Option<i64>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT version FROM {} WHERE name = ?", quote_ident(DOCTYPE_TABLE)),
            [name],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(DOCTYPE_TABLE, "select", e))?;

    match next_row(&mut rows).await? {
        Some(row) => Ok(Some(row.get(0).map_err(|e| {
            DatabaseError::sql_execution(format!("Invalid version: {}", e))
        })?)),
        None => Ok(None),
    }
}

/// Load a base definition with its fields ordered by `idx`
pub async fn load_doctype(
    conn: &libsql::Connection,
    name: &str,
) -> Result<Option<DocType>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT name, autoname, is_single, is_submittable, is_child_table,
                        name_case, title_field, version
                 FROM {} WHERE name = ?",
                quote_ident(DOCTYPE_TABLE)
            ),
            [name],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(DOCTYPE_TABLE, "select", e))?;

    let Some(row) = next_row(&mut rows).await? else {
        return Ok(None);
    };

    let col = |e: libsql::Error| DatabaseError::sql_execution(format!("Invalid DocType row: {}", e));
    let name_case_raw: String = row.get(5).map_err(col)?;

    let mut doctype = DocType {
        name: row.get(0).map_err(col)?,
        autoname: row.get(1).map_err(col)?,
        is_single: row.get::<i64>(2).map_err(col)? != 0,
        is_submittable: row.get::<i64>(3).map_err(col)? != 0,
        is_child_table: row.get::<i64>(4).map_err(col)? != 0,
        name_case: name_case_raw.parse().unwrap_or_default(),
        title_field: row.get(6).map_err(col)?,
        version: row.get(7).map_err(col)?,
        fields: Vec::new(),
    };

    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM {} WHERE parent = ? ORDER BY idx, rowid",
                FIELD_SELECT,
                quote_ident(DOCFIELD_TABLE)
            ),
            [name],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(DOCFIELD_TABLE, "select", e))?;

    while let Some(row) = next_row(&mut rows).await? {
        doctype.fields.push(field_from_row(&row, 0)?);
    }

    Ok(Some(doctype))
}

/// Names of all installed types, sorted
pub async fn list_doctypes(conn: &libsql::Connection) -> Result<Vec<String>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT name FROM {} ORDER BY name", quote_ident(DOCTYPE_TABLE)),
            (),
        )
        .await
        .map_err(|e| DatabaseError::from_statement(DOCTYPE_TABLE, "select", e))?;

    let mut names = Vec::new();
    while let Some(row) = next_row(&mut rows).await? {
        names.push(
            row.get(0)
                .map_err(|e| DatabaseError::sql_execution(e.to_string()))?,
        );
    }
    Ok(names)
}

/// Custom fields of a type in creation order
pub async fn load_custom_fields(
    conn: &libsql::Connection,
    dt: &str,
) -> Result<Vec<CustomField>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM {} WHERE dt = ? ORDER BY rowid",
                FIELD_SELECT,
                quote_ident(CUSTOM_FIELD_TABLE)
            ),
            [dt],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(CUSTOM_FIELD_TABLE, "select", e))?;

    let mut fields = Vec::new();
    while let Some(row) = next_row(&mut rows).await? {
        fields.push(CustomField::new(dt, field_from_row(&row, 0)?));
    }
    Ok(fields)
}

/// Insert a custom field; an existing `(dt, fieldname)` yields `DuplicateKey`
pub async fn insert_custom_field(
    conn: &libsql::Connection,
    custom: &CustomField,
) -> Result<(), DatabaseError> {
    let mut params = vec![
        libsql::Value::Text(custom.name()),
        libsql::Value::Text(custom.dt.clone()),
    ];
    params.extend(field_params(&custom.field));

    conn.execute(
        &format!(
            "INSERT INTO {} (name, dt, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            quote_ident(CUSTOM_FIELD_TABLE),
            FIELD_SELECT
        ),
        libsql::params_from_iter(params),
    )
    .await
    .map_err(|e| DatabaseError::from_statement(CUSTOM_FIELD_TABLE, "insert", e))?;

    Ok(())
}

/// Delete a custom field, returning whether a row was removed
pub async fn delete_custom_field(
    conn: &libsql::Connection,
    dt: &str,
    fieldname: &str,
) -> Result<bool, DatabaseError> {
    let affected = conn
        .execute(
            &format!(
                "DELETE FROM {} WHERE dt = ? AND fieldname = ?",
                quote_ident(CUSTOM_FIELD_TABLE)
            ),
            [dt, fieldname],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(CUSTOM_FIELD_TABLE, "delete", e))?;
    Ok(affected > 0)
}

/// Property setters of a type in creation order
pub async fn load_property_setters(
    conn: &libsql::Connection,
    doc_type: &str,
) -> Result<Vec<PropertySetter>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT doc_type, field_name, property, value FROM {}
                 WHERE doc_type = ? ORDER BY rowid",
                quote_ident(PROPERTY_SETTER_TABLE)
            ),
            [doc_type],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(PROPERTY_SETTER_TABLE, "select", e))?;

    let col =
        |e: libsql::Error| DatabaseError::sql_execution(format!("Invalid property setter: {}", e));

    let mut setters = Vec::new();
    while let Some(row) = next_row(&mut rows).await? {
        let field_name: Option<String> = row.get(1).map_err(col)?;
        setters.push(PropertySetter {
            doc_type: row.get(0).map_err(col)?,
            field_name: field_name.filter(|f| !f.is_empty()),
            property: row.get(2).map_err(col)?,
            value: row.get(3).map_err(col)?,
        });
    }
    Ok(setters)
}

/// Store a property setter, replacing any prior one with the same key
pub async fn upsert_property_setter(
    conn: &libsql::Connection,
    setter: &PropertySetter,
) -> Result<(), DatabaseError> {
    delete_property_setter(
        conn,
        &setter.doc_type,
        setter.field_name.as_deref(),
        &setter.property,
    )
    .await?;

    conn.execute(
        &format!(
            "INSERT INTO {} (doc_type, field_name, property, value, modified)
             VALUES (?, ?, ?, ?, ?)",
            quote_ident(PROPERTY_SETTER_TABLE)
        ),
        libsql::params_from_iter(vec![
            libsql::Value::Text(setter.doc_type.clone()),
            text(setter.field_name.as_deref()),
            libsql::Value::Text(setter.property.clone()),
            libsql::Value::Text(setter.value.clone()),
            libsql::Value::Text(format_datetime(&Local::now().naive_local())),
        ]),
    )
    .await
    .map_err(|e| DatabaseError::from_statement(PROPERTY_SETTER_TABLE, "insert", e))?;

    Ok(())
}

/// Delete the property setter with the given key, returning whether one existed
pub async fn delete_property_setter(
    conn: &libsql::Connection,
    doc_type: &str,
    field_name: Option<&str>,
    property: &str,
) -> Result<bool, DatabaseError> {
    let affected = conn
        .execute(
            &format!(
                "DELETE FROM {} WHERE doc_type = ? AND IFNULL(field_name, '') = ? AND property = ?",
                quote_ident(PROPERTY_SETTER_TABLE)
            ),
            [doc_type, field_name.unwrap_or(""), property],
        )
        .await
        .map_err(|e| DatabaseError::from_statement(PROPERTY_SETTER_TABLE, "delete", e))?;
    Ok(affected > 0)
}

/// Drop every property setter naming a field (used when the field goes away)
pub async fn delete_field_property_setters(
    conn: &libsql::Connection,
    doc_type: &str,
    field_name: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "DELETE FROM {} WHERE doc_type = ? AND field_name = ?",
            quote_ident(PROPERTY_SETTER_TABLE)
        ),
        [doc_type, field_name],
    )
    .await
    .map_err(|e| DatabaseError::from_statement(PROPERTY_SETTER_TABLE, "delete", e))?;
    Ok(())
}
