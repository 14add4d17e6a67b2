//! Schema Assembler
//!
//! Computes the effective schema of a type from three sources:
//!
//! 1. The base definition (`tabDocType` + `tabDocField`)
//! 2. Custom Fields, appended after the base fields
//! 3. Property Setters, replacing one property of the type or of one field
//!
//! Fields carrying `insert_after` are then moved to immediately follow their
//! referent and `idx` is renumbered `1..N`. Submittable types always carry an
//! `amended_from` Link back to their own type.
//!
//! The merge itself is the pure function [`merge`]; it never mutates stored
//! rows. [`SchemaAssembler`] loads the inputs, caches the result in a
//! [`SchemaCache`], and owns the administrative writes (install, custom
//! fields, property setters), each of which invalidates the cache before it
//! returns.

use crate::db::{meta_store, DatabaseService};
use crate::models::{
    validate_doctype_name, validate_fieldname, CustomField, DocField, DocType, FieldKind,
    PropertyOutcome, PropertySetter, AMENDED_FROM,
};
use crate::services::{DocumentError, SchemaCache, SchemaTableManager};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Result of merging a base definition with its customizations
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSchema {
    pub doctype: DocType,

    /// Overrides skipped during the merge, one human-readable line each
    pub diagnostics: Vec<String>,
}

impl EffectiveSchema {
    pub fn name(&self) -> &str {
        &self.doctype.name
    }
}

/// A type's effective schema plus those of the child types it owns
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaBundle {
    pub parent: Arc<EffectiveSchema>,

    /// Child type name -> effective schema
    pub children: HashMap<String, Arc<EffectiveSchema>>,
}

impl SchemaBundle {
    pub fn child(&self, doctype: &str) -> Option<&DocType> {
        self.children.get(doctype).map(|schema| &schema.doctype)
    }
}

/// Merge a base definition with its Custom Fields and Property Setters
///
/// Setters naming an absent field or an unknown property are ignored. Setters
/// describing an illegal change are skipped and reported in `diagnostics`.
pub fn merge(
    base: DocType,
    custom_fields: &[CustomField],
    setters: &[PropertySetter],
) -> EffectiveSchema {
    let mut doctype = base;
    let mut diagnostics = Vec::new();

    for custom in custom_fields {
        if doctype.field(&custom.field.fieldname).is_some() {
            diagnostics.push(format!(
                "Custom Field {} duplicates an existing field and was skipped",
                custom.name()
            ));
            continue;
        }
        doctype.fields.push(custom.field.clone());
    }

    for setter in setters {
        let outcome = match setter.field_name.as_deref() {
            None => doctype.apply_property(&setter.property, &setter.value),
            Some(fieldname) => {
                match doctype.fields.iter_mut().find(|f| f.fieldname == fieldname) {
                    Some(field) => field.apply_property(&setter.property, &setter.value),
                    None => {
                        tracing::debug!(
                            "Ignoring override of {} on missing field {}.{}",
                            setter.property,
                            doctype.name,
                            fieldname
                        );
                        continue;
                    }
                }
            }
        };

        match outcome {
            Ok(PropertyOutcome::Applied) => {}
            Ok(PropertyOutcome::Unknown) => tracing::debug!(
                "Ignoring unknown property '{}' on {}",
                setter.property,
                doctype.name
            ),
            Err(reason) => {
                tracing::warn!("Skipping override on {}: {}", doctype.name, reason);
                diagnostics.push(reason);
            }
        }
    }

    if doctype.is_submittable && doctype.field(AMENDED_FROM).is_none() {
        let mut amended_from = DocField::new(AMENDED_FROM, FieldKind::Link).with_options(doctype.name.clone());
        amended_from.read_only = true;
        doctype.fields.push(amended_from);
    }

    doctype.fields = order_fields(std::mem::take(&mut doctype.fields));
    for (position, field) in doctype.fields.iter_mut().enumerate() {
        field.idx = position as i64 + 1;
    }

    EffectiveSchema {
        doctype,
        diagnostics,
    }
}

/// Move fields with a resolvable `insert_after` directly after their referent
///
/// Several fields placed after the same referent keep their relative order.
/// Unresolvable references (missing referent, cycles) keep append order.
fn order_fields(fields: Vec<DocField>) -> Vec<DocField> {
    let names: HashSet<String> = fields.iter().map(|f| f.fieldname.clone()).collect();
    let movable = |f: &DocField| {
        f.insert_after
            .as_deref()
            .is_some_and(|target| target != f.fieldname && names.contains(target))
    };

    let (mut pending, mut ordered): (Vec<DocField>, Vec<DocField>) =
        fields.into_iter().partition(|f| movable(f));
    let mut moved: HashSet<String> = HashSet::new();

    loop {
        let mut progress = false;
        let mut still_pending = Vec::new();

        for field in pending {
            let target = field.insert_after.clone().unwrap_or_default();
            match ordered.iter().position(|f| f.fieldname == target) {
                Some(at) => {
                    let mut slot = at + 1;
                    while slot < ordered.len()
                        && moved.contains(&ordered[slot].fieldname)
                        && ordered[slot].insert_after.as_deref() == Some(target.as_str())
                    {
                        slot += 1;
                    }
                    moved.insert(field.fieldname.clone());
                    ordered.insert(slot, field);
                    progress = true;
                }
                None => still_pending.push(field),
            }
        }

        pending = still_pending;
        if pending.is_empty() || !progress {
            break;
        }
    }

    ordered.extend(pending);
    ordered
}

/// Loads, merges and caches effective schemas; administers customizations
#[derive(Debug, Clone)]
pub struct SchemaAssembler {
    db: Arc<DatabaseService>,
    cache: SchemaCache,
    tables: SchemaTableManager,
}

impl SchemaAssembler {
    pub fn new(db: Arc<DatabaseService>, cache: SchemaCache) -> Self {
        Self {
            db,
            cache,
            tables: SchemaTableManager::new(),
        }
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Load and merge the effective schema on an existing connection (no cache)
    pub async fn load_effective(
        conn: &libsql::Connection,
        doctype: &str,
    ) -> Result<EffectiveSchema, DocumentError> {
        let base = meta_store::load_doctype(conn, doctype)
            .await?
            .ok_or_else(|| DocumentError::not_found("DocType", doctype))?;
        let custom_fields = meta_store::load_custom_fields(conn, doctype).await?;
        let setters = meta_store::load_property_setters(conn, doctype).await?;
        Ok(merge(base, &custom_fields, &setters))
    }

    /// Effective schema of one type (Raw view)
    pub async fn assemble(&self, doctype: &str) -> Result<Arc<EffectiveSchema>, DocumentError> {
        if let Some(schema) = self.cache.get_raw(doctype).await {
            return Ok(schema);
        }

        let generation = self.cache.generation();
        let conn = self.db.connect_with_timeout().await?;
        let schema = Arc::new(Self::load_effective(&conn, doctype).await?);
        self.cache.insert_raw(schema.clone(), generation).await;
        Ok(schema)
    }

    /// Effective schema of a type with all of its child types (Decorated view)
    pub async fn assemble_bundle(&self, doctype: &str) -> Result<Arc<SchemaBundle>, DocumentError> {
        if let Some(bundle) = self.cache.get_decorated(doctype).await {
            return Ok(bundle);
        }

        let generation = self.cache.generation();
        let parent = self.assemble(doctype).await?;
        let mut children = HashMap::new();
        for field in parent.doctype.table_fields() {
            let Some(target) = field.table_target() else {
                continue;
            };
            if !children.contains_key(target) {
                children.insert(target.to_string(), self.assemble(target).await?);
            }
        }

        let bundle = Arc::new(SchemaBundle { parent, children });
        self.cache.insert_decorated(bundle.clone(), generation).await;
        Ok(bundle)
    }

    /// Drop cached schemas of a type
    pub async fn invalidate(&self, doctype: &str) {
        self.cache.invalidate(doctype).await;
    }

    /// Install (or reinstall) a base definition and create or extend its table
    ///
    /// Returns the new version of the definition.
    pub async fn install_doctype(&self, doctype: DocType) -> Result<i64, DocumentError> {
        validate_doctype_name(&doctype.name).map_err(DocumentError::validation)?;
        let mut seen = HashSet::new();
        for field in &doctype.fields {
            validate_fieldname(&field.fieldname).map_err(DocumentError::validation)?;
            if !seen.insert(field.fieldname.as_str()) {
                return Err(DocumentError::validation(format!(
                    "DocType {}: duplicate field {}",
                    doctype.name, field.fieldname
                )));
            }
            check_targets(field)?;
        }

        let conn = self.db.begin_write().await?;
        let result = self.install_rows(&conn, &doctype).await;
        let version = DatabaseService::finish(&conn, result).await?;

        self.invalidate(&doctype.name).await;
        tracing::info!("Installed DocType {} (version {})", doctype.name, version);
        Ok(version)
    }

    async fn install_rows(
        &self,
        conn: &libsql::Connection,
        doctype: &DocType,
    ) -> Result<i64, DocumentError> {
        let version = meta_store::save_doctype(conn, doctype).await?;
        let effective = Self::load_effective(conn, &doctype.name).await?;
        self.tables.sync_table(conn, &effective.doctype).await?;
        Ok(version)
    }

    /// Add a user field to a type and extend its table
    pub async fn add_custom_field(&self, custom: CustomField) -> Result<(), DocumentError> {
        validate_fieldname(&custom.field.fieldname).map_err(DocumentError::validation)?;
        check_targets(&custom.field)?;

        let conn = self.db.begin_write().await?;
        let result = self.add_custom_field_rows(&conn, &custom).await;
        DatabaseService::finish(&conn, result).await?;

        self.invalidate(&custom.dt).await;
        tracing::info!("Added custom field {} to {}", custom.field.fieldname, custom.dt);
        Ok(())
    }

    async fn add_custom_field_rows(
        &self,
        conn: &libsql::Connection,
        custom: &CustomField,
    ) -> Result<(), DocumentError> {
        let effective = Self::load_effective(conn, &custom.dt).await?;
        if effective.doctype.field(&custom.field.fieldname).is_some() {
            return Err(DocumentError::validation(format!(
                "Field {} already exists in {}",
                custom.field.fieldname, custom.dt
            )));
        }

        meta_store::insert_custom_field(conn, custom)
            .await
            .map_err(|e| {
                if e.is_duplicate_key() {
                    DocumentError::validation(format!("Custom Field {} already exists", custom.name()))
                } else {
                    DocumentError::Database(e)
                }
            })?;

        let effective = Self::load_effective(conn, &custom.dt).await?;
        self.tables.sync_table(conn, &effective.doctype).await?;
        Ok(())
    }

    /// Remove a user field; its column is kept, its overrides are dropped
    pub async fn remove_custom_field(&self, dt: &str, fieldname: &str) -> Result<(), DocumentError> {
        let conn = self.db.begin_write().await?;
        let result = Self::remove_custom_field_rows(&conn, dt, fieldname).await;
        DatabaseService::finish(&conn, result).await?;

        self.invalidate(dt).await;
        tracing::info!("Removed custom field {} from {}", fieldname, dt);
        Ok(())
    }

    async fn remove_custom_field_rows(
        conn: &libsql::Connection,
        dt: &str,
        fieldname: &str,
    ) -> Result<(), DocumentError> {
        if !meta_store::delete_custom_field(conn, dt, fieldname).await? {
            return Err(DocumentError::not_found(
                "Custom Field",
                format!("{}-{}", dt, fieldname),
            ));
        }
        meta_store::delete_field_property_setters(conn, dt, fieldname).await?;
        Ok(())
    }

    /// Store an override, replacing any prior one with the same key
    ///
    /// Illegal changes (unknown field or property, incompatible fieldtype,
    /// storage-layout flags) are rejected with `ValidationError`.
    pub async fn set_property(
        &self,
        doc_type: &str,
        field_name: Option<&str>,
        property: &str,
        value: &str,
    ) -> Result<(), DocumentError> {
        let setter = PropertySetter {
            doc_type: doc_type.to_string(),
            field_name: field_name.map(str::to_string),
            property: property.to_string(),
            value: value.to_string(),
        };

        let conn = self.db.begin_write().await?;
        let result = self.set_property_rows(&conn, &setter).await;
        DatabaseService::finish(&conn, result).await?;

        self.invalidate(doc_type).await;
        tracing::info!(
            "Set {} on {}{} to '{}'",
            property,
            doc_type,
            field_name.map(|f| format!(".{}", f)).unwrap_or_default(),
            value
        );
        Ok(())
    }

    async fn set_property_rows(
        &self,
        conn: &libsql::Connection,
        setter: &PropertySetter,
    ) -> Result<(), DocumentError> {
        let effective = Self::load_effective(conn, &setter.doc_type).await?;
        check_override(&effective.doctype, setter)?;
        meta_store::upsert_property_setter(conn, setter).await?;
        self.sync_effective_table(conn, &setter.doc_type).await
    }

    /// Add columns the effective schema now needs (e.g. `amended_from`)
    async fn sync_effective_table(
        &self,
        conn: &libsql::Connection,
        doctype: &str,
    ) -> Result<(), DocumentError> {
        let effective = Self::load_effective(conn, doctype).await?;
        self.tables.sync_table(conn, &effective.doctype).await?;
        Ok(())
    }

    /// Delete an override, reverting the property; returns whether one existed
    pub async fn remove_property(
        &self,
        doc_type: &str,
        field_name: Option<&str>,
        property: &str,
    ) -> Result<bool, DocumentError> {
        let conn = self.db.begin_write().await?;
        let result = self
            .remove_property_rows(&conn, doc_type, field_name, property)
            .await;
        let removed = DatabaseService::finish(&conn, result).await?;

        self.invalidate(doc_type).await;
        Ok(removed)
    }

    async fn remove_property_rows(
        &self,
        conn: &libsql::Connection,
        doc_type: &str,
        field_name: Option<&str>,
        property: &str,
    ) -> Result<bool, DocumentError> {
        let removed = meta_store::delete_property_setter(conn, doc_type, field_name, property).await?;
        if removed {
            self.sync_effective_table(conn, doc_type).await?;
        }
        Ok(removed)
    }

    /// Names of all installed types
    pub async fn list_doctypes(&self) -> Result<Vec<String>, DocumentError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(meta_store::list_doctypes(&conn).await?)
    }
}

/// Link and Table fields must name their target type
fn check_targets(field: &DocField) -> Result<(), DocumentError> {
    let missing = match field.fieldtype {
        FieldKind::Link => field.link_target().is_none(),
        FieldKind::Table => field.table_target().is_none(),
        _ => false,
    };
    if missing {
        return Err(DocumentError::validation(format!(
            "Field {} of type {} requires a target DocType in options",
            field.fieldname, field.fieldtype
        )));
    }
    Ok(())
}

/// Validate an override against the current effective definition
fn check_override(doctype: &DocType, setter: &PropertySetter) -> Result<(), DocumentError> {
    let outcome = match setter.field_name.as_deref() {
        None => doctype
            .clone()
            .apply_property(&setter.property, &setter.value),
        Some(fieldname) => {
            let mut field = doctype.field(fieldname).cloned().ok_or_else(|| {
                DocumentError::validation(format!(
                    "Field {} does not exist in {}",
                    fieldname, doctype.name
                ))
            })?;
            field.apply_property(&setter.property, &setter.value)
        }
    };

    match outcome {
        Ok(PropertyOutcome::Applied) => Ok(()),
        Ok(PropertyOutcome::Unknown) => Err(DocumentError::validation(format!(
            "Property {} cannot be overridden",
            setter.property
        ))),
        Err(reason) => Err(DocumentError::validation(reason)),
    }
}
