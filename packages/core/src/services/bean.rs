//! Bean: Document Lifecycle
//!
//! A [`Bean`] is a document plus its child rows, bound to the
//! [`DocumentService`] that loaded or created it. Every lifecycle operation
//! runs one pipeline inside a single `BEGIN IMMEDIATE` transaction:
//!
//! 1. Concurrency check: stored `modified` must equal the loaded one, and the
//!    stored `docstatus` must allow the operation
//! 2. Permission check
//! 3. Identity assignment for local documents
//! 4. Child linkage refresh
//! 5. Pre hooks (`before_insert`, `validate`, `before_cancel`)
//! 6. Mandatory check
//! 7. Link validation
//! 8. Audit stamping
//! 9. Persist parent, then reconcile children
//! 10. Post hooks (`on_update`, `on_submit`, `on_cancel`, `on_update_after_submit`)
//!
//! Any failure rolls the transaction back and restores the in-memory state.
//!
//! | Operation | Allowed from | Result |
//! |---|---|---|
//! | `save` | local or Draft | Draft |
//! | `submit` | Draft | Submitted |
//! | `cancel` | Submitted | Cancelled |
//! | `update_after_submit` | Submitted | Submitted |

use crate::behaviors::{HookContext, HookKind};
use crate::db::{document_store, DatabaseService};
use crate::models::{format_datetime, DocStatus, DocType, Document, FieldKind, Value, AMENDED_FROM};
use crate::services::document_service::load_with_children;
use crate::services::{
    stamp_children, DocumentError, DocumentService, LinkMode, PermissionAction, SchemaBundle,
};
use chrono::{Local, NaiveDateTime, SubsecRound};

/// Next `modified` stamp: now, or one microsecond past `previous` if the clock
/// has not moved beyond it
pub(crate) fn next_modified(previous: Option<NaiveDateTime>) -> NaiveDateTime {
    let now = Local::now().naive_local().trunc_subsecs(6);
    match previous {
        Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
        _ => now,
    }
}

fn format_stamp(stamp: Option<NaiveDateTime>) -> String {
    stamp
        .as_ref()
        .map(format_datetime)
        .unwrap_or_else(|| "never".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Save,
    Submit,
    Cancel,
    UpdateAfterSubmit,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Save => "save",
            Action::Submit => "submit",
            Action::Cancel => "cancel",
            Action::UpdateAfterSubmit => "update after submit",
        }
    }

    fn allowed_from(&self, stored: Option<DocStatus>) -> bool {
        matches!(
            (self, stored),
            (Action::Save, None | Some(DocStatus::Draft))
                | (Action::Submit, Some(DocStatus::Draft))
                | (Action::Cancel, Some(DocStatus::Submitted))
                | (Action::UpdateAfterSubmit, Some(DocStatus::Submitted))
        )
    }

    fn target(&self) -> DocStatus {
        match self {
            Action::Save => DocStatus::Draft,
            Action::Submit | Action::UpdateAfterSubmit => DocStatus::Submitted,
            Action::Cancel => DocStatus::Cancelled,
        }
    }

    fn permission(&self, exists: bool) -> PermissionAction {
        match self {
            Action::Save if !exists => PermissionAction::Create,
            Action::Save | Action::UpdateAfterSubmit => PermissionAction::Write,
            Action::Submit => PermissionAction::Submit,
            Action::Cancel => PermissionAction::Cancel,
        }
    }

    fn post_hook(&self) -> HookKind {
        match self {
            Action::Save => HookKind::OnUpdate,
            Action::Submit => HookKind::OnSubmit,
            Action::Cancel => HookKind::OnCancel,
            Action::UpdateAfterSubmit => HookKind::OnUpdateAfterSubmit,
        }
    }
}

/// A document with its child rows and lifecycle operations
#[derive(Debug, Clone)]
pub struct Bean {
    service: DocumentService,
    doc: Document,
    children: Vec<Document>,
    link_mode: LinkMode,
}

impl Bean {
    pub(crate) fn from_parts(service: DocumentService, doc: Document, children: Vec<Document>) -> Self {
        Self {
            service,
            doc,
            children,
            link_mode: LinkMode::Strict,
        }
    }

    pub fn doctype(&self) -> &str {
        &self.doc.doctype
    }

    pub fn name(&self) -> Option<&str> {
        self.doc.name.as_deref()
    }

    pub fn docstatus(&self) -> DocStatus {
        self.doc.docstatus
    }

    pub fn modified(&self) -> Option<NaiveDateTime> {
        self.doc.modified
    }

    pub fn is_local(&self) -> bool {
        self.doc.is_local()
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Choose how unresolved Link values are handled on save (strict by default)
    pub fn set_link_mode(&mut self, mode: LinkMode) {
        self.link_mode = mode;
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.doc.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.doc.set(field, value);
    }

    /// All child rows, across Table fields
    pub fn children(&self) -> &[Document] {
        &self.children
    }

    /// Child rows of one Table field, in list order
    pub fn children_of<'a>(&'a self, parentfield: &'a str) -> impl Iterator<Item = &'a Document> + 'a {
        self.children
            .iter()
            .filter(move |c| c.parentfield.as_deref() == Some(parentfield))
    }

    /// Append a child row to a Table field and return it for editing
    pub fn append_child(&mut self, parentfield: impl Into<String>, mut child: Document) -> &mut Document {
        child.parentfield = Some(parentfield.into());
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Child row by name (or local marker) for in-place edits
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Document> {
        self.children
            .iter_mut()
            .find(|c| c.name.as_deref() == Some(name) || c.local_marker() == name)
    }

    /// Remove a child row by name (or local marker for unsaved rows)
    pub fn remove_child(&mut self, name: &str) -> Option<Document> {
        let position = self
            .children
            .iter()
            .position(|c| c.name.as_deref() == Some(name) || c.local_marker() == name)?;
        Some(self.children.remove(position))
    }

    /// Insert a local document, or update a stored Draft
    pub async fn save(&mut self) -> Result<(), DocumentError> {
        self.execute(Action::Save).await
    }

    /// Insert a local document; fails if the bean was loaded from storage
    pub async fn insert(&mut self) -> Result<(), DocumentError> {
        if !self.doc.is_local() {
            return Err(DocumentError::name_error(format!(
                "{} {} is already saved",
                self.doc.doctype,
                self.doc.display_name()
            )));
        }
        self.execute(Action::Save).await
    }

    pub async fn submit(&mut self) -> Result<(), DocumentError> {
        self.execute(Action::Submit).await
    }

    pub async fn cancel(&mut self) -> Result<(), DocumentError> {
        self.execute(Action::Cancel).await
    }

    /// Persist changes to `allow_on_submit` fields of a submitted document
    pub async fn update_after_submit(&mut self) -> Result<(), DocumentError> {
        self.execute(Action::UpdateAfterSubmit).await
    }

    /// New local Draft bean replacing this cancelled one
    ///
    /// Values and child rows are copied; `amended_from` points back here so
    /// the naming engine derives the amended name.
    pub fn amend(&self) -> Result<Bean, DocumentError> {
        let name = match (&self.doc.name, self.doc.docstatus) {
            (Some(name), DocStatus::Cancelled) if !self.doc.is_local() => name.clone(),
            _ => {
                return Err(DocumentError::transition(
                    self.doc.doctype.clone(),
                    self.doc.display_name(),
                    "amend",
                    self.doc.docstatus,
                ))
            }
        };

        let mut doc = self.doc.duplicate();
        doc.set(AMENDED_FROM, name);
        let children = self.children.iter().map(Document::duplicate).collect();
        Ok(Bean::from_parts(self.service.clone(), doc, children))
    }

    /// Run one hook by name in its own transaction
    ///
    /// Nothing is persisted besides what the hook itself writes.
    pub async fn run_method(&mut self, method: &str) -> Result<(), DocumentError> {
        let kind: HookKind = method.parse().map_err(DocumentError::validation)?;
        let schema = self.service.assembler.assemble(&self.doc.doctype).await?;

        let conn = self.service.db.begin_write().await?;
        let result = self.run_hook(kind, &conn, &schema.doctype).await;
        DatabaseService::finish(&conn, result).await?;

        tracing::debug!("Ran {} on {} {}", kind, self.doc.doctype, self.doc.display_name());
        Ok(())
    }

    /// Delete the stored document and its child rows
    ///
    /// Submitted documents and documents still referenced by non-cancelled
    /// records are refused.
    pub async fn delete(&mut self) -> Result<(), DocumentError> {
        let bundle = self.service.assembler.assemble_bundle(&self.doc.doctype).await?;

        let conn = self.service.db.begin_write().await?;
        let result = self.delete_rows(&conn, &bundle).await;
        DatabaseService::finish(&conn, result).await?;

        tracing::info!("Deleted {} {}", self.doc.doctype, self.doc.display_name());
        Ok(())
    }

    async fn delete_rows(
        &self,
        conn: &libsql::Connection,
        bundle: &SchemaBundle,
    ) -> Result<(), DocumentError> {
        let schema = &bundle.parent.doctype;
        let name = if schema.is_single {
            schema.name.clone()
        } else {
            self.doc
                .name
                .clone()
                .filter(|_| !self.doc.is_local())
                .ok_or_else(|| DocumentError::not_found(schema.name.clone(), self.doc.display_name()))?
        };

        let state = document_store::lock_state(conn, schema, &name)
            .await?
            .ok_or_else(|| DocumentError::not_found(schema.name.clone(), name.clone()))?;
        if state.docstatus == DocStatus::Submitted {
            return Err(DocumentError::transition(
                schema.name.clone(),
                name,
                "delete",
                state.docstatus,
            ));
        }
        self.service
            .check_permission(PermissionAction::Delete, &self.doc)
            .await?;

        if !schema.is_single {
            let linked = self
                .service
                .links
                .referencing_records(conn, &schema.name, &name)
                .await?;
            if !linked.is_empty() {
                return Err(DocumentError::link_exists(
                    schema.name.clone(),
                    name,
                    "delete",
                    linked,
                ));
            }
        }

        for field in schema.table_fields() {
            if let Some(target) = field.table_target() {
                document_store::delete_children_except(
                    conn,
                    target,
                    &schema.name,
                    &name,
                    &field.fieldname,
                    &[],
                )
                .await?;
            }
        }

        if schema.is_single {
            document_store::delete_single(conn, &schema.name).await?;
        } else {
            document_store::delete_row(conn, &schema.name, &name).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, action: Action) -> Result<(), DocumentError> {
        let bundle = self.service.assembler.assemble_bundle(&self.doc.doctype).await?;
        if action != Action::Save && !bundle.parent.doctype.is_submittable {
            return Err(DocumentError::validation(format!(
                "Cannot {} {}: not a submittable DocType",
                action.as_str(),
                self.doc.doctype
            )));
        }

        let snapshot = (self.doc.clone(), self.children.clone());
        let conn = self.service.db.begin_write().await?;
        let result = self.pipeline(&conn, action, &bundle).await;

        match DatabaseService::finish(&conn, result).await {
            Ok(()) => {
                tracing::info!(
                    "{} {} {} ({})",
                    action.as_str(),
                    self.doc.doctype,
                    self.doc.display_name(),
                    self.doc.docstatus
                );
                Ok(())
            }
            Err(e) => {
                (self.doc, self.children) = snapshot;
                Err(e)
            }
        }
    }

    async fn pipeline(
        &mut self,
        conn: &libsql::Connection,
        action: Action,
        bundle: &SchemaBundle,
    ) -> Result<(), DocumentError> {
        let schema = &bundle.parent.doctype;
        let is_new = self.doc.is_local();

        // concurrency and transition
        let stored = if schema.is_single {
            self.doc.name = Some(schema.name.clone());
            document_store::lock_state(conn, schema, &schema.name).await?
        } else if is_new {
            None
        } else {
            let name = self.doc.name.clone().unwrap_or_default();
            Some(
                document_store::lock_state(conn, schema, &name)
                    .await?
                    .ok_or_else(|| DocumentError::not_found(schema.name.clone(), name))?,
            )
        };

        if let Some(state) = &stored {
            if !is_new && state.modified != self.doc.modified {
                return Err(DocumentError::timestamp_mismatch(
                    schema.name.clone(),
                    self.doc.display_name(),
                    format_stamp(self.doc.modified),
                    format_stamp(state.modified),
                ));
            }
        }
        let stored_status = stored.as_ref().map(|s| s.docstatus);
        if !action.allowed_from(stored_status) {
            return Err(DocumentError::transition(
                schema.name.clone(),
                self.doc.display_name(),
                action.as_str(),
                stored_status.unwrap_or(self.doc.docstatus),
            ));
        }

        self.service
            .check_permission(action.permission(stored.is_some()), &self.doc)
            .await?;

        if action == Action::Cancel {
            let name = self.doc.name.clone().unwrap_or_default();
            let linked = self
                .service
                .links
                .referencing_records(conn, &schema.name, &name)
                .await?;
            if !linked.is_empty() {
                return Err(DocumentError::link_exists(
                    schema.name.clone(),
                    name,
                    "cancel",
                    linked,
                ));
            }
        }

        self.doc.docstatus = action.target();

        if is_new && !schema.is_single {
            let hook_name = {
                let mut ctx = HookContext {
                    schema,
                    doc: &mut self.doc,
                    children: &mut self.children,
                    conn,
                    user: &self.service.user,
                };
                self.service.registry.autoname(&mut ctx).await?
            };
            let name = self
                .service
                .naming
                .generate_name(conn, schema, &self.doc, hook_name)
                .await?;
            self.doc.name = Some(name);
        }

        self.refresh_children(bundle)?;

        match action {
            Action::Save => {
                if is_new {
                    self.run_hook(HookKind::BeforeInsert, conn, schema).await?;
                }
                self.run_hook(HookKind::Validate, conn, schema).await?;
            }
            Action::Submit => self.run_hook(HookKind::Validate, conn, schema).await?,
            Action::Cancel => self.run_hook(HookKind::BeforeCancel, conn, schema).await?,
            Action::UpdateAfterSubmit => self.check_allow_on_submit(conn, bundle).await?,
        }

        if action != Action::Cancel {
            let missing = self.missing_mandatory(bundle);
            if !missing.is_empty() {
                return Err(DocumentError::mandatory(schema.name.clone(), missing));
            }
            self.check_links(conn, bundle).await?;
        }

        let tolerant = self.service.config.tolerant_writes;
        prepare_values(&mut self.doc, schema, tolerant)?;
        for child in self.children.iter_mut() {
            if let Some(child_schema) = bundle.child(&child.doctype) {
                prepare_values(child, child_schema, tolerant)?;
            }
        }

        let modified = next_modified(stored.as_ref().and_then(|s| s.modified));
        if is_new {
            if self.doc.owner.is_none() {
                self.doc.owner = Some(self.service.user.clone());
            }
            if self.doc.creation.is_none() {
                self.doc.creation = Some(modified);
            }
        }
        self.doc.modified = Some(modified);
        self.doc.modified_by = Some(self.service.user.clone());

        self.persist(conn, bundle, is_new).await?;

        self.run_hook(action.post_hook(), conn, schema).await
    }

    async fn run_hook(
        &mut self,
        kind: HookKind,
        conn: &libsql::Connection,
        schema: &DocType,
    ) -> Result<(), DocumentError> {
        let mut ctx = HookContext {
            schema,
            doc: &mut self.doc,
            children: &mut self.children,
            conn,
            user: &self.service.user,
        };
        self.service.registry.run(kind, &mut ctx).await
    }

    /// Check every child belongs to a Table field of the parent and stamp linkage
    fn refresh_children(&mut self, bundle: &SchemaBundle) -> Result<(), DocumentError> {
        let schema = &bundle.parent.doctype;
        for child in &self.children {
            let parentfield = child.parentfield.as_deref().unwrap_or_default();
            let target = schema
                .field(parentfield)
                .and_then(|f| f.table_target())
                .ok_or_else(|| {
                    DocumentError::validation(format!(
                        "{} has no Table field '{}'",
                        schema.name, parentfield
                    ))
                })?;
            if target != child.doctype {
                return Err(DocumentError::validation(format!(
                    "Rows of {}.{} must be {}, not {}",
                    schema.name, parentfield, target, child.doctype
                )));
            }
        }

        for field in schema.table_fields() {
            let mut group: Vec<&mut Document> = self
                .children
                .iter_mut()
                .filter(|c| c.parentfield.as_deref() == Some(field.fieldname.as_str()))
                .collect();
            stamp_children(&self.doc, &field.fieldname, &mut group);
        }
        Ok(())
    }

    /// Required fields left blank, parent first, then child rows
    fn missing_mandatory(&self, bundle: &SchemaBundle) -> Vec<String> {
        let schema = &bundle.parent.doctype;
        let mut missing = Vec::new();

        for field in schema.fields.iter().filter(|f| f.reqd) {
            let absent = if field.fieldtype == FieldKind::Table {
                self.children_of(&field.fieldname).next().is_none()
            } else {
                field.fieldtype.has_column() && self.doc.is_blank(&field.fieldname)
            };
            if absent {
                missing.push(field.fieldname.clone());
            }
        }

        for child in &self.children {
            let Some(child_schema) = bundle.child(&child.doctype) else {
                continue;
            };
            for field in child_schema.column_fields().filter(|f| f.reqd) {
                if child.is_blank(&field.fieldname) {
                    missing.push(format!(
                        "{} row #{}: {}",
                        child.parentfield.as_deref().unwrap_or_default(),
                        child.idx.unwrap_or_default(),
                        field.fieldname
                    ));
                }
            }
        }

        missing
    }

    async fn check_links(
        &mut self,
        conn: &libsql::Connection,
        bundle: &SchemaBundle,
    ) -> Result<(), DocumentError> {
        let mode = self.link_mode;
        let mut invalid: Vec<String> = self
            .service
            .links
            .validate_links(conn, &bundle.parent.doctype, &mut self.doc, mode)
            .await?
            .iter()
            .map(ToString::to_string)
            .collect();

        for child in self.children.iter_mut() {
            let Some(child_schema) = bundle.child(&child.doctype) else {
                continue;
            };
            let prefix = format!(
                "{} row #{}",
                child.parentfield.as_deref().unwrap_or_default(),
                child.idx.unwrap_or_default()
            );
            for link in self
                .service
                .links
                .validate_links(conn, child_schema, child, mode)
                .await?
            {
                invalid.push(format!("{}: {}", prefix, link));
            }
        }

        if invalid.is_empty() {
            return Ok(());
        }
        match mode {
            LinkMode::Strict => Err(DocumentError::invalid_links(invalid)),
            LinkMode::Lenient => {
                tracing::warn!(
                    "Cleared unresolved links on {} {}: {}",
                    self.doc.doctype,
                    self.doc.display_name(),
                    invalid.join(", ")
                );
                Ok(())
            }
        }
    }

    /// Refuse changes to fields not flagged `allow_on_submit`
    ///
    /// Child rows are locked too: unless their Table field allows changes
    /// after submission, rows may not be added, removed or reordered, and only
    /// `allow_on_submit` columns of existing rows may change.
    async fn check_allow_on_submit(
        &self,
        conn: &libsql::Connection,
        bundle: &SchemaBundle,
    ) -> Result<(), DocumentError> {
        let schema = &bundle.parent.doctype;
        let name = self.doc.name.clone().unwrap_or_default();
        let (stored, stored_children) = load_with_children(conn, bundle, &name).await?;

        let mut changed = changed_fields(schema, &stored, &self.doc);

        for field in schema.table_fields().filter(|f| !f.allow_on_submit) {
            let Some(child_schema) = field.table_target().and_then(|t| bundle.child(t)) else {
                continue;
            };
            let before: Vec<&Document> = stored_children
                .iter()
                .filter(|c| c.parentfield.as_deref() == Some(field.fieldname.as_str()))
                .collect();
            let after: Vec<&Document> = self.children_of(&field.fieldname).collect();

            let same_rows = before.len() == after.len()
                && before
                    .iter()
                    .zip(&after)
                    .all(|(old, new)| !new.is_local() && old.name == new.name);
            if !same_rows {
                changed.push(field.fieldname.clone());
                continue;
            }

            for (old, new) in before.iter().zip(&after) {
                for fieldname in changed_fields(child_schema, old, new) {
                    changed.push(format!(
                        "{} row #{}: {}",
                        field.fieldname,
                        new.idx.unwrap_or_default(),
                        fieldname
                    ));
                }
            }
        }

        if changed.is_empty() {
            Ok(())
        } else {
            Err(DocumentError::validation(format!(
                "Not allowed to change {} after submission",
                changed.join(", ")
            )))
        }
    }

    async fn persist(
        &mut self,
        conn: &libsql::Connection,
        bundle: &SchemaBundle,
        is_new: bool,
    ) -> Result<(), DocumentError> {
        let schema = &bundle.parent.doctype;
        let name = self.doc.name.clone().unwrap_or_default();

        if schema.is_single {
            document_store::write_single(conn, schema, &self.doc).await?;
        } else if is_new {
            document_store::insert_row(conn, schema, &self.doc)
                .await
                .map_err(|e| DocumentError::from_insert(&schema.name, &name, e))?;
        } else if document_store::update_row(conn, schema, &self.doc).await? == 0 {
            return Err(DocumentError::not_found(schema.name.clone(), name));
        }
        self.doc.mark_persisted();

        for field in schema.table_fields() {
            let Some(target) = field.table_target() else {
                continue;
            };
            let child_schema = bundle
                .child(target)
                .ok_or_else(|| DocumentError::not_found("DocType", target))?;
            let mut group: Vec<&mut Document> = self
                .children
                .iter_mut()
                .filter(|c| c.parentfield.as_deref() == Some(field.fieldname.as_str()))
                .collect();
            self.service
                .children
                .reconcile(conn, &self.doc, child_schema, &field.fieldname, &mut group)
                .await?;
        }
        Ok(())
    }
}

/// Coerce values to their field kinds; drop or reject keys that are not columns
fn prepare_values(doc: &mut Document, schema: &DocType, tolerant: bool) -> Result<(), DocumentError> {
    let unknown = document_store::unknown_fields(schema, doc);
    if !unknown.is_empty() {
        if !tolerant {
            return Err(DocumentError::validation(format!(
                "{} has no fields named {}",
                schema.name,
                unknown.join(", ")
            )));
        }
        tracing::debug!("Dropping unknown fields of {}: {}", schema.name, unknown.join(", "));
        for field in &unknown {
            doc.remove(field);
        }
    }

    for field in schema.column_fields() {
        if let Some(value) = doc.remove(&field.fieldname) {
            doc.set(field.fieldname.clone(), value.coerce(field.fieldtype));
        }
    }
    Ok(())
}

/// Column fields not flagged `allow_on_submit` whose values differ
fn changed_fields(schema: &DocType, before: &Document, after: &Document) -> Vec<String> {
    schema
        .column_fields()
        .filter(|f| !f.allow_on_submit)
        .filter(|f| {
            normalized(before.get(&f.fieldname), f.fieldtype)
                != normalized(after.get(&f.fieldname), f.fieldtype)
        })
        .map(|f| f.fieldname.clone())
        .collect()
}

fn normalized(value: Option<&Value>, kind: FieldKind) -> Option<Value> {
    value
        .cloned()
        .map(|v| v.coerce(kind))
        .filter(|v| !v.is_empty())
}
