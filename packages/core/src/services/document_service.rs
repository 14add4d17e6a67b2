//! Document Service
//!
//! Entry point for record access. Owns the shared engine parts (database,
//! schema assembler, naming engine, behavior registry, permission checker)
//! and hands them to [`Bean`]s, which run the lifecycle pipeline.
//!
//! The service is cheap to clone; [`DocumentService::with_user`] returns a
//! clone acting as another user.

use crate::behaviors::BehaviorRegistry;
use crate::config::DocStoreConfig;
use crate::db::{document_store, DatabaseService};
use crate::models::{format_datetime, DocType, Document, Value};
use crate::services::bean::next_modified;
use crate::services::{
    AllowAll, Bean, ChildSynchronizer, DocumentError, LinkValidator, NamingEngine,
    PermissionAction, PermissionChecker, SchemaAssembler, SchemaBundle, SchemaCache,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Record access and lifecycle entry point
///
/// # Examples
///
/// ```no_run
/// use docspace_core::config::DocStoreConfig;
/// use docspace_core::models::{DocField, DocType, FieldKind};
/// use docspace_core::services::DocumentService;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = DocumentService::open("./data/docs.db".into(), DocStoreConfig::default()).await?;
///
///     service
///         .assembler()
///         .install_doctype(
///             DocType::new("Customer")
///                 .with_autoname("CUST-.#####")
///                 .with_field(DocField::new("customer_name", FieldKind::Data).required()),
///         )
///         .await?;
///
///     let mut customer = service.new_bean("Customer").await?;
///     customer.set("customer_name", "Acme Corp");
///     customer.save().await?;
///     println!("Created {}", customer.name().unwrap_or_default());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DocumentService {
    pub(crate) db: Arc<DatabaseService>,
    pub(crate) config: Arc<DocStoreConfig>,
    pub(crate) assembler: SchemaAssembler,
    pub(crate) naming: NamingEngine,
    pub(crate) links: LinkValidator,
    pub(crate) children: ChildSynchronizer,
    pub(crate) registry: Arc<BehaviorRegistry>,
    pub(crate) permissions: Arc<dyn PermissionChecker>,

    /// Acting user recorded in audit fields and passed to permission checks
    pub(crate) user: String,
}

impl DocumentService {
    /// Create a service over an open database
    pub fn new(db: Arc<DatabaseService>, config: DocStoreConfig) -> Result<Self, DocumentError> {
        config.validate().map_err(DocumentError::validation)?;
        let config = Arc::new(config);
        let assembler = SchemaAssembler::new(db.clone(), SchemaCache::new());
        let naming = NamingEngine::new(config.clone());

        Ok(Self {
            user: config.default_user.clone(),
            links: LinkValidator::new(assembler.clone()),
            children: ChildSynchronizer::new(naming.clone()),
            db,
            config,
            assembler,
            naming,
            registry: Arc::new(BehaviorRegistry::new()),
            permissions: Arc::new(AllowAll),
        })
    }

    /// Open (or create) the database at `path` and build a service over it
    pub async fn open(path: PathBuf, config: DocStoreConfig) -> Result<Self, DocumentError> {
        let db = Arc::new(DatabaseService::with_config(path, &config).await?);
        Self::new(db, config)
    }

    /// Replace the behavior registry
    pub fn with_registry(mut self, registry: BehaviorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Replace the permission checker
    pub fn with_permissions(mut self, permissions: impl PermissionChecker + 'static) -> Self {
        self.permissions = Arc::new(permissions);
        self
    }

    /// Clone of this service acting as `user`
    pub fn with_user(&self, user: impl Into<String>) -> Self {
        let mut scoped = self.clone();
        scoped.user = user.into();
        scoped
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn config(&self) -> &DocStoreConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    /// Schema administration (install types, custom fields, property setters)
    pub fn assembler(&self) -> &SchemaAssembler {
        &self.assembler
    }

    pub(crate) async fn check_permission(
        &self,
        action: PermissionAction,
        doc: &Document,
    ) -> Result<(), DocumentError> {
        if self
            .permissions
            .has_permission(&self.user, &doc.doctype, action, doc)
            .await
        {
            return Ok(());
        }
        tracing::warn!(
            "Permission denied: {} cannot {} {} {}",
            self.user,
            action,
            doc.doctype,
            doc.display_name()
        );
        Err(DocumentError::permission(
            doc.doctype.clone(),
            doc.display_name().to_string(),
            action.as_str(),
            self.user.clone(),
        ))
    }

    /// A fresh local bean with schema defaults applied
    ///
    /// Single types are named after themselves.
    pub async fn new_bean(&self, doctype: &str) -> Result<Bean, DocumentError> {
        let bundle = self.assembler.assemble_bundle(doctype).await?;
        let schema = &bundle.parent.doctype;
        if schema.is_child_table {
            return Err(DocumentError::validation(format!(
                "{} is a child table and can only be saved through its parent",
                doctype
            )));
        }

        let mut doc = Document::new(doctype);
        doc.apply_defaults(schema);
        if schema.is_single {
            doc.name = Some(schema.name.clone());
        }
        Ok(Bean::from_parts(self.clone(), doc, Vec::new()))
    }

    /// A fresh local bean with defaults applied, then `initial_fields` on top
    pub async fn new_bean_with<I, K, V>(
        &self,
        doctype: &str,
        initial_fields: I,
    ) -> Result<Bean, DocumentError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut bean = self.new_bean(doctype).await?;
        for (field, value) in initial_fields {
            bean.set(field, value);
        }
        Ok(bean)
    }

    /// Load a stored document with all of its child rows
    pub async fn load_bean(&self, doctype: &str, name: &str) -> Result<Bean, DocumentError> {
        let bundle = self.assembler.assemble_bundle(doctype).await?;
        let conn = self.db.connect_with_timeout().await?;
        let (doc, children) = load_with_children(&conn, &bundle, name).await?;
        Ok(Bean::from_parts(self.clone(), doc, children))
    }

    /// Load the parent row of a stored document
    pub async fn get_document(&self, doctype: &str, name: &str) -> Result<Document, DocumentError> {
        let schema = self.assembler.assemble(doctype).await?;
        let conn = self.db.connect_with_timeout().await?;
        load_parent(&conn, &schema.doctype, name).await
    }

    /// Delete a stored document and its child rows
    pub async fn delete_document(&self, doctype: &str, name: &str) -> Result<(), DocumentError> {
        self.load_bean(doctype, name).await?.delete().await
    }

    pub async fn exists(&self, doctype: &str, name: &str) -> Result<bool, DocumentError> {
        let schema = self.assembler.assemble(doctype).await?;
        let conn = self.db.connect_with_timeout().await?;
        if schema.doctype.is_single {
            return Ok(name == schema.doctype.name
                && document_store::lock_state(&conn, &schema.doctype, name)
                    .await?
                    .is_some());
        }
        Ok(document_store::exists(&conn, doctype, name).await?)
    }

    /// One column of one record; `None` when the record does not exist
    pub async fn get_value(
        &self,
        doctype: &str,
        name: &str,
        field: &str,
    ) -> Result<Option<Value>, DocumentError> {
        let schema = self.assembler.assemble(doctype).await?;
        check_column(&schema.doctype, field)?;
        if schema.doctype.is_single {
            return self.get_single_value(doctype, field).await;
        }

        let conn = self.db.connect_with_timeout().await?;
        Ok(document_store::get_value(&conn, &schema.doctype, name, field).await?)
    }

    /// One value of a single type; `None` when it was never saved
    pub async fn get_single_value(
        &self,
        doctype: &str,
        field: &str,
    ) -> Result<Option<Value>, DocumentError> {
        let schema = self.assembler.assemble(doctype).await?;
        check_single(&schema.doctype)?;
        check_column(&schema.doctype, field)?;

        let conn = self.db.connect_with_timeout().await?;
        let Some(doc) = document_store::load_single(&conn, &schema.doctype).await? else {
            return Ok(None);
        };
        Ok(match field {
            "name" => doc.name.map(Value::from),
            "owner" => doc.owner.map(Value::from),
            "modified_by" => doc.modified_by.map(Value::from),
            "creation" => doc.creation.map(Value::Datetime),
            "modified" => doc.modified.map(Value::Datetime),
            "docstatus" => Some(Value::Int(doc.docstatus.as_i64())),
            _ => doc.get(field).cloned(),
        })
    }

    /// Write one value of a single type, bumping its modification stamp
    pub async fn set_single_value(
        &self,
        doctype: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), DocumentError> {
        let schema = self.assembler.assemble(doctype).await?;
        check_single(&schema.doctype)?;
        let kind = schema
            .doctype
            .field(field)
            .filter(|f| f.fieldtype.has_column())
            .map(|f| f.fieldtype)
            .ok_or_else(|| {
                DocumentError::validation(format!("Field {} does not exist in {}", field, doctype))
            })?;
        let value = value.into().coerce(kind);

        let conn = self.db.begin_write().await?;
        let result = self
            .set_single_value_rows(&conn, &schema.doctype, field, &value)
            .await;
        DatabaseService::finish(&conn, result).await?;

        tracing::debug!("Set {}.{}", doctype, field);
        Ok(())
    }

    async fn set_single_value_rows(
        &self,
        conn: &libsql::Connection,
        schema: &DocType,
        field: &str,
        value: &Value,
    ) -> Result<(), DocumentError> {
        let current = document_store::lock_state(conn, schema, &schema.name).await?;
        let mut probe = Document::new(schema.name.clone());
        probe.name = Some(schema.name.clone());
        let action = if current.is_some() {
            PermissionAction::Write
        } else {
            PermissionAction::Create
        };
        self.check_permission(action, &probe).await?;

        let modified = next_modified(current.and_then(|s| s.modified));
        document_store::set_single_field(conn, &schema.name, field, value).await?;
        document_store::set_single_field(
            conn,
            &schema.name,
            "modified",
            &Value::Text(format_datetime(&modified)),
        )
        .await?;
        document_store::set_single_field(
            conn,
            &schema.name,
            "modified_by",
            &Value::Text(self.user.clone()),
        )
        .await?;
        Ok(())
    }

    /// Rename a record, its child rows' back-references and every Link to it
    ///
    /// Returns the final (validated, cased) new name.
    pub async fn rename_document(
        &self,
        doctype: &str,
        old: &str,
        new: &str,
    ) -> Result<String, DocumentError> {
        let bundle = self.assembler.assemble_bundle(doctype).await?;
        let schema = &bundle.parent.doctype;
        if schema.is_single || schema.is_child_table {
            return Err(DocumentError::validation(format!("{} cannot be renamed", doctype)));
        }

        let new = self.naming.validate_name(&schema.name_case.apply(new.trim()))?;
        if new == old {
            return Ok(new);
        }

        let conn = self.db.begin_write().await?;
        let result = self.rename_rows(&conn, schema, old, &new).await;
        let rewritten = DatabaseService::finish(&conn, result).await?;

        tracing::info!(
            "Renamed {} {} to {} ({} links rewritten)",
            doctype,
            old,
            new,
            rewritten
        );
        Ok(new)
    }

    async fn rename_rows(
        &self,
        conn: &libsql::Connection,
        schema: &DocType,
        old: &str,
        new: &str,
    ) -> Result<u64, DocumentError> {
        let doc = document_store::load_row(conn, schema, old)
            .await?
            .ok_or_else(|| DocumentError::not_found(schema.name.clone(), old))?;
        self.check_permission(PermissionAction::Write, &doc).await?;

        if document_store::exists(conn, &schema.name, new).await? {
            return Err(DocumentError::name_error(format!(
                "{} {} already exists",
                schema.name, new
            )));
        }

        document_store::rename_row(conn, &schema.name, old, new).await?;
        for field in schema.table_fields() {
            if let Some(target) = field.table_target() {
                document_store::repoint_children(conn, target, &schema.name, old, new).await?;
            }
        }
        self.links
            .rewrite_inbound_links(conn, &schema.name, old, new)
            .await
    }
}

impl fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentService")
            .field("db", &self.db.db_path)
            .field("user", &self.user)
            .field("registry", &self.registry)
            .finish()
    }
}

fn check_single(schema: &DocType) -> Result<(), DocumentError> {
    if schema.is_single {
        Ok(())
    } else {
        Err(DocumentError::validation(format!("{} is not a single DocType", schema.name)))
    }
}

fn check_column(schema: &DocType, field: &str) -> Result<(), DocumentError> {
    if document_store::is_column(schema, field) {
        Ok(())
    } else {
        Err(DocumentError::validation(format!(
            "Field {} does not exist in {}",
            field, schema.name
        )))
    }
}

/// Parent row (or single record) by name
pub(crate) async fn load_parent(
    conn: &libsql::Connection,
    schema: &DocType,
    name: &str,
) -> Result<Document, DocumentError> {
    let doc = if schema.is_single {
        document_store::load_single(conn, schema).await?
    } else {
        document_store::load_row(conn, schema, name).await?
    };
    doc.ok_or_else(|| DocumentError::not_found(schema.name.clone(), name))
}

/// Parent plus child rows of every Table field, in field order then `idx`
pub(crate) async fn load_with_children(
    conn: &libsql::Connection,
    bundle: &SchemaBundle,
    name: &str,
) -> Result<(Document, Vec<Document>), DocumentError> {
    let schema = &bundle.parent.doctype;
    let doc = load_parent(conn, schema, name).await?;
    let parent_name = doc.name.clone().unwrap_or_else(|| name.to_string());

    let mut children = Vec::new();
    for field in schema.table_fields() {
        let Some(child_schema) = field.table_target().and_then(|t| bundle.child(t)) else {
            continue;
        };
        children.extend(
            document_store::load_children(
                conn,
                child_schema,
                &schema.name,
                &parent_name,
                &field.fieldname,
            )
            .await?,
        );
    }
    Ok((doc, children))
}
