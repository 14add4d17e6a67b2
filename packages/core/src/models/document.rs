//! Document Data Structures
//!
//! A [`Document`] is one record instance of a [`DocType`](crate::models::DocType).
//!
//! # Architecture
//!
//! - **Standard fields** (identity, audit, lifecycle, child back-references) are
//!   typed struct members and map to the standard columns of every table.
//! - **Field bag**: every schema-defined field lives in an ordered
//!   `BTreeMap<String, Value>` accessed through [`Document::get`] and
//!   [`Document::set`]. The set of names is decided at runtime by the
//!   effective schema.
//! - **Local documents**: a freshly constructed document is *local* (never
//!   persisted) and identified by a temporary marker until the naming engine
//!   assigns its final `name` on first insert.
//!
//! # Examples
//!
//! ```rust
//! use docspace_core::models::{Document, DocStatus, Value};
//!
//! let mut invoice = Document::new("Sales Invoice");
//! invoice.set("customer", "CUST-0001");
//! invoice.set("grand_total", 125.5);
//!
//! assert!(invoice.is_local());
//! assert_eq!(invoice.docstatus, DocStatus::Draft);
//! assert_eq!(invoice.get_str("customer"), Some("CUST-0001"));
//! assert_eq!(invoice.get("grand_total"), Some(&Value::Float(125.5)));
//! ```

use crate::models::{DocType, FieldKind, Value};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Columns present on every document table, in storage order
pub const STANDARD_FIELDS: [&str; 10] = [
    "name",
    "owner",
    "creation",
    "modified",
    "modified_by",
    "docstatus",
    "parent",
    "parenttype",
    "parentfield",
    "idx",
];

/// Value-bag key naming the cancelled document an amendment replaces
pub const AMENDED_FROM: &str = "amended_from";

/// Lifecycle status of a document
///
/// Only ever advances `Draft -> Submitted -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(into = "i64", try_from = "i64")]
pub enum DocStatus {
    #[default]
    Draft,
    Submitted,
    Cancelled,
}

impl DocStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            DocStatus::Draft => 0,
            DocStatus::Submitted => 1,
            DocStatus::Cancelled => 2,
        }
    }
}

impl From<DocStatus> for i64 {
    fn from(status: DocStatus) -> Self {
        status.as_i64()
    }
}

impl TryFrom<i64> for DocStatus {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DocStatus::Draft),
            1 => Ok(DocStatus::Submitted),
            2 => Ok(DocStatus::Cancelled),
            other => Err(format!("Invalid docstatus {}", other)),
        }
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DocStatus::Draft => "Draft",
            DocStatus::Submitted => "Submitted",
            DocStatus::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// One record instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Owning type
    pub doctype: String,

    /// Identity (primary key); `None` until first insert
    pub name: Option<String>,

    pub owner: Option<String>,

    pub creation: Option<NaiveDateTime>,

    /// Last modification timestamp, the optimistic concurrency token
    pub modified: Option<NaiveDateTime>,

    pub modified_by: Option<String>,

    pub docstatus: DocStatus,

    /// Owning parent's name (child rows only)
    pub parent: Option<String>,

    /// Owning parent's type (child rows only)
    pub parenttype: Option<String>,

    /// Table field on the parent this row populates (child rows only)
    pub parentfield: Option<String>,

    /// 1-based position within the parentfield group (child rows only)
    pub idx: Option<i64>,

    /// Schema-defined field values
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,

    #[serde(skip, default = "default_local")]
    local: bool,

    #[serde(skip)]
    local_marker: String,
}

fn default_local() -> bool {
    false
}

impl Document {
    /// Create a local (unsaved) document
    pub fn new(doctype: impl Into<String>) -> Self {
        let doctype = doctype.into();
        let local_marker = format!("new-{}-{}", slug(&doctype), Uuid::new_v4().simple());
        Self {
            doctype,
            name: None,
            owner: None,
            creation: None,
            modified: None,
            modified_by: None,
            docstatus: DocStatus::Draft,
            parent: None,
            parenttype: None,
            parentfield: None,
            idx: None,
            fields: BTreeMap::new(),
            local: true,
            local_marker,
        }
    }

    /// Create a local child row for the given Table field
    pub fn new_child(doctype: impl Into<String>, parentfield: impl Into<String>) -> Self {
        let mut doc = Self::new(doctype);
        doc.parentfield = Some(parentfield.into());
        doc
    }

    /// Create a local document from initial field values
    pub fn with_fields<I, K, V>(doctype: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut doc = Self::new(doctype);
        for (key, value) in fields {
            doc.set(key, value);
        }
        doc
    }

    /// Build a document read back from storage (not local)
    pub(crate) fn persisted(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        let mut doc = Self::new(doctype);
        doc.name = Some(name.into());
        doc.local = false;
        doc
    }

    /// True until the document has been inserted
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Mark the document as persisted after a successful insert
    pub(crate) fn mark_persisted(&mut self) {
        self.local = false;
    }

    /// Temporary marker used to refer to the document before it has a name
    pub fn local_marker(&self) -> &str {
        &self.local_marker
    }

    /// Name, or the local marker for unnamed documents
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.local_marker)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Text value of a field, if it holds text
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// Set a schema field value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// True when the field is absent, null or blank
    pub fn is_blank(&self, field: &str) -> bool {
        self.fields.get(field).map_or(true, Value::is_empty)
    }

    /// Fill unset fields from their schema defaults
    ///
    /// `Today` / `Now` defaults resolve to the current local date / time.
    pub fn apply_defaults(&mut self, schema: &DocType) {
        for field in schema.column_fields() {
            let Some(default) = field.default.as_deref() else {
                continue;
            };
            if !self.is_blank(&field.fieldname) {
                continue;
            }
            let value = match (field.fieldtype, default.trim()) {
                (FieldKind::Date, "Today") => Value::Date(Local::now().date_naive()),
                (FieldKind::Datetime, "Now") => Value::Datetime(Local::now().naive_local()),
                (kind, raw) => Value::from(raw).coerce(kind),
            };
            self.fields.insert(field.fieldname.clone(), value);
        }
    }

    /// Copy this document into a new local document
    ///
    /// Identity, audit fields and lifecycle status are reset; field values and
    /// child back-references to the parentfield are kept.
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new(self.doctype.clone());
        copy.fields = self.fields.clone();
        copy.parentfield = self.parentfield.clone();
        copy.idx = self.idx;
        copy
    }
}

fn slug(doctype: &str) -> String {
    doctype.to_lowercase().replace(' ', "-")
}
