//! Data Models
//!
//! This module contains the core data structures of the document layer:
//!
//! - `Value` - Typed field value stored in a document's field bag
//! - `DocType` / `DocField` - Runtime-defined record type definitions
//! - `CustomField` / `PropertySetter` - User customizations merged at read time
//! - `Document` - One record instance with audit and lifecycle fields
//!
//! Record types are data, not code: every table layout is derived from the
//! effective `DocType` assembled by the schema service.

mod customization;
mod doctype;
mod document;
mod value;

pub use customization::{CustomField, PropertySetter};
pub use doctype::{
    validate_doctype_name, validate_fieldname, DocField, DocType, FieldKind, NameCase,
    PropertyOutcome,
};
pub use document::{DocStatus, Document, AMENDED_FROM, STANDARD_FIELDS};
pub use value::{format_datetime, parse_date, parse_datetime, Value, DATETIME_FORMAT, DATE_FORMAT};
