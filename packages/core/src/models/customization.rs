//! User Customization Records
//!
//! End users never edit base [`DocType`](crate::models::DocType) rows. Their
//! changes are stored as two kinds of patch records, merged at read time:
//!
//! - [`CustomField`] - an extra field appended to a type
//! - [`PropertySetter`] - a replacement value for one property of one field,
//!   or of the type itself when `field_name` is `None`

use crate::models::DocField;
use serde::{Deserialize, Serialize};

/// A user-added field on an existing type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    /// Type the field extends
    pub dt: String,

    #[serde(flatten)]
    pub field: DocField,
}

impl CustomField {
    pub fn new(dt: impl Into<String>, field: DocField) -> Self {
        Self {
            dt: dt.into(),
            field,
        }
    }

    /// Identity of the custom field record (`<dt>-<fieldname>`)
    pub fn name(&self) -> String {
        format!("{}-{}", self.dt, self.field.fieldname)
    }
}

/// Override of one property of a type or one of its fields
///
/// At most one setter exists per `(doc_type, field_name, property)` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySetter {
    pub doc_type: String,

    /// Target field, or `None` for a type-level property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,

    pub property: String,

    /// Replacement value in string form
    pub value: String,
}

impl PropertySetter {
    /// Field-level override
    pub fn for_field(
        doc_type: impl Into<String>,
        field_name: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            doc_type: doc_type.into(),
            field_name: Some(field_name.into()),
            property: property.into(),
            value: value.into(),
        }
    }

    /// Type-level override
    pub fn for_doctype(
        doc_type: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            doc_type: doc_type.into(),
            field_name: None,
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn is_doctype_level(&self) -> bool {
        self.field_name.is_none()
    }
}
