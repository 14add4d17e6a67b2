//! Service Layer Error Types
//!
//! This module defines error types for document and schema operations. Every
//! variant renders a human-readable message; aggregated variants (mandatory
//! fields, invalid links) list every offender.

use crate::db::DatabaseError;
use crate::models::DocStatus;
use thiserror::Error;

/// Document and schema operation errors
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Record (or type definition) not found
    #[error("{doctype} {name} not found")]
    RecordNotFound { doctype: String, name: String },

    /// Identity could not be assigned (duplicate, unresolvable rule)
    #[error("Name error: {0}")]
    NameError(String),

    /// Business validation failed
    #[error("Validation failed: {0}")]
    ValidationError(String),

    /// Required fields are missing
    #[error("Mandatory fields required in {doctype}: {}", .fields.join(", "))]
    MandatoryError { doctype: String, fields: Vec<String> },

    /// The document changed in storage after it was loaded
    #[error("Document {doctype} {name} has been modified after you opened it (loaded {expected}, stored {actual}); reload and try again")]
    TimestampMismatchError {
        doctype: String,
        name: String,
        expected: String,
        actual: String,
    },

    /// The requested lifecycle operation is not allowed from the stored status
    #[error("Cannot {action} {doctype} {name} while {status}")]
    DocstatusTransitionError {
        doctype: String,
        name: String,
        action: String,
        status: DocStatus,
    },

    /// The acting user may not perform the operation
    #[error("Not permitted: {user} cannot {action} {doctype} {name}")]
    BeanPermissionError {
        doctype: String,
        name: String,
        action: String,
        user: String,
    },

    /// Other non-cancelled records still reference the document
    #[error("Cannot {action} {doctype} {name}: linked with {}", .linked_with.join(", "))]
    LinkExistsError {
        doctype: String,
        name: String,
        action: String,
        linked_with: Vec<String>,
    },

    /// Link fields point at records that do not exist
    #[error("Could not find {}", .links.join(", "))]
    InvalidLinks { links: Vec<String> },

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),
}

impl DocumentError {
    /// Create a record not found error
    pub fn not_found(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self::RecordNotFound {
            doctype: doctype.into(),
            name: name.into(),
        }
    }

    /// Create a name error
    pub fn name_error(msg: impl Into<String>) -> Self {
        Self::NameError(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a mandatory error naming every missing field
    pub fn mandatory(doctype: impl Into<String>, fields: Vec<String>) -> Self {
        Self::MandatoryError {
            doctype: doctype.into(),
            fields,
        }
    }

    /// Create a timestamp mismatch error
    pub fn timestamp_mismatch(
        doctype: impl Into<String>,
        name: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TimestampMismatchError {
            doctype: doctype.into(),
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a docstatus transition error
    pub fn transition(
        doctype: impl Into<String>,
        name: impl Into<String>,
        action: impl Into<String>,
        status: DocStatus,
    ) -> Self {
        Self::DocstatusTransitionError {
            doctype: doctype.into(),
            name: name.into(),
            action: action.into(),
            status,
        }
    }

    /// Create a permission error
    pub fn permission(
        doctype: impl Into<String>,
        name: impl Into<String>,
        action: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self::BeanPermissionError {
            doctype: doctype.into(),
            name: name.into(),
            action: action.into(),
            user: user.into(),
        }
    }

    /// Create a link exists error
    pub fn link_exists(
        doctype: impl Into<String>,
        name: impl Into<String>,
        action: impl Into<String>,
        linked_with: Vec<String>,
    ) -> Self {
        Self::LinkExistsError {
            doctype: doctype.into(),
            name: name.into(),
            action: action.into(),
            linked_with,
        }
    }

    /// Create an invalid links error from `field = value` entries
    pub fn invalid_links(links: Vec<String>) -> Self {
        Self::InvalidLinks { links }
    }

    /// Map a store error raised while inserting `name`
    ///
    /// Duplicate keys become `NameError`; anything else stays a database error.
    pub fn from_insert(doctype: &str, name: &str, err: DatabaseError) -> Self {
        if err.is_duplicate_key() {
            Self::name_error(format!("{} {} already exists", doctype, name))
        } else {
            Self::Database(err)
        }
    }

    /// True for errors raised before anything was written
    pub fn is_validation_category(&self) -> bool {
        matches!(
            self,
            Self::NameError(_)
                | Self::ValidationError(_)
                | Self::MandatoryError { .. }
                | Self::InvalidLinks { .. }
                | Self::LinkExistsError { .. }
        )
    }
}
