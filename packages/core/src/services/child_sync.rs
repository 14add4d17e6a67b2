//! Child Collection Synchronization
//!
//! Reconciles the child rows of one Table field with the stored rows: the
//! desired list is stamped with its parent linkage and renumbered, written by
//! name, and stored rows missing from the list are deleted.

use crate::db::document_store;
use crate::models::{DocType, Document};
use crate::services::{DocumentError, NamingEngine};

/// Counts of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: u64,
}

#[derive(Debug, Clone)]
pub struct ChildSynchronizer {
    naming: NamingEngine,
}

/// Stamp parent linkage, `idx` (1-based, list order) and lifecycle status
///
/// Audit fields missing on a child are taken from the parent.
pub fn stamp_children(parent: &Document, parentfield: &str, children: &mut [&mut Document]) {
    for (position, child) in children.iter_mut().enumerate() {
        child.parent = parent.name.clone();
        child.parenttype = Some(parent.doctype.clone());
        child.parentfield = Some(parentfield.to_string());
        child.idx = Some(position as i64 + 1);
        child.docstatus = parent.docstatus;
        if child.owner.is_none() {
            child.owner = parent.owner.clone();
        }
        if child.creation.is_none() {
            child.creation = parent.modified;
        }
        child.modified = parent.modified;
        child.modified_by = parent.modified_by.clone();
    }
}

impl ChildSynchronizer {
    pub fn new(naming: NamingEngine) -> Self {
        Self { naming }
    }

    /// Make the stored rows of `parentfield` under `parent` equal `children`
    ///
    /// Unnamed children are named by the child type's rule. Local children are
    /// inserted; persisted ones are updated, and inserted if their row is gone.
    pub async fn reconcile(
        &self,
        conn: &libsql::Connection,
        parent: &Document,
        child_schema: &DocType,
        parentfield: &str,
        children: &mut [&mut Document],
    ) -> Result<ReconcileOutcome, DocumentError> {
        let parent_name = parent
            .name
            .clone()
            .ok_or_else(|| DocumentError::name_error("Parent must be named before its children"))?;

        stamp_children(parent, parentfield, children);

        let mut outcome = ReconcileOutcome::default();
        let mut keep = Vec::with_capacity(children.len());

        for child in children.iter_mut() {
            if child.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                let name = self
                    .naming
                    .generate_name(conn, child_schema, child, None)
                    .await?;
                child.name = Some(name);
            }
            let name = child.name.clone().unwrap_or_default();

            let inserted = if child.is_local() {
                document_store::insert_row(conn, child_schema, child)
                    .await
                    .map_err(|e| DocumentError::from_insert(&child_schema.name, &name, e))?;
                true
            } else if document_store::update_row(conn, child_schema, child).await? == 0 {
                document_store::insert_row(conn, child_schema, child)
                    .await
                    .map_err(|e| DocumentError::from_insert(&child_schema.name, &name, e))?;
                true
            } else {
                false
            };

            if inserted {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
            child.mark_persisted();
            keep.push(name);
        }

        outcome.deleted = document_store::delete_children_except(
            conn,
            &child_schema.name,
            &parent.doctype,
            &parent_name,
            parentfield,
            &keep,
        )
        .await?;

        tracing::debug!(
            "Reconciled {}.{} of {}: {} inserted, {} updated, {} deleted",
            parent.doctype,
            parentfield,
            parent_name,
            outcome.inserted,
            outcome.updated,
            outcome.deleted
        );
        Ok(outcome)
    }
}
