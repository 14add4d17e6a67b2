//! Document Behavior System
//!
//! This module provides the trait-based behavior system for record types:
//!
//! - `DocumentBehavior` trait - type-specific validation, naming and side effects
//! - `HookKind` - the closed set of lifecycle hooks
//! - `BehaviorRegistry` - behaviors registered per type plus catalog-wide ones
//!
//! Hooks run inside the write transaction of the lifecycle operation that
//! triggers them, through the connection in [`HookContext`]. An error returned
//! by any hook aborts the operation and rolls everything back.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use docspace_core::behaviors::{BehaviorRegistry, DocumentBehavior, HookContext};
//! use docspace_core::services::DocumentError;
//!
//! struct TaskBehavior;
//!
//! #[async_trait]
//! impl DocumentBehavior for TaskBehavior {
//!     async fn validate(&self, ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
//!         if ctx.doc.get_i64("priority").unwrap_or(0) > 5 {
//!             return Err(DocumentError::validation("priority must be at most 5"));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = BehaviorRegistry::new();
//! registry.register("Task", TaskBehavior);
//! assert!(registry.has_behaviors("Task"));
//! ```

use crate::models::{DocType, Document};
use crate::services::DocumentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lifecycle hooks a behavior can implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Validate,
    BeforeInsert,
    OnUpdate,
    OnSubmit,
    BeforeCancel,
    OnCancel,
    OnUpdateAfterSubmit,
}

impl HookKind {
    pub const ALL: [HookKind; 7] = [
        HookKind::Validate,
        HookKind::BeforeInsert,
        HookKind::OnUpdate,
        HookKind::OnSubmit,
        HookKind::BeforeCancel,
        HookKind::OnCancel,
        HookKind::OnUpdateAfterSubmit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Validate => "validate",
            HookKind::BeforeInsert => "before_insert",
            HookKind::OnUpdate => "on_update",
            HookKind::OnSubmit => "on_submit",
            HookKind::BeforeCancel => "before_cancel",
            HookKind::OnCancel => "on_cancel",
            HookKind::OnUpdateAfterSubmit => "on_update_after_submit",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| format!("Unknown hook '{}'", s))
    }
}

/// State handed to every hook
pub struct HookContext<'a> {
    /// Effective schema of the parent type
    pub schema: &'a DocType,

    /// Parent document being processed
    pub doc: &'a mut Document,

    /// Child rows of the parent, across all Table fields
    pub children: &'a mut Vec<Document>,

    /// Connection holding the operation's write transaction
    pub conn: &'a libsql::Connection,

    /// Acting user
    pub user: &'a str,
}

/// Type-specific document logic
///
/// Every hook defaults to a no-op, so implementations override only what they
/// need.
#[async_trait]
pub trait DocumentBehavior: Send + Sync {
    /// Custom identity generation; returning a name takes full control
    async fn autoname(&self, _ctx: &mut HookContext<'_>) -> Result<Option<String>, DocumentError> {
        Ok(None)
    }

    async fn validate(&self, _ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        Ok(())
    }

    async fn before_insert(&self, _ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        Ok(())
    }

    async fn on_update(&self, _ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        Ok(())
    }

    async fn on_submit(&self, _ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        Ok(())
    }

    async fn before_cancel(&self, _ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        Ok(())
    }

    async fn on_cancel(&self, _ctx: &mut HookContext<'_>) -> Result<(), DocumentError> {
        Ok(())
    }

    async fn on_update_after_submit(
        &self,
        _ctx: &mut HookContext<'_>,
    ) -> Result<(), DocumentError> {
        Ok(())
    }
}

async fn dispatch(
    behavior: &dyn DocumentBehavior,
    kind: HookKind,
    ctx: &mut HookContext<'_>,
) -> Result<(), DocumentError> {
    match kind {
        HookKind::Validate => behavior.validate(ctx).await,
        HookKind::BeforeInsert => behavior.before_insert(ctx).await,
        HookKind::OnUpdate => behavior.on_update(ctx).await,
        HookKind::OnSubmit => behavior.on_submit(ctx).await,
        HookKind::BeforeCancel => behavior.before_cancel(ctx).await,
        HookKind::OnCancel => behavior.on_cancel(ctx).await,
        HookKind::OnUpdateAfterSubmit => behavior.on_update_after_submit(ctx).await,
    }
}

/// Registry of behaviors, populated at startup
///
/// Type-specific behaviors run before catalog-wide ones, each group in
/// registration order.
#[derive(Default, Clone)]
pub struct BehaviorRegistry {
    by_type: HashMap<String, Vec<Arc<dyn DocumentBehavior>>>,
    catalog_wide: Vec<Arc<dyn DocumentBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior for one type
    pub fn register(&mut self, doctype: impl Into<String>, behavior: impl DocumentBehavior + 'static) {
        self.by_type
            .entry(doctype.into())
            .or_default()
            .push(Arc::new(behavior));
    }

    /// Register a behavior that runs for every type
    pub fn register_catalog_wide(&mut self, behavior: impl DocumentBehavior + 'static) {
        self.catalog_wide.push(Arc::new(behavior));
    }

    pub fn has_behaviors(&self, doctype: &str) -> bool {
        self.by_type.get(doctype).is_some_and(|b| !b.is_empty()) || !self.catalog_wide.is_empty()
    }

    fn behaviors_for(&self, doctype: &str) -> impl Iterator<Item = &Arc<dyn DocumentBehavior>> {
        self.by_type
            .get(doctype)
            .into_iter()
            .flatten()
            .chain(self.catalog_wide.iter())
    }

    /// Run one hook across every behavior of the type
    pub async fn run(
        &self,
        kind: HookKind,
        ctx: &mut HookContext<'_>,
    ) -> Result<(), DocumentError> {
        let doctype = ctx.doc.doctype.clone();
        for behavior in self.behaviors_for(&doctype) {
            dispatch(behavior.as_ref(), kind, ctx).await?;
        }
        Ok(())
    }

    /// First name returned by an `autoname` hook, if any
    pub async fn autoname(
        &self,
        ctx: &mut HookContext<'_>,
    ) -> Result<Option<String>, DocumentError> {
        let doctype = ctx.doc.doctype.clone();
        for behavior in self.behaviors_for(&doctype) {
            if let Some(name) = behavior.autoname(ctx).await? {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("catalog_wide", &self.catalog_wide.len())
            .finish()
    }
}
