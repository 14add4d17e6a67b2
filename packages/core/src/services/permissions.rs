//! Authorization Seam
//!
//! Permission rules live outside this crate. Lifecycle operations ask a
//! [`PermissionChecker`] before touching storage and fail with
//! `BeanPermissionError` on denial.

use crate::models::Document;
use async_trait::async_trait;
use std::fmt;

/// Operation being authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionAction {
    Create,
    Write,
    Submit,
    Cancel,
    Delete,
}

impl PermissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::Create => "create",
            PermissionAction::Write => "write",
            PermissionAction::Submit => "submit",
            PermissionAction::Cancel => "cancel",
            PermissionAction::Delete => "delete",
        }
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External authorization rule engine
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn has_permission(
        &self,
        user: &str,
        doctype: &str,
        action: PermissionAction,
        doc: &Document,
    ) -> bool;
}

/// Grants everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn has_permission(
        &self,
        _user: &str,
        _doctype: &str,
        _action: PermissionAction,
        _doc: &Document,
    ) -> bool {
        true
    }
}
