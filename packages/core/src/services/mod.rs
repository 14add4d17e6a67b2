//! Business Services
//!
//! This module contains the document engine services:
//!
//! - `SchemaAssembler` - Effective schemas (base + Custom Fields + Property Setters)
//! - `NamingEngine` - Identity generation from naming rules and templates
//! - `LinkValidator` - Outbound and inbound Link integrity
//! - `ChildSynchronizer` - Child table reconciliation
//! - `DocumentService` - Record access, renames and bean construction
//! - `Bean` - Lifecycle pipeline of one document (save, submit, cancel, ...)
//!
//! Services coordinate between the database layer and application logic,
//! implementing business rules inside one write transaction per operation.

pub mod bean;
pub mod child_sync;
pub mod document_service;
pub mod error;
pub mod link_validation;
pub mod naming;
pub mod permissions;
pub mod schema_assembler;
pub mod schema_cache;
pub mod schema_table_manager;

pub use bean::Bean;
pub use child_sync::{stamp_children, ChildSynchronizer, ReconcileOutcome};
pub use document_service::DocumentService;
pub use error::DocumentError;
pub use link_validation::{InboundLink, InvalidLink, LinkMode, LinkValidator};
pub use naming::{hash_name, next_amendment_name, NameTemplate, NamingEngine, Segment};
pub use permissions::{AllowAll, PermissionAction, PermissionChecker};
pub use schema_assembler::{merge, EffectiveSchema, SchemaAssembler, SchemaBundle};
pub use schema_cache::{SchemaCache, SchemaView};
pub use schema_table_manager::SchemaTableManager;
