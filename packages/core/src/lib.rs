//! DocSpace Core Document Engine
//!
//! This crate provides the metadata-driven document model and persistence
//! engine of DocSpace: record types defined at runtime, customized without
//! code, and persisted through a lifecycle with concurrency, naming and link
//! integrity guarantees.
//!
//! # Architecture
//!
//! - **Types as data**: a `DocType` (fields, naming rule, flags) is stored in
//!   meta tables and becomes one `tab<Type>` table, or rows of `tabSingles`
//! - **Customization at read time**: Custom Fields and Property Setters are
//!   merged into an immutable effective schema, cached until invalidated
//! - **Bean pipeline**: every save/submit/cancel runs inside one
//!   `BEGIN IMMEDIATE` transaction and rolls back on any error
//! - **libsql**: Embedded SQLite-compatible database in WAL mode
//!
//! # Modules
//!
//! - [`models`] - Data structures (DocType, DocField, Document, Value)
//! - [`behaviors`] - Per-type lifecycle hooks and their registry
//! - [`services`] - Schema assembly, naming, link integrity, Bean lifecycle
//! - [`db`] - Database layer with libsql integration
//! - [`config`] - Runtime configuration

pub mod behaviors;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use behaviors::*;
pub use config::DocStoreConfig;
pub use models::*;
pub use services::*;
