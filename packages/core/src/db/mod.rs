//! Database Layer
//!
//! This module handles all database interactions using libsql:
//!
//! - Database initialization and connection management
//! - Meta tables for type definitions and user customizations
//! - Row persistence for multi-row and single documents
//! - Named counters used for identity generation
//!
//! # Architecture
//!
//! DocSpace stores every record type in its own SQLite table (`tab<Type>`)
//! whose columns follow the type's effective schema. Functions in
//! [`meta_store`], [`document_store`] and [`series`] are stateless and take the
//! caller's connection, so one write transaction can span all of them.

mod database;
pub mod document_store;
mod error;
pub mod meta_store;
pub mod series;

pub use database::{
    quote_ident, table_name, DatabaseService, CUSTOM_FIELD_TABLE, DOCFIELD_TABLE, DOCTYPE_TABLE,
    PROPERTY_SETTER_TABLE, SERIES_TABLE, SINGLES_TABLE,
};
pub use document_store::{LockState, Reference};
pub use error::DatabaseError;
