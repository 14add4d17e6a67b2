//! Link Integrity
//!
//! Outbound: every Link field (and every Select backed by `link:<Type>`) of a
//! document must name an existing record of its target type.
//!
//! Inbound: a record may not be cancelled, deleted or renamed blindly while
//! other records point at it. [`LinkValidator::inbound_link_fields`] scans the
//! effective schemas of all installed types for Link fields targeting a type.

use crate::db::{document_store, meta_store};
use crate::models::{DocType, Document, Value};
use crate::services::{DocumentError, SchemaAssembler};
use std::fmt;

/// How unresolved links are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Null unresolved values and report them
    Lenient,
    /// Report unresolved values, leave the document untouched
    Strict,
}

/// One unresolved Link value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLink {
    /// Field holding the value, prefixed with `<parentfield> row #<idx>: ` for child rows
    pub field: String,
    pub target: String,
    pub value: String,
}

impl fmt::Display for InvalidLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.field, self.value)
    }
}

/// A Link field somewhere in the catalog that targets a given type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundLink {
    pub doctype: String,
    pub fieldname: String,
    pub is_single: bool,
}

#[derive(Debug, Clone)]
pub struct LinkValidator {
    assembler: SchemaAssembler,
}

impl LinkValidator {
    pub fn new(assembler: SchemaAssembler) -> Self {
        Self { assembler }
    }

    /// Resolve every Link value of `doc` against its target table
    ///
    /// In lenient mode unresolved values are set to `Null`. Either way the
    /// unresolved values are returned.
    pub async fn validate_links(
        &self,
        conn: &libsql::Connection,
        schema: &DocType,
        doc: &mut Document,
        mode: LinkMode,
    ) -> Result<Vec<InvalidLink>, DocumentError> {
        let mut invalid = Vec::new();

        for field in schema.link_fields() {
            let Some(target) = field.link_target() else {
                continue;
            };
            let Some(value) = doc
                .get(&field.fieldname)
                .filter(|v| !v.is_empty())
                .and_then(Value::to_text)
            else {
                continue;
            };

            if !self.resolves(conn, target, &value).await? {
                invalid.push(InvalidLink {
                    field: field.fieldname.clone(),
                    target: target.to_string(),
                    value,
                });
            }
        }

        if mode == LinkMode::Lenient {
            for link in &invalid {
                doc.set(link.field.clone(), Value::Null);
            }
        }

        Ok(invalid)
    }

    /// Whether `value` names a record of `target`
    async fn resolves(
        &self,
        conn: &libsql::Connection,
        target: &str,
        value: &str,
    ) -> Result<bool, DocumentError> {
        let is_single = meta_store::load_doctype(conn, target)
            .await?
            .is_some_and(|d| d.is_single);
        if is_single {
            return Ok(value == target);
        }
        Ok(document_store::exists(conn, target, value).await?)
    }

    /// Link fields of every installed type that target `doctype`
    pub async fn inbound_link_fields(&self, doctype: &str) -> Result<Vec<InboundLink>, DocumentError> {
        let mut links = Vec::new();
        for name in self.assembler.list_doctypes().await? {
            let schema = self.assembler.assemble(&name).await?;
            for field in schema.doctype.link_fields() {
                if field.link_target() == Some(doctype) {
                    links.push(InboundLink {
                        doctype: name.clone(),
                        fieldname: field.fieldname.clone(),
                        is_single: schema.doctype.is_single,
                    });
                }
            }
        }
        Ok(links)
    }

    /// Top-level records referencing `doctype`/`name` through non-cancelled
    /// rows, as `"<Type> <name>"`; the record's own rows are skipped
    pub async fn referencing_records(
        &self,
        conn: &libsql::Connection,
        doctype: &str,
        name: &str,
    ) -> Result<Vec<String>, DocumentError> {
        let mut found = Vec::new();

        for link in self.inbound_link_fields(doctype).await? {
            if link.is_single {
                continue;
            }
            for reference in
                document_store::find_references(conn, &link.doctype, &link.fieldname, name).await?
            {
                if reference.owner_doctype == doctype && reference.owner_name == name {
                    continue;
                }
                let label = format!("{} {}", reference.owner_doctype, reference.owner_name);
                if !found.contains(&label) {
                    found.push(label);
                }
            }
        }

        Ok(found)
    }

    /// Rewrite every stored Link value `old` -> `new` targeting `doctype`
    pub async fn rewrite_inbound_links(
        &self,
        conn: &libsql::Connection,
        doctype: &str,
        old: &str,
        new: &str,
    ) -> Result<u64, DocumentError> {
        let mut rewritten = 0;
        for link in self.inbound_link_fields(doctype).await? {
            rewritten += if link.is_single {
                document_store::rewrite_single_links(conn, &link.doctype, &link.fieldname, old, new)
                    .await?
            } else {
                document_store::rewrite_links(conn, &link.doctype, &link.fieldname, old, new).await?
            };
        }
        Ok(rewritten)
    }
}
