//! Naming Engine
//!
//! Derives the identity of a new document from its type's naming rule.
//!
//! ## Precedence
//!
//! 1. A behavior's `autoname` hook (resolved by the caller and passed in)
//! 2. Amendment: `amended_from` set -> `<source>-1`, or `<prefix>-<n+1>` when
//!    the source is itself an amendment named `<prefix>-<n>`
//! 3. `field:<fieldname>` -> the field's value verbatim
//! 4. `naming_series:` -> the document's `naming_series` prefix, rendered as a
//!    template (a counter is appended when the prefix has none)
//! 5. Dotted template (`INV-.YYYY.-.#####`)
//! 6. Client-supplied name (required by the `prompt` rule)
//! 7. `hash` rule, or any child-table type without a rule -> random hex
//! 8. Fallback: the global series, zero-padded
//!
//! ## Template grammar
//!
//! Segments are separated by `.`: `#...#` is the counter (width = number of
//! `#`, at most one per template), `YY` / `YYYY` / `MM` / `DD` are date
//! tokens, `{fieldname}` copies a field value, anything else is literal. The
//! series key is the text rendered before the counter. There is no expression
//! evaluation.

use crate::config::DocStoreConfig;
use crate::db::{document_store, series};
use crate::models::{DocType, Document, FieldKind, AMENDED_FROM};
use crate::services::DocumentError;
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Series key of the global fallback counter
pub const GLOBAL_SERIES: &str = "__global__";

/// Field holding the chosen prefix for `naming_series:` types
pub const NAMING_SERIES_FIELD: &str = "naming_series";

fn forbidden_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r##"[%'"#*?`]"##).expect("valid forbidden-character pattern"))
}

fn amendment_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)-(\d+)$").expect("valid amendment pattern"))
}

/// One segment of a naming template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Zero-padded series counter of the given width
    Counter(usize),
    Year2,
    Year4,
    Month,
    Day,
    /// `{fieldname}` reference
    Field(String),
}

/// A parsed dotted naming template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    segments: Vec<Segment>,
}

impl NameTemplate {
    /// Parse a dotted template; more than one counter is rejected
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        for part in template.split('.') {
            if part.is_empty() {
                continue;
            }
            let segment = match part {
                "YY" => Segment::Year2,
                "YYYY" => Segment::Year4,
                "MM" => Segment::Month,
                "DD" => Segment::Day,
                _ if part.chars().all(|c| c == '#') => Segment::Counter(part.len()),
                _ if part.starts_with('{') && part.ends_with('}') && part.len() > 2 => {
                    Segment::Field(part[1..part.len() - 1].trim().to_string())
                }
                _ => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        let counters = segments
            .iter()
            .filter(|s| matches!(s, Segment::Counter(_)))
            .count();
        if counters > 1 {
            return Err(format!(
                "Naming template '{}' has {} counters; at most one is allowed",
                template, counters
            ));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_counter(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Counter(_)))
    }

    /// Append a counter segment when the template has none
    pub fn with_counter(mut self, digits: usize) -> Self {
        if !self.has_counter() {
            self.segments.push(Segment::Counter(digits));
        }
        self
    }

    /// Render the template, drawing the counter from the series keyed by the
    /// text rendered before it
    pub async fn render(
        &self,
        conn: &libsql::Connection,
        doc: &Document,
        today: NaiveDate,
    ) -> Result<String, DocumentError> {
        let mut name = String::new();
        let mut counter_at: Option<(usize, usize)> = None;

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Year2 => name.push_str(&format!("{:02}", today.year() % 100)),
                Segment::Year4 => name.push_str(&format!("{:04}", today.year())),
                Segment::Month => name.push_str(&format!("{:02}", today.month())),
                Segment::Day => name.push_str(&format!("{:02}", today.day())),
                Segment::Field(field) => {
                    let value = doc
                        .get(field)
                        .filter(|v| !v.is_empty())
                        .and_then(|v| v.to_text())
                        .ok_or_else(|| {
                            DocumentError::mandatory(doc.doctype.clone(), vec![field.clone()])
                        })?;
                    name.push_str(&value);
                }
                Segment::Counter(width) => counter_at = Some((name.len(), *width)),
            }
        }

        if let Some((position, width)) = counter_at {
            let key = name[..position].to_string();
            let value = series::next_value(conn, &key).await?;
            name.insert_str(position, &format!("{:0width$}", value, width = width));
        }

        Ok(name)
    }
}

/// Identity generation for new documents
#[derive(Debug, Clone)]
pub struct NamingEngine {
    config: Arc<DocStoreConfig>,
}

impl NamingEngine {
    pub fn new(config: Arc<DocStoreConfig>) -> Self {
        Self { config }
    }

    /// Generate, validate and case the name of a local document
    ///
    /// `hook_name` is the result of the type's `autoname` behaviors, if any.
    /// Series increments run on `conn` and roll back with the caller's
    /// transaction.
    pub async fn generate_name(
        &self,
        conn: &libsql::Connection,
        schema: &DocType,
        doc: &Document,
        hook_name: Option<String>,
    ) -> Result<String, DocumentError> {
        let raw = match hook_name {
            Some(name) => name,
            None => self.name_from_rule(conn, schema, doc).await?,
        };

        let name = self.validate_name(&schema.name_case.apply(raw.trim()))?;
        tracing::debug!("Generated name {} for {}", name, schema.name);
        Ok(name)
    }

    async fn name_from_rule(
        &self,
        conn: &libsql::Connection,
        schema: &DocType,
        doc: &Document,
    ) -> Result<String, DocumentError> {
        if let Some(source) = doc.get_str(AMENDED_FROM).filter(|s| !s.trim().is_empty()) {
            return self.amended_name(conn, schema, source).await;
        }

        let rule = schema
            .autoname
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        let client_name = doc
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let today = Local::now().date_naive();

        match rule {
            Some(rule) if rule.starts_with("field:") => {
                let field = rule["field:".len()..].trim();
                doc.get(field)
                    .filter(|v| !v.is_empty())
                    .and_then(|v| v.to_text())
                    .ok_or_else(|| DocumentError::mandatory(schema.name.clone(), vec![field.to_string()]))
            }
            Some(rule) if rule.starts_with("naming_series:") => {
                let prefix = self.naming_series_prefix(schema, doc)?;
                NameTemplate::parse(&prefix)
                    .map_err(DocumentError::validation)?
                    .with_counter(self.config.naming_series_digits)
                    .render(conn, doc, today)
                    .await
            }
            Some(rule) if rule.eq_ignore_ascii_case("prompt") => client_name
                .map(str::to_string)
                .ok_or_else(|| DocumentError::mandatory(schema.name.clone(), vec!["name".to_string()])),
            Some(rule) if rule.eq_ignore_ascii_case("hash") => Ok(hash_name()),
            Some(rule) => {
                let template = NameTemplate::parse(rule).map_err(DocumentError::validation)?;
                if !template.has_counter() {
                    return Err(DocumentError::validation(format!(
                        "Naming rule '{}' of {} has no counter",
                        rule, schema.name
                    )));
                }
                template.render(conn, doc, today).await
            }
            None => match client_name {
                Some(name) => Ok(name.to_string()),
                None if schema.is_child_table => Ok(hash_name()),
                None => {
                    let value = series::next_value(conn, GLOBAL_SERIES).await?;
                    Ok(format!(
                        "{:0width$}",
                        value,
                        width = self.config.fallback_digits
                    ))
                }
            },
        }
    }

    /// Chosen `naming_series` value, checked against the field's options
    fn naming_series_prefix(&self, schema: &DocType, doc: &Document) -> Result<String, DocumentError> {
        let prefix = doc
            .get_str(NAMING_SERIES_FIELD)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                DocumentError::mandatory(schema.name.clone(), vec![NAMING_SERIES_FIELD.to_string()])
            })?;

        if let Some(field) = schema
            .field(NAMING_SERIES_FIELD)
            .filter(|f| f.fieldtype == FieldKind::Select)
        {
            let options = field.select_options();
            if !options.is_empty() && !options.iter().any(|o| o == prefix) {
                return Err(DocumentError::validation(format!(
                    "Naming series {} is not valid for {}; choose one of: {}",
                    prefix,
                    schema.name,
                    options.join(", ")
                )));
            }
        }

        Ok(prefix.to_string())
    }

    /// Name of an amendment of `source`
    ///
    /// A source that is itself an amendment (`X-2`) yields `X-3`; any other
    /// source yields `<source>-1`.
    async fn amended_name(
        &self,
        conn: &libsql::Connection,
        schema: &DocType,
        source: &str,
    ) -> Result<String, DocumentError> {
        let source_is_amendment = match document_store::get_value(conn, schema, source, AMENDED_FROM).await {
            Ok(value) => value.is_some_and(|v| !v.is_empty()),
            Err(e) if e.is_missing_table() => false,
            Err(e) => return Err(e.into()),
        };

        Ok(next_amendment_name(source, source_is_amendment))
    }

    /// Trim, check forbidden characters, and enforce the length limit
    pub fn validate_name(&self, name: &str) -> Result<String, DocumentError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DocumentError::validation("Name cannot be empty"));
        }
        if forbidden_chars().is_match(name) {
            return Err(DocumentError::validation(format!(
                "Name {} contains forbidden characters (% ' \" # * ? `)",
                name
            )));
        }
        if name.chars().count() > self.config.max_name_length {
            return Err(DocumentError::validation(format!(
                "Name {} is longer than {} characters",
                name, self.config.max_name_length
            )));
        }
        Ok(name.to_string())
    }
}

/// `<prefix>-<n+1>` for an amendment named `<prefix>-<n>`, else `<source>-1`
pub fn next_amendment_name(source: &str, source_is_amendment: bool) -> String {
    if source_is_amendment {
        if let Some(captures) = amendment_suffix().captures(source) {
            if let Ok(n) = captures[2].parse::<u64>() {
                return format!("{}-{}", &captures[1], n + 1);
            }
        }
    }
    format!("{}-1", source)
}

/// Random 10-character lowercase hex name
pub fn hash_name() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}
