//! Record Type Definitions
//!
//! A [`DocType`] is the runtime-defined schema of one category of record. Its
//! ordered [`DocField`] list describes the columns of the type's table (or the
//! keys of its singles rows) and the Table fields that own child rows.
//!
//! ## Example DocType
//!
//! ```json
//! {
//!   "name": "Sales Invoice",
//!   "autoname": "naming_series:",
//!   "is_submittable": true,
//!   "fields": [
//!     { "fieldname": "naming_series", "fieldtype": "Select", "options": "SINV-\nSRET-" },
//!     { "fieldname": "customer", "fieldtype": "Link", "options": "Customer", "reqd": true },
//!     { "fieldname": "items", "fieldtype": "Table", "options": "Sales Invoice Item", "reqd": true }
//!   ]
//! }
//! ```
//!
//! Definitions are never edited in place by end users. User changes arrive as
//! [`CustomField`](crate::models::CustomField) and
//! [`PropertySetter`](crate::models::PropertySetter) records and are merged by
//! the schema assembler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a field
///
/// Value kinds carry data, `Table` owns child rows of another type, and the
/// layout kinds (`SectionBreak`, `ColumnBreak`, `Heading`, `Html`, `Button`)
/// carry nothing and get no column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Data,
    #[serde(rename = "Small Text")]
    SmallText,
    Text,
    #[serde(rename = "Long Text")]
    LongText,
    #[serde(rename = "Text Editor")]
    TextEditor,
    Code,
    Int,
    Check,
    Float,
    Currency,
    Percent,
    Date,
    Datetime,
    Time,
    Select,
    Link,
    Table,
    #[serde(rename = "Section Break")]
    SectionBreak,
    #[serde(rename = "Column Break")]
    ColumnBreak,
    Heading,
    #[serde(rename = "HTML")]
    Html,
    Button,
}

impl FieldKind {
    /// Canonical display name, also the value stored in `tabDocField.fieldtype`
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Data => "Data",
            FieldKind::SmallText => "Small Text",
            FieldKind::Text => "Text",
            FieldKind::LongText => "Long Text",
            FieldKind::TextEditor => "Text Editor",
            FieldKind::Code => "Code",
            FieldKind::Int => "Int",
            FieldKind::Check => "Check",
            FieldKind::Float => "Float",
            FieldKind::Currency => "Currency",
            FieldKind::Percent => "Percent",
            FieldKind::Date => "Date",
            FieldKind::Datetime => "Datetime",
            FieldKind::Time => "Time",
            FieldKind::Select => "Select",
            FieldKind::Link => "Link",
            FieldKind::Table => "Table",
            FieldKind::SectionBreak => "Section Break",
            FieldKind::ColumnBreak => "Column Break",
            FieldKind::Heading => "Heading",
            FieldKind::Html => "HTML",
            FieldKind::Button => "Button",
        }
    }

    /// True for layout-only kinds
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FieldKind::SectionBreak
                | FieldKind::ColumnBreak
                | FieldKind::Heading
                | FieldKind::Html
                | FieldKind::Button
        )
    }

    /// True when the field is stored as a column of its type's table
    pub fn has_column(&self) -> bool {
        !self.is_structural() && *self != FieldKind::Table
    }

    /// SQLite column affinity for the kind
    pub fn column_type(&self) -> &'static str {
        match self {
            FieldKind::Int | FieldKind::Check => "INTEGER",
            FieldKind::Float | FieldKind::Currency | FieldKind::Percent => "REAL",
            _ => "TEXT",
        }
    }

    fn family(&self) -> Option<u8> {
        match self {
            FieldKind::Data
            | FieldKind::SmallText
            | FieldKind::Text
            | FieldKind::LongText
            | FieldKind::TextEditor
            | FieldKind::Code
            | FieldKind::Select => Some(0),
            FieldKind::Float | FieldKind::Currency | FieldKind::Percent => Some(1),
            _ => None,
        }
    }

    /// Whether an override may change a field of this kind into `other`
    ///
    /// Only swaps inside a compatible family are legal: the text family
    /// (Data, Small Text, Text, Long Text, Text Editor, Code, Select) and the
    /// numeric family (Float, Currency, Percent).
    pub fn can_swap_to(&self, other: FieldKind) -> bool {
        if *self == other {
            return true;
        }
        match (self.family(), other.family()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim() {
            "Data" => FieldKind::Data,
            "Small Text" => FieldKind::SmallText,
            "Text" => FieldKind::Text,
            "Long Text" => FieldKind::LongText,
            "Text Editor" => FieldKind::TextEditor,
            "Code" => FieldKind::Code,
            "Int" => FieldKind::Int,
            "Check" => FieldKind::Check,
            "Float" => FieldKind::Float,
            "Currency" => FieldKind::Currency,
            "Percent" => FieldKind::Percent,
            "Date" => FieldKind::Date,
            "Datetime" => FieldKind::Datetime,
            "Time" => FieldKind::Time,
            "Select" => FieldKind::Select,
            "Link" => FieldKind::Link,
            "Table" => FieldKind::Table,
            "Section Break" => FieldKind::SectionBreak,
            "Column Break" => FieldKind::ColumnBreak,
            "Heading" => FieldKind::Heading,
            "HTML" => FieldKind::Html,
            "Button" => FieldKind::Button,
            other => return Err(format!("Unknown field type '{}'", other)),
        };
        Ok(kind)
    }
}

/// Casing rule applied to generated names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NameCase {
    #[default]
    AsIs,
    TitleCase,
    UpperCase,
}

impl FromStr for NameCase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(' ', "_").as_str() {
            "" | "as_is" => Ok(NameCase::AsIs),
            "title_case" => Ok(NameCase::TitleCase),
            "upper_case" | "uppercase" => Ok(NameCase::UpperCase),
            other => Err(format!("Unknown name case '{}'", other)),
        }
    }
}

impl NameCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameCase::AsIs => "as_is",
            NameCase::TitleCase => "title_case",
            NameCase::UpperCase => "upper_case",
        }
    }

    /// Apply the casing rule to a generated name
    pub fn apply(&self, name: &str) -> String {
        match self {
            NameCase::AsIs => name.to_string(),
            NameCase::UpperCase => name.to_uppercase(),
            NameCase::TitleCase => name
                .split(' ')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => {
                            first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                        }
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Outcome of applying one override to a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyOutcome {
    /// The property was replaced
    Applied,
    /// The property name is not overridable; the override is ignored
    Unknown,
}

/// Definition of one field of a [`DocType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocField {
    /// Field name, unique within the owning type
    pub fieldname: String,

    #[serde(default)]
    pub label: String,

    pub fieldtype: FieldKind,

    /// Link/Table target type, or newline-separated Select options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,

    #[serde(default)]
    pub reqd: bool,

    #[serde(default)]
    pub permlevel: i64,

    /// Display order (1-based once assembled)
    #[serde(default)]
    pub idx: i64,

    /// Field this one is placed after when assembled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_after: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub hidden: bool,

    #[serde(default)]
    pub read_only: bool,

    /// Field may be changed on a submitted document
    #[serde(default)]
    pub allow_on_submit: bool,
}

impl DocField {
    /// Create a field with label derived from the field name
    pub fn new(fieldname: impl Into<String>, fieldtype: FieldKind) -> Self {
        let fieldname = fieldname.into();
        let label = label_from_fieldname(&fieldname);
        Self {
            fieldname,
            label,
            fieldtype,
            options: None,
            reqd: false,
            permlevel: 0,
            idx: 0,
            insert_after: None,
            default: None,
            hidden: false,
            read_only: false,
            allow_on_submit: false,
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.reqd = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn allow_on_submit(mut self) -> Self {
        self.allow_on_submit = true;
        self
    }

    pub fn after(mut self, fieldname: impl Into<String>) -> Self {
        self.insert_after = Some(fieldname.into());
        self
    }

    /// Target type of a Link field, or of a Select field with `link:<Type>` options
    pub fn link_target(&self) -> Option<&str> {
        let options = self.options.as_deref()?.trim();
        match self.fieldtype {
            FieldKind::Link if !options.is_empty() => Some(options),
            FieldKind::Select => options
                .strip_prefix("link:")
                .map(str::trim)
                .filter(|t| !t.is_empty()),
            _ => None,
        }
    }

    /// Child type of a Table field
    pub fn table_target(&self) -> Option<&str> {
        if self.fieldtype != FieldKind::Table {
            return None;
        }
        self.options
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Plain Select options (empty for `link:` backed selects)
    pub fn select_options(&self) -> Vec<String> {
        match (&self.fieldtype, &self.options) {
            (FieldKind::Select, Some(options)) if !options.trim().starts_with("link:") => options
                .lines()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Replace one property from its string form
    ///
    /// # Errors
    ///
    /// Returns a diagnostic when the value cannot be parsed or when the change
    /// is not a legal transition (e.g. swapping `Int` for `Link`).
    pub fn apply_property(&mut self, property: &str, value: &str) -> Result<PropertyOutcome, String> {
        match property {
            "label" => self.label = value.to_string(),
            "fieldtype" => {
                let kind: FieldKind = value.parse()?;
                if !self.fieldtype.can_swap_to(kind) {
                    return Err(format!(
                        "Field '{}': fieldtype cannot change from {} to {}",
                        self.fieldname, self.fieldtype, kind
                    ));
                }
                self.fieldtype = kind;
            }
            "options" => self.options = non_empty(value),
            "reqd" => self.reqd = parse_flag(value)?,
            "permlevel" => {
                self.permlevel = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("Invalid permlevel '{}'", value))?
            }
            "idx" => {
                self.idx = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("Invalid idx '{}'", value))?
            }
            "insert_after" => self.insert_after = non_empty(value),
            "default" => self.default = non_empty(value),
            "hidden" => self.hidden = parse_flag(value)?,
            "read_only" => self.read_only = parse_flag(value)?,
            "allow_on_submit" => self.allow_on_submit = parse_flag(value)?,
            _ => return Ok(PropertyOutcome::Unknown),
        }
        Ok(PropertyOutcome::Applied)
    }

    /// Read one property in its string form
    pub fn property(&self, property: &str) -> Option<String> {
        match property {
            "label" => Some(self.label.clone()),
            "fieldtype" => Some(self.fieldtype.as_str().to_string()),
            "options" => self.options.clone(),
            "reqd" => Some(flag(self.reqd)),
            "permlevel" => Some(self.permlevel.to_string()),
            "idx" => Some(self.idx.to_string()),
            "insert_after" => self.insert_after.clone(),
            "default" => self.default.clone(),
            "hidden" => Some(flag(self.hidden)),
            "read_only" => Some(flag(self.read_only)),
            "allow_on_submit" => Some(flag(self.allow_on_submit)),
            _ => None,
        }
    }
}

/// Runtime-defined schema for one category of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocType {
    /// Unique type name (e.g. "Sales Invoice")
    pub name: String,

    /// Naming rule descriptor (`field:x`, `naming_series:`, `ABC.#####`, `hash`, `prompt`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoname: Option<String>,

    /// At most one instance, stored in `tabSingles`
    #[serde(default)]
    pub is_single: bool,

    /// Participates in the draft/submitted/cancelled lifecycle
    #[serde(default)]
    pub is_submittable: bool,

    /// Only used as rows of another type's Table field
    #[serde(default)]
    pub is_child_table: bool,

    #[serde(default)]
    pub name_case: NameCase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_field: Option<String>,

    /// Incremented every time the base definition is installed
    #[serde(default)]
    pub version: i64,

    #[serde(default)]
    pub fields: Vec<DocField>,
}

impl DocType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            autoname: None,
            is_single: false,
            is_submittable: false,
            is_child_table: false,
            name_case: NameCase::AsIs,
            title_field: None,
            version: 0,
            fields: Vec::new(),
        }
    }

    pub fn with_autoname(mut self, autoname: impl Into<String>) -> Self {
        self.autoname = Some(autoname.into());
        self
    }

    pub fn submittable(mut self) -> Self {
        self.is_submittable = true;
        self
    }

    pub fn single(mut self) -> Self {
        self.is_single = true;
        self
    }

    pub fn child_table(mut self) -> Self {
        self.is_child_table = true;
        self
    }

    /// Append a field, numbering it after the existing ones
    pub fn with_field(mut self, mut field: DocField) -> Self {
        field.idx = self.fields.len() as i64 + 1;
        self.fields.push(field);
        self
    }

    pub fn field(&self, fieldname: &str) -> Option<&DocField> {
        self.fields.iter().find(|f| f.fieldname == fieldname)
    }

    /// Fields stored as table columns, in order
    pub fn column_fields(&self) -> impl Iterator<Item = &DocField> {
        self.fields.iter().filter(|f| f.fieldtype.has_column())
    }

    /// Table fields, in order
    pub fn table_fields(&self) -> impl Iterator<Item = &DocField> {
        self.fields
            .iter()
            .filter(|f| f.fieldtype == FieldKind::Table)
    }

    /// Link fields (including link-backed selects), in order
    pub fn link_fields(&self) -> impl Iterator<Item = &DocField> {
        self.fields.iter().filter(|f| f.link_target().is_some())
    }

    /// Replace one type-level property from its string form
    ///
    /// `is_single` and `is_child_table` change the storage layout and are
    /// never overridable.
    pub fn apply_property(&mut self, property: &str, value: &str) -> Result<PropertyOutcome, String> {
        match property {
            "autoname" => self.autoname = non_empty(value),
            "is_submittable" => self.is_submittable = parse_flag(value)?,
            "name_case" => self.name_case = value.parse()?,
            "title_field" => self.title_field = non_empty(value),
            "is_single" | "is_child_table" => {
                return Err(format!(
                    "DocType '{}': property '{}' cannot be overridden",
                    self.name, property
                ))
            }
            _ => return Ok(PropertyOutcome::Unknown),
        }
        Ok(PropertyOutcome::Applied)
    }

    /// Read one type-level property in its string form
    pub fn property(&self, property: &str) -> Option<String> {
        match property {
            "autoname" => self.autoname.clone(),
            "is_submittable" => Some(flag(self.is_submittable)),
            "name_case" => Some(self.name_case.as_str().to_string()),
            "title_field" => self.title_field.clone(),
            "is_single" => Some(flag(self.is_single)),
            "is_child_table" => Some(flag(self.is_child_table)),
            _ => None,
        }
    }
}

/// Validate a type name usable inside a quoted table identifier
pub fn validate_doctype_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() || name.trim() != name {
        return Err(format!("Invalid DocType name '{}'", name));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == ' ' || c == '_' || c == '-')
    {
        return Err(format!(
            "Invalid DocType name '{}': only letters, digits, spaces, '_' and '-' are allowed",
            name
        ));
    }
    Ok(())
}

/// Validate a field name usable as a column name
pub fn validate_fieldname(fieldname: &str) -> Result<(), String> {
    let mut chars = fieldname.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    if !valid_start
        || !fieldname
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(format!(
            "Invalid field name '{}': use lowercase letters, digits and underscores",
            fieldname
        ));
    }
    Ok(())
}

fn label_from_fieldname(fieldname: &str) -> String {
    NameCase::TitleCase.apply(&fieldname.replace('_', " "))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(format!("Invalid flag value '{}'", other)),
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}
