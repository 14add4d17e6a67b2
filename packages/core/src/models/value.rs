//! Typed Field Values
//!
//! Documents carry an open-ended set of fields whose names and kinds are only
//! known at runtime. Every field value is stored as a [`Value`], a small tagged
//! variant that round-trips through libsql columns and JSON.
//!
//! # Coercion
//!
//! Values read back from SQLite lose their declared kind (a `Date` column is
//! just TEXT). [`Value::coerce`] restores the kind from the effective field
//! definition on the load path:
//!
//! - `Int` / `Check` -> [`Value::Int`]
//! - `Float` / `Currency` / `Percent` -> [`Value::Float`]
//! - `Date` -> [`Value::Date`], `Datetime` -> [`Value::Datetime`]
//! - everything else -> [`Value::Text`]
//!
//! `NULL` always stays [`Value::Null`].

use crate::models::FieldKind;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage format for dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Storage format for datetimes (microsecond precision keeps `modified` ordered)
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    Text(String),
}

impl Value {
    /// True for `Null` and for blank text
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Borrow the inner string of a `Text` value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Render the value the way it is written into TEXT columns
    ///
    /// Returns `None` for `Null`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            Value::Datetime(dt) => Some(dt.format(DATETIME_FORMAT).to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    /// Convert into a libsql parameter
    pub fn to_sql(&self) -> libsql::Value {
        match self {
            Value::Null => libsql::Value::Null,
            Value::Int(i) => libsql::Value::Integer(*i),
            Value::Float(f) => libsql::Value::Real(*f),
            Value::Text(s) => libsql::Value::Text(s.clone()),
            Value::Date(_) | Value::Datetime(_) => {
                libsql::Value::Text(self.to_text().unwrap_or_default())
            }
        }
    }

    /// Convert a raw libsql column value without kind information
    pub fn from_sql(raw: libsql::Value) -> Self {
        match raw {
            libsql::Value::Null => Value::Null,
            libsql::Value::Integer(i) => Value::Int(i),
            libsql::Value::Real(f) => Value::Float(f),
            libsql::Value::Text(s) => Value::Text(s),
            libsql::Value::Blob(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }

    /// Coerce a loaded value to the representation its field kind expects
    ///
    /// Unparseable input is kept as text rather than dropped so that no data is
    /// lost on a round trip through a mistyped column.
    pub fn coerce(self, kind: FieldKind) -> Self {
        if matches!(self, Value::Null) {
            return Value::Null;
        }

        match kind {
            FieldKind::Int | FieldKind::Check => match self.as_i64() {
                Some(i) => Value::Int(i),
                None => match self.as_f64() {
                    Some(f) => Value::Int(f as i64),
                    None => self,
                },
            },
            FieldKind::Float | FieldKind::Currency | FieldKind::Percent => match self.as_f64() {
                Some(f) => Value::Float(f),
                None => self,
            },
            FieldKind::Date => match &self {
                Value::Date(_) => self,
                Value::Datetime(dt) => Value::Date(dt.date()),
                Value::Text(s) => parse_date(s).map(Value::Date).unwrap_or(self),
                _ => self,
            },
            FieldKind::Datetime => match &self {
                Value::Datetime(_) => self,
                Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::Datetime).unwrap_or(self),
                Value::Text(s) => parse_datetime(s).map(Value::Datetime).unwrap_or(self),
                _ => self,
            },
            _ => match self {
                Value::Text(_) => self,
                other => Value::Text(other.to_text().unwrap_or_default()),
            },
        }
    }
}

/// Parse a stored date (`YYYY-MM-DD`)
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Parse a stored datetime, accepting with or without fractional seconds
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Format a datetime in storage format
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, ""),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(b as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::Datetime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_int_kinds() {
        assert_eq!(Value::from("42").coerce(FieldKind::Int), Value::Int(42));
        assert_eq!(Value::Float(3.9).coerce(FieldKind::Check), Value::Int(3));
        assert_eq!(Value::from("1.0").coerce(FieldKind::Check), Value::Int(1));
    }

    #[test]
    fn test_coerce_float_kinds() {
        assert_eq!(Value::Int(5).coerce(FieldKind::Currency), Value::Float(5.0));
        assert_eq!(
            Value::from("12.50").coerce(FieldKind::Float),
            Value::Float(12.5)
        );
    }

    #[test]
    fn test_coerce_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            Value::from("2024-03-01").coerce(FieldKind::Date),
            Value::Date(date)
        );

        let dt = Value::from("2024-03-01 10:11:12.000123").coerce(FieldKind::Datetime);
        assert!(matches!(dt, Value::Datetime(_)));
        assert_eq!(dt.to_text().unwrap(), "2024-03-01 10:11:12.000123");
    }

    #[test]
    fn test_coerce_keeps_unparseable_text() {
        assert_eq!(
            Value::from("not a number").coerce(FieldKind::Int),
            Value::from("not a number")
        );
    }

    #[test]
    fn test_coerce_null_and_text() {
        assert_eq!(Value::Null.coerce(FieldKind::Int), Value::Null);
        assert_eq!(Value::Int(7).coerce(FieldKind::Data), Value::from("7"));
    }

    #[test]
    fn test_is_empty() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("   ").is_empty());
        assert!(!Value::Int(0).is_empty());
    }

    #[test]
    fn test_sql_conversion() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        assert_eq!(
            Value::Date(date).to_sql(),
            libsql::Value::Text("2025-01-10".to_string())
        );
        assert_eq!(Value::from_sql(libsql::Value::Integer(9)), Value::Int(9));
    }
}
