//! Typed cell values and records

use crate::fingerprint::Fingerprinter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One record of a tabular dataset: column name -> value.
///
/// A `BTreeMap` keeps column iteration order stable, which the content
/// fingerprint relies on.
pub type Record = BTreeMap<String, CellValue>;

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Missing value
    Null,

    /// Boolean flag
    Bool(bool),

    /// Whole number
    Int(i64),

    /// Floating point number
    Float(f64),

    /// Free text or category label
    Str(String),
}

impl CellValue {
    /// Returns true for `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view of the cell. Booleans map to 0/1; text and nulls have no
    /// numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            CellValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            CellValue::Null | CellValue::Str(_) => None,
        }
    }

    /// Text view of the cell
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the value's type, used in violation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "boolean",
            CellValue::Int(_) => "integer",
            CellValue::Float(_) => "float",
            CellValue::Str(_) => "string",
        }
    }

    /// Equality that treats `Int(1)` and `Float(1.0)` as the same value.
    /// Used for enum-membership checks.
    pub fn loosely_equals(&self, other: &CellValue) -> bool {
        match (self, other) {
            (CellValue::Str(a), CellValue::Str(b)) => a == b,
            (CellValue::Bool(a), CellValue::Bool(b)) => a == b,
            (CellValue::Null, CellValue::Null) => true,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) if !matches!(a, CellValue::Bool(_))
                    && !matches!(b, CellValue::Bool(_)) =>
                {
                    x == y
                }
                _ => false,
            },
        }
    }

    /// Stable key used for de-duplication
    pub fn dedupe_key(&self) -> String {
        match self {
            CellValue::Null => "n:".to_string(),
            CellValue::Bool(v) => format!("b:{v}"),
            CellValue::Int(v) => format!("i:{v}"),
            CellValue::Float(v) => format!("f:{}", v.to_bits()),
            CellValue::Str(v) => format!("s:{v}"),
        }
    }

    /// Feed the canonical encoding of this value into a fingerprint
    pub(crate) fn feed(&self, fp: &mut Fingerprinter) {
        match self {
            CellValue::Null => {
                fp.tag(0);
            }
            CellValue::Bool(v) => {
                fp.tag(1).tag(u8::from(*v));
            }
            CellValue::Int(v) => {
                fp.tag(2).i64(*v);
            }
            CellValue::Float(v) => {
                fp.tag(3).f64(*v);
            }
            CellValue::Str(v) => {
                fp.tag(4).str(v);
            }
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "null"),
            CellValue::Bool(v) => write!(f, "{v}"),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(i64::from(v))
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Str(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json_decoding() {
        let record: Record =
            serde_json::from_str(r#"{"a": 1, "b": 1.5, "c": "x", "d": null, "e": true}"#).unwrap();
        assert_eq!(record["a"], CellValue::Int(1));
        assert_eq!(record["b"], CellValue::Float(1.5));
        assert_eq!(record["c"], CellValue::Str("x".to_string()));
        assert_eq!(record["d"], CellValue::Null);
        assert_eq!(record["e"], CellValue::Bool(true));
    }

    #[test]
    fn test_loose_equality() {
        assert!(CellValue::Int(1).loosely_equals(&CellValue::Float(1.0)));
        assert!(!CellValue::Int(1).loosely_equals(&CellValue::Bool(true)));
        assert!(!CellValue::Str("1".into()).loosely_equals(&CellValue::Int(1)));
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(CellValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(CellValue::Str("a".into()).as_f64(), None);
        assert_eq!(CellValue::Null.as_f64(), None);
    }
}
