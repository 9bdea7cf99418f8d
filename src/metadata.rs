//! Metadata values attached to documents.
//!
//! Metadata is a mapping from validated string keys to [`MetadataValue`], a
//! closed sum type over the shapes the filter algebra knows how to compare.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single metadata value.
///
/// Numeric comparisons in filters coerce [`MetadataValue::Int`] and
/// [`MetadataValue::Float`] to `f64`; everything else compares by exact
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Opaque byte payload.
    Binary(Vec<u8>),
    /// Ordered sequence of values.
    Sequence(Vec<MetadataValue>),
    /// Nested string-keyed mapping.
    Mapping(HashMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Construct a binary value from raw bytes.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        MetadataValue::Binary(bytes.into())
    }

    /// True for [`MetadataValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, MetadataValue::Null)
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean payload, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer payload, if this is an int.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view with cross-type coercion: ints widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The byte payload, if this is binary.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MetadataValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// The element slice, if this is a sequence.
    pub fn as_sequence(&self) -> Option<&[MetadataValue]> {
        match self {
            MetadataValue::Sequence(v) => Some(v),
            _ => None,
        }
    }

    /// The nested mapping, if this is a mapping.
    pub fn as_mapping(&self) -> Option<&HashMap<String, MetadataValue>> {
        match self {
            MetadataValue::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Equality with numeric coercion: `Int(3)` equals `Float(3.0)`.
    pub fn loosely_equals(&self, other: &MetadataValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a == b;
        }
        self == other
    }

    /// Rough in-memory footprint, used for storage accounting.
    pub(crate) fn approximate_size(&self) -> usize {
        match self {
            MetadataValue::Null => 1,
            MetadataValue::Bool(_) => 1,
            MetadataValue::Int(_) => 8,
            MetadataValue::Float(_) => 8,
            MetadataValue::String(s) => s.len(),
            MetadataValue::Binary(b) => b.len(),
            MetadataValue::Sequence(v) => v.iter().map(Self::approximate_size).sum(),
            MetadataValue::Mapping(m) => m
                .iter()
                .map(|(k, v)| k.len() + v.approximate_size())
                .sum(),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<i32> for MetadataValue {
    fn from(i: i32) -> Self {
        MetadataValue::Int(i as i64)
    }
}

impl From<u32> for MetadataValue {
    fn from(i: u32) -> Self {
        MetadataValue::Int(i as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<f32> for MetadataValue {
    fn from(f: f32) -> Self {
        MetadataValue::Float(f as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(v: Vec<T>) -> Self {
        MetadataValue::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<HashMap<String, MetadataValue>> for MetadataValue {
    fn from(m: HashMap<String, MetadataValue>) -> Self {
        MetadataValue::Mapping(m)
    }
}

/// Validate a metadata (or custom scope) key.
///
/// Keys must be 1–256 characters, free of control characters, and must not
/// contain `$` or `.`.
pub fn validate_metadata_key(key: &str) -> std::result::Result<(), String> {
    let len = key.chars().count();
    if len == 0 {
        return Err("key must not be empty".to_string());
    }
    if len > 256 {
        return Err(format!("key length {len} exceeds 256 characters"));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err("key contains control characters".to_string());
    }
    if key.contains('$') || key.contains('.') {
        return Err("key must not contain '$' or '.'".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(MetadataValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(MetadataValue::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(MetadataValue::String("3".into()).as_f64(), None);
        assert!(MetadataValue::Int(3).loosely_equals(&MetadataValue::Float(3.0)));
        assert!(!MetadataValue::Int(3).loosely_equals(&MetadataValue::Float(3.5)));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(MetadataValue::from("x"), MetadataValue::String("x".into()));
        assert_eq!(MetadataValue::from(42i64), MetadataValue::Int(42));
        assert_eq!(MetadataValue::from(true), MetadataValue::Bool(true));
        assert_eq!(
            MetadataValue::from(vec![1i64, 2]),
            MetadataValue::Sequence(vec![MetadataValue::Int(1), MetadataValue::Int(2)])
        );
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_metadata_key("category").is_ok());
        assert!(validate_metadata_key("a:b-c_d").is_ok());
        assert!(validate_metadata_key("").is_err());
        assert!(validate_metadata_key("has.dot").is_err());
        assert!(validate_metadata_key("has$dollar").is_err());
        assert!(validate_metadata_key("ctrl\u{0007}char").is_err());
        assert!(validate_metadata_key(&"k".repeat(257)).is_err());
        assert!(validate_metadata_key(&"k".repeat(256)).is_ok());
    }
}
