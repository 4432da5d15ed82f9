//! Structured values stored in object stores.

use crate::error::{CodecError, CodecResult};
use crate::key::Key;
use crate::key_path::KeyPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured value.
///
/// Maps use string keys kept in sorted order, so two equal values always
/// encode to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    Text(String),
    /// Byte string (blobs, array buffers).
    Bytes(#[serde(with = "crate::raw_bytes")] Vec<u8>),
    /// Array of values.
    Array(Vec<Value>),
    /// Record with named fields.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a map value from field/value pairs.
    ///
    /// ```
    /// use stashdb_codec::Value;
    ///
    /// let book = Value::map([("isbn", "one".into()), ("title", "t1".into())]);
    /// assert_eq!(book.field("title").and_then(Value::as_text), Some("t1"));
    /// ```
    pub fn map<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Map(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns a field of a map value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Map(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Returns the text if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes if this is a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Follows a key path into this value.
    ///
    /// Returns `None` when a segment is missing or crosses a non-map value.
    #[must_use]
    pub fn resolve(&self, path: &KeyPath) -> Option<&Value> {
        path.segments()
            .try_fold(self, |current, segment| current.field(segment))
    }

    /// Writes `value` at `path`, creating intermediate maps as needed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyPath`] for the root path or when an
    /// intermediate segment holds a non-map value.
    pub fn inject(&mut self, path: &KeyPath, value: Value) -> CodecResult<()> {
        let segments: Vec<&str> = path.segments().collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(CodecError::InvalidKeyPath {
                path: path.to_string(),
            });
        };

        let mut current = self;
        for segment in parents {
            let Self::Map(fields) = current else {
                return Err(CodecError::InvalidKeyPath {
                    path: path.to_string(),
                });
            };
            current = fields
                .entry((*segment).to_string())
                .or_insert_with(|| Self::Map(BTreeMap::new()));
        }

        match current {
            Self::Map(fields) => {
                fields.insert((*last).to_string(), value);
                Ok(())
            }
            _ => Err(CodecError::InvalidKeyPath {
                path: path.to_string(),
            }),
        }
    }

    /// Converts this value into a key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] for null, booleans, maps, `NaN`,
    /// and arrays containing any of those.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_key(&self) -> CodecResult<Key> {
        match self {
            Self::Integer(n) => Ok(Key::Number(*n as f64)),
            Self::Float(n) => Key::number(*n),
            Self::Text(s) => Ok(Key::Text(s.clone())),
            Self::Bytes(b) => Ok(Key::Binary(b.clone())),
            Self::Array(items) => items
                .iter()
                .map(Value::to_key)
                .collect::<CodecResult<Vec<_>>>()
                .map(Key::Array),
            Self::Null => Err(CodecError::invalid_key("null is not a valid key")),
            Self::Bool(_) => Err(CodecError::invalid_key("booleans are not valid keys")),
            Self::Map(_) => Err(CodecError::invalid_key("records are not valid keys")),
        }
    }
}

impl From<Key> for Value {
    #[allow(clippy::cast_possible_truncation)]
    fn from(key: Key) -> Self {
        match key {
            Key::Number(n) if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                Self::Integer(n as i64)
            }
            Key::Number(n) => Self::Float(n),
            Key::Text(s) => Self::Text(s),
            Key::Binary(b) => Self::Bytes(b),
            Key::Array(items) => Self::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> KeyPath {
        KeyPath::parse(p).unwrap()
    }

    #[test]
    fn resolve_nested_field() {
        let value = Value::map([("meta", Value::map([("id", Value::from(7))]))]);
        assert_eq!(value.resolve(&path("meta.id")), Some(&Value::Integer(7)));
        assert_eq!(value.resolve(&path("meta.missing")), None);
        assert_eq!(value.resolve(&path("")), Some(&value));
    }

    #[test]
    fn inject_creates_intermediate_maps() {
        let mut value = Value::map([("title", Value::from("t1"))]);
        value.inject(&path("meta.id"), Value::from(3)).unwrap();
        assert_eq!(value.resolve(&path("meta.id")), Some(&Value::Integer(3)));
        assert_eq!(value.field("title"), Some(&Value::from("t1")));
    }

    #[test]
    fn inject_into_scalar_fails() {
        let mut value = Value::from("plain");
        assert!(value.inject(&path("id"), Value::from(1)).is_err());
        let mut record = Value::map([("id", Value::from(1))]);
        assert!(record.inject(&path("id.inner"), Value::from(2)).is_err());
    }

    #[test]
    fn key_conversion() {
        assert_eq!(Value::from(3).to_key().unwrap(), Key::from(3));
        assert_eq!(Value::from("one").to_key().unwrap(), Key::from("one"));
        assert!(Value::Null.to_key().is_err());
        assert!(Value::Float(f64::NAN).to_key().is_err());
        assert!(Value::Array(vec![Value::Bool(true)]).to_key().is_err());
    }

    #[test]
    fn integral_number_keys_become_integers() {
        assert_eq!(Value::from(Key::from(42)), Value::Integer(42));
        assert_eq!(Value::from(Key::Number(1.5)), Value::Float(1.5));
    }
}
