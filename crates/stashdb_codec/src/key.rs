//! Record keys and their total order.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A key identifying a record inside an object store.
///
/// Keys are ordered first by type, `Number < Text < Binary < Array`, then by
/// content: numbers numerically, text by code point,
/// binary bytewise and arrays element by element (shorter prefix first).
///
/// `NaN` is not a valid key. Use [`Key::number`] or [`Key::validate`] before
/// handing a key built from untrusted input to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    /// A finite or infinite number (never `NaN`).
    Number(f64),
    /// A string.
    Text(String),
    /// A byte string.
    Binary(#[serde(with = "crate::raw_bytes")] Vec<u8>),
    /// An array of keys.
    Array(Vec<Key>),
}

impl Key {
    /// Creates a number key, rejecting `NaN`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] for `NaN`.
    pub fn number(n: f64) -> CodecResult<Self> {
        if n.is_nan() {
            Err(CodecError::invalid_key("NaN is not a valid key"))
        } else {
            Ok(Self::Number(n))
        }
    }

    /// Checks that the key (recursively) contains no `NaN`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if a `NaN` is found.
    pub fn validate(&self) -> CodecResult<()> {
        match self {
            Self::Number(n) if n.is_nan() => {
                Err(CodecError::invalid_key("NaN is not a valid key"))
            }
            Self::Array(items) => items.iter().try_for_each(Key::validate),
            _ => Ok(()),
        }
    }

    /// Returns the number if this is a number key.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text if this is a text key.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Text(_) => 1,
            Self::Binary(_) => 2,
            Self::Array(_) => 3,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // NaN never reaches a store; treating it as equal keeps Ord total.
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Key {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_order() {
        let number = Key::from(1000);
        let text = Key::from("a");
        let binary = Key::from(vec![0u8]);
        let array = Key::Array(vec![]);

        assert!(number < text);
        assert!(text < binary);
        assert!(binary < array);
    }

    #[test]
    fn numbers_compare_numerically() {
        assert!(Key::from(-5) < Key::from(2));
        assert!(Key::Number(f64::NEG_INFINITY) < Key::from(i64::MIN));
        assert_eq!(Key::Number(0.0), Key::Number(-0.0));
    }

    #[test]
    fn arrays_compare_elementwise_then_length() {
        let short = Key::Array(vec![Key::from(1)]);
        let long = Key::Array(vec![Key::from(1), Key::from(0)]);
        let bigger = Key::Array(vec![Key::from(2)]);

        assert!(short < long);
        assert!(long < bigger);
    }

    #[test]
    fn nan_rejected() {
        assert!(Key::number(f64::NAN).is_err());
        assert!(Key::Array(vec![Key::Number(f64::NAN)]).validate().is_err());
        assert!(Key::from("ok").validate().is_ok());
    }

    #[test]
    fn display() {
        let key = Key::Array(vec![Key::from(1), Key::from("x")]);
        assert_eq!(key.to_string(), "[1, \"x\"]");
    }
}
