//! Key paths: where an object store finds the key inside a value.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dotted path such as `isbn` or `meta.id`.
///
/// The empty path `""` designates the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath(String);

impl KeyPath {
    /// Parses and validates a key path.
    ///
    /// Every dot-separated segment must be a non-empty identifier made of
    /// letters, digits, `_` or `$`, not starting with a digit.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyPath`] for malformed paths.
    pub fn parse(path: impl Into<String>) -> CodecResult<Self> {
        let path = path.into();
        if path.is_empty() {
            return Ok(Self(path));
        }
        let valid = path.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        });
        if valid {
            Ok(Self(path))
        } else {
            Err(CodecError::InvalidKeyPath { path })
        }
    }

    /// Returns true for the empty path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the path segments. The root path has none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    /// Returns the path as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
