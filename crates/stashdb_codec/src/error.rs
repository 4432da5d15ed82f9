//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while building keys or encoding values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The value cannot be used as a key.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the value was rejected.
        reason: String,
    },

    /// The key path string is malformed.
    #[error("invalid key path: {path:?}")]
    InvalidKeyPath {
        /// The rejected key path.
        path: String,
    },
}

impl CodecError {
    /// Creates an invalid key error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }
}
