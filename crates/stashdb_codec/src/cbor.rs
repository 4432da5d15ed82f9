//! CBOR encoding built on `ciborium`.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable item to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(item: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(item, &mut buffer).map_err(|e| CodecError::EncodingFailed {
        message: e.to_string(),
    })?;
    Ok(buffer)
}

/// Decodes CBOR bytes into `T`.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] for malformed input or a shape
/// mismatch.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::DecodingFailed {
        message: e.to_string(),
    })
}

/// Returns the number of bytes `value` occupies once encoded.
///
/// # Errors
///
/// Returns an error if the value cannot be encoded.
pub fn encoded_len(value: &Value) -> CodecResult<usize> {
    to_cbor(value).map(|bytes| bytes.len())
}
