//! # StashDB Codec
//!
//! The data model shared by every StashDB crate:
//!
//! - [`Key`]: record keys with the IndexedDB total order
//! - [`Value`]: structured values stored in object stores
//! - [`KeyPath`]: dotted paths used for in-line keys
//! - CBOR encoding via `ciborium` ([`to_cbor`], [`from_cbor`])
//!
//! ## Usage
//!
//! ```
//! use stashdb_codec::{from_cbor, to_cbor, Key, KeyPath, Value};
//!
//! let book = Value::map([("isbn", "one".into()), ("title", "t1".into())]);
//! let isbn = KeyPath::parse("isbn").unwrap();
//! assert_eq!(book.resolve(&isbn).unwrap().to_key().unwrap(), Key::from("one"));
//!
//! let bytes = to_cbor(&book).unwrap();
//! let decoded: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded, book);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod key;
mod key_path;
mod raw_bytes;
mod value;

pub use cbor::{encoded_len, from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use key::Key;
pub use key_path::KeyPath;
pub use value::Value;
