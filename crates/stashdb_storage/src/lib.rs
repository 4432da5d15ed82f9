//! # StashDB Storage
//!
//! Byte stores that back StashDB journals.
//!
//! Every database owns exactly one backend. Backends are opaque append-only
//! byte stores: the core crate frames, checksums and interprets the bytes,
//! the backend only keeps them. The current size of a backend is what the
//! usage accountant reports for that database.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral factories and tests
//! - [`FileBackend`] - persistent factories rooted in a directory
//!
//! ## Example
//!
//! ```rust
//! use stashdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"record-1").unwrap();
//! backend.append(b"record-2").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"record-1record-2");
//! assert_eq!(backend.size().unwrap(), 16);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
