//! # StashDB Core
//!
//! Transactional key/value storage with IndexedDB semantics.
//!
//! This crate provides:
//! - A cooperative [`EventLoop`] on which every request resolves
//! - [`Factory`] for opening, upgrading and deleting databases
//! - [`Transaction`]s with explicit and implicit commit and all-or-nothing
//!   persistence through an append-only journal
//! - [`ObjectStore`] requests delivered in submission order
//! - [`StorageManager`] usage estimates
//! - [`BackgroundFetchEvent`] UI updates
//!
//! ## Example
//!
//! ```
//! use stashdb_core::{Config, Factory, StoreOptions, TransactionMode, TransactionState};
//! use stashdb_codec::Value;
//!
//! let factory = Factory::in_memory(Config::default());
//! let open = factory.open("library", Some(1)).unwrap();
//! open.on_upgrade_needed(|db, _txn, _old| {
//!     db.create_object_store("books", StoreOptions::key_path("isbn").unwrap())
//!         .unwrap();
//! });
//! factory.event_loop().run_until_idle();
//! let db = open.result().unwrap();
//!
//! let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
//! let books = txn.object_store("books").unwrap();
//! books
//!     .put(Value::map([("isbn", "one".into()), ("title", "t1".into())]), None)
//!     .unwrap();
//! txn.commit().unwrap();
//! assert!(txn.commit().is_err());
//!
//! factory.event_loop().run_until_idle();
//! assert_eq!(txn.state(), TransactionState::Committed);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background_fetch;
mod config;
mod database;
mod dir;
mod engine;
mod error;
mod event_loop;
mod factory;
mod journal;
mod object_store;
mod open;
mod request;
mod state;
mod stats;
mod transaction;
mod types;
mod usage;

pub use background_fetch::{
    dispatch, BackgroundFetchEvent, BackgroundFetchEventKind, BackgroundFetchRegistration,
    ImageResource, LifetimeExtension, UiOptions, UiPresenter, ALREADY_UPDATED_MESSAGE,
    INACTIVE_MESSAGE,
};
pub use config::Config;
pub use database::{Database, StoreOptions};
pub use dir::FactoryDir;
pub use error::{CoreError, CoreResult, DomException, ErrorKind};
pub use event_loop::{EventLoop, TimerId};
pub use factory::{DatabaseInfo, DatabaseReport, Factory, StoreReport};
pub use journal::{
    compute_crc32, replay, Journal, JournalOp, JournalRecord, Replay, JOURNAL_FORMAT, JOURNAL_MAGIC,
};
pub use object_store::ObjectStore;
pub use open::{DeleteRequest, OpenRequest};
pub use request::{ErrorDisposition, Request, RequestResult};
pub use state::{DatabaseState, StoreData, StoreMeta};
pub use stats::{EngineStats, StatsSnapshot};
pub use transaction::Transaction;
pub use types::{ConnectionId, ReadyState, SequenceNumber, TransactionId, TransactionMode, TransactionState};
pub use usage::{StorageEstimate, StorageManager, UsageSource, INDEXED_DB};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
