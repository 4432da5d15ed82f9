//! Committed database contents.
//!
//! A [`DatabaseState`] is what replaying a journal produces, and what each
//! commit advances by applying its [`JournalOp`]s in order.

use crate::journal::JournalOp;
use stashdb_codec::{Key, KeyPath, Value};
use std::collections::BTreeMap;

/// Largest value a key generator may hand out (2^53).
pub const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

/// Schema of an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMeta {
    /// In-line key path; `None` means keys are supplied out of line.
    pub key_path: Option<KeyPath>,
    /// Whether the store generates keys.
    pub auto_increment: bool,
}

/// Committed records of one object store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreData {
    /// Store schema.
    pub meta: StoreMeta,
    /// Records in key order.
    pub records: BTreeMap<Key, Value>,
    /// Last number the key generator handed out.
    pub key_generator: u64,
}

impl StoreData {
    /// Creates an empty store.
    #[must_use]
    pub fn new(meta: StoreMeta) -> Self {
        Self {
            meta,
            records: BTreeMap::new(),
            key_generator: 0,
        }
    }
}

/// Committed contents of one database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseState {
    /// Current version; 0 means never upgraded.
    pub version: u64,
    /// Object stores by name.
    pub stores: BTreeMap<String, StoreData>,
}

impl DatabaseState {
    /// Applies one mutation.
    ///
    /// Record ops against a missing store are ignored; a journal never
    /// contains them unless it was edited by hand.
    pub fn apply(&mut self, op: &JournalOp) {
        match op {
            JournalOp::SetVersion { version } => self.version = *version,
            JournalOp::CreateStore {
                name,
                key_path,
                auto_increment,
            } => {
                self.stores.insert(
                    name.clone(),
                    StoreData::new(StoreMeta {
                        key_path: key_path.clone(),
                        auto_increment: *auto_increment,
                    }),
                );
            }
            JournalOp::DeleteStore { name } => {
                self.stores.remove(name);
            }
            JournalOp::Put { store, key, value } => {
                if let Some(data) = self.stores.get_mut(store) {
                    data.records.insert(key.clone(), value.clone());
                }
            }
            JournalOp::Delete { store, key } => {
                if let Some(data) = self.stores.get_mut(store) {
                    data.records.remove(key);
                }
            }
            JournalOp::Clear { store } => {
                if let Some(data) = self.stores.get_mut(store) {
                    data.records.clear();
                }
            }
            JournalOp::BumpKeyGenerator { store, current } => {
                if let Some(data) = self.stores.get_mut(store) {
                    data.key_generator = data.key_generator.max(*current);
                }
            }
        }
    }

    /// Returns the schema of every store.
    #[must_use]
    pub fn schema(&self) -> BTreeMap<String, StoreMeta> {
        self.stores
            .iter()
            .map(|(name, data)| (name.clone(), data.meta.clone()))
            .collect()
    }

    /// Returns the total number of records across all stores.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.stores.values().map(|s| s.records.len()).sum()
    }
}
