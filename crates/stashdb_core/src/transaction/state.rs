//! Per-transaction state.

use crate::error::DomException;
use crate::journal::JournalOp;
use crate::open::OpenCell;
use crate::request::RequestCell;
use crate::state::{StoreData, StoreMeta};
use crate::types::{ConnectionId, TransactionId, TransactionMode, TransactionState};
use parking_lot::Mutex;
use stashdb_codec::{Key, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Where a written record's key comes from.
#[derive(Debug, Clone)]
pub(crate) enum KeySource {
    /// Supplied by the caller or read from the value's key path.
    Known(Key),
    /// Taken from the store's key generator when the request executes.
    Generate,
}

/// A queued operation.
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    Get {
        key: Key,
    },
    GetAll {
        limit: Option<usize>,
    },
    Count,
    Put {
        value: Value,
        key: KeySource,
        no_overwrite: bool,
    },
    Delete {
        key: Key,
    },
    Clear,
}

pub(crate) struct PendingRequest {
    pub(crate) store: String,
    pub(crate) operation: Operation,
    pub(crate) request: Arc<RequestCell>,
}

/// Uncommitted changes to one object store.
#[derive(Debug, Default)]
pub(crate) struct StoreOverlay {
    /// Committed records are hidden (`clear`, or a store created in this
    /// transaction).
    pub(crate) cleared: bool,
    /// The store was created by this transaction.
    pub(crate) created: bool,
    /// Writes (`Some`) and deletions (`None`) layered over the committed records.
    pub(crate) entries: BTreeMap<Key, Option<Value>>,
    pub(crate) key_generator: Option<u64>,
}

impl StoreOverlay {
    pub(crate) fn fresh() -> Self {
        Self {
            cleared: true,
            created: true,
            ..Self::default()
        }
    }

    /// Looks up `key` through the overlay.
    pub(crate) fn lookup<'a>(
        overlay: Option<&'a Self>,
        committed: Option<&'a StoreData>,
        key: &Key,
    ) -> Option<&'a Value> {
        if let Some(overlay) = overlay {
            if let Some(entry) = overlay.entries.get(key) {
                return entry.as_ref();
            }
            if overlay.cleared {
                return None;
            }
        }
        committed.and_then(|data| data.records.get(key))
    }

    /// Returns every visible record in key order.
    pub(crate) fn visible<'a>(
        overlay: Option<&'a Self>,
        committed: Option<&'a StoreData>,
    ) -> BTreeMap<&'a Key, &'a Value> {
        let mut records: BTreeMap<&Key, &Value> = BTreeMap::new();
        let hide_committed = overlay.is_some_and(|o| o.cleared);
        if !hide_committed {
            if let Some(data) = committed {
                records.extend(data.records.iter());
            }
        }
        if let Some(overlay) = overlay {
            for (key, entry) in &overlay.entries {
                match entry {
                    Some(value) => {
                        records.insert(key, value);
                    }
                    None => {
                        records.remove(key);
                    }
                }
            }
        }
        records
    }

    /// Last number handed out by the key generator.
    pub(crate) fn generator(overlay: Option<&Self>, committed: Option<&StoreData>) -> u64 {
        match overlay {
            Some(StoreOverlay {
                key_generator: Some(current),
                ..
            }) => *current,
            Some(o) if o.created => 0,
            _ => committed.map_or(0, |data| data.key_generator),
        }
    }
}

/// Context of a version change transaction.
pub(crate) struct UpgradeContext {
    pub(crate) request: Arc<OpenCell>,
    pub(crate) old_version: u64,
    pub(crate) old_stores: BTreeSet<String>,
}

/// Mutable part of a transaction.
pub(crate) struct TxnInner {
    pub(crate) state: TransactionState,
    /// Inside the creating task or one of its request callbacks.
    pub(crate) accepting: bool,
    /// Not blocked by an earlier overlapping transaction.
    pub(crate) started: bool,
    pub(crate) step_scheduled: bool,
    pub(crate) finalize_scheduled: bool,
    pub(crate) queue: VecDeque<PendingRequest>,
    pub(crate) overlay: BTreeMap<String, StoreOverlay>,
    pub(crate) ops: Vec<JournalOp>,
    /// Working schema of a version change transaction.
    pub(crate) schema: Option<BTreeMap<String, StoreMeta>>,
    pub(crate) error: Option<DomException>,
    pub(crate) on_complete: Option<Box<dyn FnOnce() + Send>>,
    pub(crate) on_abort: Option<Box<dyn FnOnce(&DomException) + Send>>,
    pub(crate) upgrade: Option<UpgradeContext>,
}

impl TxnInner {
    pub(crate) fn new() -> Self {
        Self {
            state: TransactionState::Active,
            accepting: true,
            started: false,
            step_scheduled: false,
            finalize_scheduled: false,
            queue: VecDeque::new(),
            overlay: BTreeMap::new(),
            ops: Vec::new(),
            schema: None,
            error: None,
            on_complete: None,
            on_abort: None,
            upgrade: None,
        }
    }

    /// Active and inside a task where requests may be added.
    pub(crate) fn is_accepting(&self) -> bool {
        self.state == TransactionState::Active && self.accepting
    }
}

/// A transaction as the engine sees it.
pub(crate) struct TxnCell {
    pub(crate) id: TransactionId,
    pub(crate) db_name: String,
    pub(crate) connection: ConnectionId,
    pub(crate) mode: TransactionMode,
    /// Bound stores; empty for version change transactions, which cover
    /// the whole database.
    pub(crate) scope: BTreeSet<String>,
    pub(crate) inner: Mutex<TxnInner>,
}

impl TxnCell {
    /// Whether `self` must wait for the earlier transaction `earlier`.
    pub(crate) fn conflicts_with(&self, earlier: &Self) -> bool {
        if self.mode == TransactionMode::VersionChange
            || earlier.mode == TransactionMode::VersionChange
        {
            return true;
        }
        if self.mode == TransactionMode::ReadOnly && earlier.mode == TransactionMode::ReadOnly {
            return false;
        }
        !self.scope.is_disjoint(&earlier.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: u64, mode: TransactionMode, scope: &[&str]) -> TxnCell {
        TxnCell {
            id: TransactionId::new(id),
            db_name: "db".into(),
            connection: ConnectionId::new(1),
            mode,
            scope: scope.iter().map(|s| (*s).to_string()).collect(),
            inner: Mutex::new(TxnInner::new()),
        }
    }

    fn committed() -> StoreData {
        let mut data = StoreData::new(StoreMeta {
            key_path: None,
            auto_increment: true,
        });
        data.records.insert(Key::from(1), Value::from("a"));
        data.records.insert(Key::from(2), Value::from("b"));
        data.key_generator = 2;
        data
    }

    #[test]
    fn readers_do_not_conflict() {
        let a = cell(1, TransactionMode::ReadOnly, &["books"]);
        let b = cell(2, TransactionMode::ReadOnly, &["books"]);
        assert!(!b.conflicts_with(&a));
    }

    #[test]
    fn writers_conflict_on_overlap_only() {
        let a = cell(1, TransactionMode::ReadWrite, &["books"]);
        let b = cell(2, TransactionMode::ReadOnly, &["books", "authors"]);
        let c = cell(3, TransactionMode::ReadWrite, &["authors"]);
        assert!(b.conflicts_with(&a));
        assert!(!c.conflicts_with(&a));
    }

    #[test]
    fn version_change_conflicts_with_everything() {
        let a = cell(1, TransactionMode::VersionChange, &[]);
        let b = cell(2, TransactionMode::ReadOnly, &["books"]);
        assert!(b.conflicts_with(&a));
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn overlay_shadows_committed_records() {
        let data = committed();
        let mut overlay = StoreOverlay::default();
        overlay.entries.insert(Key::from(1), None);
        overlay.entries.insert(Key::from(3), Some(Value::from("c")));

        assert_eq!(StoreOverlay::lookup(Some(&overlay), Some(&data), &Key::from(1)), None);
        assert_eq!(
            StoreOverlay::lookup(Some(&overlay), Some(&data), &Key::from(2)),
            Some(&Value::from("b"))
        );
        let visible: Vec<_> = StoreOverlay::visible(Some(&overlay), Some(&data))
            .into_values()
            .cloned()
            .collect();
        assert_eq!(visible, vec![Value::from("b"), Value::from("c")]);
    }

    #[test]
    fn cleared_overlay_hides_committed_records() {
        let data = committed();
        let mut overlay = StoreOverlay::fresh();
        overlay.entries.insert(Key::from(9), Some(Value::Null));
        assert_eq!(StoreOverlay::lookup(Some(&overlay), Some(&data), &Key::from(2)), None);
        assert_eq!(StoreOverlay::visible(Some(&overlay), Some(&data)).len(), 1);
    }

    #[test]
    fn generator_prefers_overlay() {
        let data = committed();
        assert_eq!(StoreOverlay::generator(None, Some(&data)), 2);
        let overlay = StoreOverlay {
            key_generator: Some(7),
            ..StoreOverlay::default()
        };
        assert_eq!(StoreOverlay::generator(Some(&overlay), Some(&data)), 7);
        assert_eq!(StoreOverlay::generator(Some(&StoreOverlay::fresh()), Some(&data)), 0);
        let cleared = StoreOverlay {
            cleared: true,
            ..StoreOverlay::default()
        };
        assert_eq!(StoreOverlay::generator(Some(&cleared), Some(&data)), 2);
    }

    #[test]
    fn new_transactions_accept_requests() {
        let inner = TxnInner::new();
        assert!(inner.is_accepting());
        assert!(!inner.started);
    }
}
