//! Object stores: key/value collections reached through a transaction.

use crate::engine::{Registry, Shared};
use crate::error::{CoreError, CoreResult};
use crate::request::{Request, RequestCell};
use crate::state::StoreMeta;
use crate::transaction::{lifecycle, KeySource, Operation, PendingRequest, TxnCell, TxnInner};
use crate::types::TransactionMode;
use stashdb_codec::{encoded_len, Key, KeyPath, Value};
use std::sync::Arc;

/// Handle to an object store within one transaction.
///
/// Every operation returns a [`Request`] that resolves when the transaction
/// reaches it. Synchronous checks run first, in this order:
///
/// 1. the store was deleted: `InvalidStateError`
/// 2. the transaction is not accepting: `TransactionInactiveError`
/// 3. a write in a read-only transaction: `ReadOnlyError`
/// 4. an invalid key or value: `DataError`
#[derive(Clone)]
pub struct ObjectStore {
    shared: Arc<Shared>,
    txn: Arc<TxnCell>,
    name: String,
}

impl ObjectStore {
    pub(crate) fn new(shared: Arc<Shared>, txn: Arc<TxnCell>, name: String) -> Self {
        Self { shared, txn, name }
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the in-line key path, if any.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the store was deleted.
    pub fn key_path(&self) -> CoreResult<Option<KeyPath>> {
        let reg = self.shared.registry.lock();
        let inner = self.txn.inner.lock();
        Ok(self.meta(&reg, &inner)?.key_path)
    }

    /// Returns whether the store generates keys.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the store was deleted.
    pub fn auto_increment(&self) -> CoreResult<bool> {
        let reg = self.shared.registry.lock();
        let inner = self.txn.inner.lock();
        Ok(self.meta(&reg, &inner)?.auto_increment)
    }

    /// Reads the record stored under `key`. A miss resolves with
    /// [`RequestResult::Absent`](crate::RequestResult::Absent).
    ///
    /// # Errors
    ///
    /// See the type-level check order.
    pub fn get(&self, key: impl Into<Key>) -> CoreResult<Request> {
        let key = key.into();
        self.submit(false, |_| {
            key.validate()?;
            Ok(Operation::Get { key })
        })
    }

    /// Reads up to `limit` records in key order.
    ///
    /// # Errors
    ///
    /// See the type-level check order.
    pub fn get_all(&self, limit: Option<usize>) -> CoreResult<Request> {
        self.submit(false, |_| Ok(Operation::GetAll { limit }))
    }

    /// Counts the records.
    ///
    /// # Errors
    ///
    /// See the type-level check order.
    pub fn count(&self) -> CoreResult<Request> {
        self.submit(false, |_| Ok(Operation::Count))
    }

    /// Writes a record, replacing any existing one.
    ///
    /// Stores with a key path take the key from the value and reject an
    /// explicit `key`; other stores need `key` unless they generate keys.
    ///
    /// # Errors
    ///
    /// See the type-level check order.
    pub fn put(&self, value: impl Into<Value>, key: Option<Key>) -> CoreResult<Request> {
        self.write(value.into(), key, false)
    }

    /// Writes a record; the request fails with `ConstraintError` if the key
    /// already exists.
    ///
    /// # Errors
    ///
    /// See the type-level check order.
    pub fn add(&self, value: impl Into<Value>, key: Option<Key>) -> CoreResult<Request> {
        self.write(value.into(), key, true)
    }

    /// Removes the record stored under `key`.
    ///
    /// # Errors
    ///
    /// See the type-level check order.
    pub fn delete(&self, key: impl Into<Key>) -> CoreResult<Request> {
        let key = key.into();
        self.submit(true, |_| {
            key.validate()?;
            Ok(Operation::Delete { key })
        })
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// See the type-level check order.
    pub fn clear(&self) -> CoreResult<Request> {
        self.submit(true, |_| Ok(Operation::Clear))
    }

    fn write(&self, value: Value, key: Option<Key>, no_overwrite: bool) -> CoreResult<Request> {
        let max = self.shared.config.max_value_size;
        self.submit(true, move |meta| {
            let source = match (&meta.key_path, key) {
                (Some(_), Some(_)) => {
                    return Err(CoreError::data(
                        "a store with a key path does not take an explicit key",
                    ))
                }
                (Some(path), None) => match value.resolve(path) {
                    Some(found) => KeySource::Known(found.to_key()?),
                    None if meta.auto_increment => {
                        value.clone().inject(path, Value::Null)?;
                        KeySource::Generate
                    }
                    None => {
                        return Err(CoreError::data(format!(
                            "the value has no key at key path {path:?}",
                            path = path.as_str()
                        )))
                    }
                },
                (None, Some(key)) => {
                    key.validate()?;
                    KeySource::Known(key)
                }
                (None, None) if meta.auto_increment => KeySource::Generate,
                (None, None) => {
                    return Err(CoreError::data(
                        "the store uses out-of-line keys and no key was given",
                    ))
                }
            };
            let size = encoded_len(&value)?;
            if size > max {
                return Err(CoreError::data(format!(
                    "value of {size} bytes exceeds the {max} byte limit"
                )));
            }
            Ok(Operation::Put {
                value,
                key: source,
                no_overwrite,
            })
        })
    }

    fn meta(&self, reg: &Registry, inner: &TxnInner) -> CoreResult<StoreMeta> {
        let meta = match &inner.schema {
            Some(schema) => schema.get(&self.name).cloned(),
            None => reg
                .databases
                .get(&self.txn.db_name)
                .and_then(|slot| slot.state.stores.get(&self.name))
                .map(|data| data.meta.clone()),
        };
        meta.ok_or_else(|| {
            CoreError::invalid_state(format!("object store {:?} has been deleted", self.name))
        })
    }

    fn submit(
        &self,
        writes: bool,
        build: impl FnOnce(&StoreMeta) -> CoreResult<Operation>,
    ) -> CoreResult<Request> {
        let reg = self.shared.registry.lock();
        let mut inner = self.txn.inner.lock();
        let meta = self.meta(&reg, &inner)?;
        if !inner.is_accepting() {
            return Err(CoreError::transaction_inactive(
                "the transaction is not accepting requests",
            ));
        }
        if writes && self.txn.mode == TransactionMode::ReadOnly {
            return Err(CoreError::read_only("the transaction is read-only"));
        }
        let operation = build(&meta)?;

        let cell = RequestCell::new(self.txn.id, &self.name);
        inner.queue.push_back(PendingRequest {
            store: self.name.clone(),
            operation,
            request: Arc::clone(&cell),
        });
        lifecycle::schedule_next(&self.shared, &self.txn, &mut inner);
        Ok(Request::new(cell))
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.name)
            .field("transaction", &self.txn.id)
            .finish()
    }
}
