//! Executes queued operations against committed state plus the overlay.

use super::state::{KeySource, Operation, StoreOverlay, TxnCell, TxnInner};
use crate::engine::{Registry, Shared};
use crate::error::{DomException, ErrorKind};
use crate::journal::JournalOp;
use crate::request::RequestResult;
use crate::state::{StoreData, StoreMeta, MAX_GENERATED_KEY};
use stashdb_codec::{encoded_len, Key, Value};
use std::sync::Arc;

pub(super) fn execute(
    shared: &Arc<Shared>,
    reg: &Registry,
    cell: &TxnCell,
    inner: &mut TxnInner,
    store: &str,
    operation: Operation,
) -> Result<RequestResult, DomException> {
    let committed = reg
        .databases
        .get(&cell.db_name)
        .and_then(|slot| slot.state.stores.get(store));
    let meta = match &inner.schema {
        Some(schema) => schema.get(store).cloned(),
        None => committed.map(|data| data.meta.clone()),
    }
    .ok_or_else(|| {
        DomException::new(
            ErrorKind::InvalidState,
            format!("object store {store:?} has been deleted"),
        )
    })?;

    match operation {
        Operation::Get { key } => {
            let found = StoreOverlay::lookup(inner.overlay.get(store), committed, &key);
            match found {
                Some(value) => {
                    shared
                        .stats
                        .record_read(encoded_len(value).unwrap_or(0) as u64);
                    Ok(RequestResult::Value(value.clone()))
                }
                None => {
                    shared.stats.record_read(0);
                    Ok(RequestResult::Absent)
                }
            }
        }
        Operation::GetAll { limit } => {
            let visible = StoreOverlay::visible(inner.overlay.get(store), committed);
            let values: Vec<Value> = visible
                .into_values()
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            shared.stats.record_read(0);
            Ok(RequestResult::Values(values))
        }
        Operation::Count => {
            let count = StoreOverlay::visible(inner.overlay.get(store), committed).len();
            shared.stats.record_read(0);
            Ok(RequestResult::Count(count as u64))
        }
        Operation::Put {
            value,
            key,
            no_overwrite,
        } => put(shared, inner, committed, store, &meta, value, key, no_overwrite),
        Operation::Delete { key } => {
            inner
                .overlay
                .entry(store.to_string())
                .or_default()
                .entries
                .insert(key.clone(), None);
            inner.ops.push(JournalOp::Delete {
                store: store.to_string(),
                key,
            });
            shared.stats.record_delete();
            Ok(RequestResult::Done)
        }
        Operation::Clear => {
            let overlay = inner.overlay.entry(store.to_string()).or_default();
            overlay.cleared = true;
            overlay.entries.clear();
            inner.ops.push(JournalOp::Clear {
                store: store.to_string(),
            });
            shared.stats.record_delete();
            Ok(RequestResult::Done)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn put(
    shared: &Arc<Shared>,
    inner: &mut TxnInner,
    committed: Option<&StoreData>,
    store: &str,
    meta: &StoreMeta,
    mut value: Value,
    source: KeySource,
    no_overwrite: bool,
) -> Result<RequestResult, DomException> {
    let current = StoreOverlay::generator(inner.overlay.get(store), committed);

    let (key, generated) = match source {
        KeySource::Known(key) => {
            let observed = meta
                .auto_increment
                .then(|| observed_generator(&key, current))
                .flatten();
            (key, observed)
        }
        KeySource::Generate => {
            if current >= MAX_GENERATED_KEY {
                return Err(DomException::new(
                    ErrorKind::Constraint,
                    "the key generator is exhausted",
                ));
            }
            let next = current + 1;
            #[allow(clippy::cast_precision_loss)]
            let key = Key::Number(next as f64);
            if let Some(path) = &meta.key_path {
                value
                    .inject(path, Value::from(key.clone()))
                    .map_err(|e| DomException::new(ErrorKind::Data, e.to_string()))?;
            }
            (key, Some(next))
        }
    };

    if no_overwrite
        && StoreOverlay::lookup(inner.overlay.get(store), committed, &key).is_some()
    {
        return Err(DomException::new(
            ErrorKind::Constraint,
            format!("a record with key {key} already exists"),
        ));
    }

    let overlay = inner.overlay.entry(store.to_string()).or_default();
    overlay.entries.insert(key.clone(), Some(value.clone()));
    if let Some(next) = generated {
        overlay.key_generator = Some(next);
        inner.ops.push(JournalOp::BumpKeyGenerator {
            store: store.to_string(),
            current: next,
        });
    }
    inner.ops.push(JournalOp::Put {
        store: store.to_string(),
        key: key.clone(),
        value,
    });
    shared.stats.record_write();
    Ok(RequestResult::Key(key))
}

/// New generator position after an explicit numeric key, if it moves.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn observed_generator(key: &Key, current: u64) -> Option<u64> {
    let n = key.as_number()?;
    if n < 1.0 {
        return None;
    }
    let floor = n.floor().min(MAX_GENERATED_KEY as f64) as u64;
    (floor > current).then_some(floor)
}
