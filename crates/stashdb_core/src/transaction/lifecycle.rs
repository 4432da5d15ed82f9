//! Transaction scheduling, request execution, commit and abort.
//!
//! A transaction moves through these tasks on the event loop:
//!
//! - **start**: once no earlier overlapping transaction is unfinished
//! - **step**: executes the head request, delivers its callback with the
//!   transaction accepting, then schedules the next step
//! - **finalize**: when commit was requested (explicitly or implicitly) and
//!   the queue is empty, appends one journal record and applies it

use super::execute;
use super::state::{PendingRequest, TxnCell, TxnInner, UpgradeContext};
use crate::engine::{schedule_pump, Registry, Shared};
use crate::error::{CoreError, CoreResult, DomException, ErrorKind};
use crate::journal::JournalOp;
use crate::open;
use crate::request::{Delivery, ErrorDisposition};
use crate::types::{ConnectionId, TransactionMode, TransactionState};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registers a new read-only or read-write transaction on `db_name`.
pub(crate) fn create(
    shared: &Arc<Shared>,
    reg: &mut Registry,
    connection: ConnectionId,
    db_name: &str,
    scope: BTreeSet<String>,
    mode: TransactionMode,
) -> CoreResult<Arc<TxnCell>> {
    let id = reg.allocate_transaction();
    let cell = Arc::new(TxnCell {
        id,
        db_name: db_name.to_string(),
        connection,
        mode,
        scope,
        inner: Mutex::new(TxnInner::new()),
    });
    reg.slot_mut(db_name)?.live.push(Arc::clone(&cell));
    debug!(target: "stashdb::txn", txn = %id, %mode, database = db_name, "transaction created");

    let hook_shared = Arc::clone(shared);
    let hook_cell = Arc::clone(&cell);
    shared
        .event_loop
        .at_checkpoint(move || deactivate(&hook_shared, &hook_cell));

    start_ready(shared, reg, db_name);
    Ok(cell)
}

/// Ends the creating task's window: the transaction stops accepting.
fn deactivate(shared: &Arc<Shared>, cell: &Arc<TxnCell>) {
    let mut inner = cell.inner.lock();
    inner.accepting = false;
    schedule_next(shared, cell, &mut inner);
}

/// Starts every transaction of `db_name` that is no longer blocked.
pub(crate) fn start_ready(shared: &Arc<Shared>, reg: &Registry, db_name: &str) {
    let Some(slot) = reg.databases.get(db_name) else {
        return;
    };
    for (index, cell) in slot.live.iter().enumerate() {
        let mut inner = cell.inner.lock();
        if inner.started || inner.state.is_finished() {
            continue;
        }
        if slot.live[..index].iter().any(|earlier| cell.conflicts_with(earlier)) {
            continue;
        }
        inner.started = true;
        shared.stats.record_transaction_start();
        debug!(target: "stashdb::txn", txn = %cell.id, "transaction started");
        schedule_next(shared, cell, &mut inner);
    }
}

/// Queues whatever the transaction needs next: a step for the head
/// request, or finalization once nothing is left and no new request can
/// arrive.
pub(crate) fn schedule_next(shared: &Arc<Shared>, cell: &Arc<TxnCell>, inner: &mut TxnInner) {
    if !inner.started || inner.state.is_finished() {
        return;
    }
    if !inner.queue.is_empty() {
        if !inner.step_scheduled {
            inner.step_scheduled = true;
            let task_shared = Arc::clone(shared);
            let task_cell = Arc::clone(cell);
            shared
                .event_loop
                .queue_task(move || run_step(&task_shared, &task_cell));
        }
        return;
    }
    if inner.state == TransactionState::Active && !inner.accepting {
        inner.state = TransactionState::Committing;
        debug!(target: "stashdb::txn", txn = %cell.id, "auto-commit");
    }
    if inner.state == TransactionState::Committing && !inner.finalize_scheduled {
        inner.finalize_scheduled = true;
        let task_shared = Arc::clone(shared);
        let task_cell = Arc::clone(cell);
        shared
            .event_loop
            .queue_task(move || finalize(&task_shared, &task_cell));
    }
}

/// Executes the head request and delivers its outcome.
fn run_step(shared: &Arc<Shared>, cell: &Arc<TxnCell>) {
    let (outcome, delivery) = {
        let reg = shared.registry.lock();
        let mut inner = cell.inner.lock();
        inner.step_scheduled = false;
        if inner.state.is_finished() {
            return;
        }
        let Some(PendingRequest {
            store,
            operation,
            request,
        }) = inner.queue.pop_front()
        else {
            schedule_next(shared, cell, &mut inner);
            return;
        };
        let outcome = execute::execute(shared, &reg, cell, &mut inner, &store, operation);
        let delivery = request.resolve(outcome.clone());
        if inner.state == TransactionState::Active {
            inner.accepting = true;
        }
        (outcome, delivery)
    };

    let disposition = match (&outcome, delivery) {
        (Ok(result), Delivery::Success(callback)) => {
            if let Some(callback) = callback {
                callback(result);
            }
            ErrorDisposition::Handled
        }
        (Err(error), Delivery::Error(callback)) => {
            shared.stats.record_request_failure();
            callback.map_or(ErrorDisposition::Propagate, |callback| callback(error))
        }
        _ => ErrorDisposition::Handled,
    };

    let mut reg = shared.registry.lock();
    let mut inner = cell.inner.lock();
    inner.accepting = false;
    if let Err(error) = outcome {
        if disposition == ErrorDisposition::Propagate && !inner.state.is_finished() {
            abort_locked(shared, &mut reg, cell, &mut inner, error);
            return;
        }
    }
    schedule_next(shared, cell, &mut inner);
}

/// Persists the transaction's effects and marks it committed.
fn finalize(shared: &Arc<Shared>, cell: &Arc<TxnCell>) {
    let mut reg = shared.registry.lock();
    let mut inner = cell.inner.lock();
    inner.finalize_scheduled = false;
    if inner.state != TransactionState::Committing {
        return;
    }
    if !inner.queue.is_empty() {
        schedule_next(shared, cell, &mut inner);
        return;
    }

    let ops = std::mem::take(&mut inner.ops);
    if !ops.is_empty() {
        if let Err(e) = persist(shared, &mut reg, &cell.db_name, &ops) {
            abort_locked(shared, &mut reg, cell, &mut inner, e.to_exception());
            return;
        }
    }

    inner.state = TransactionState::Committed;
    inner.overlay.clear();
    shared.stats.record_transaction_commit();
    debug!(target: "stashdb::txn", txn = %cell.id, ops = ops.len(), "transaction committed");

    if let Some(on_complete) = inner.on_complete.take() {
        shared.event_loop.queue_task(on_complete);
    }
    let upgrade = inner.upgrade.take();
    retire(shared, &mut reg, cell, upgrade, None);
}

/// Appends one commit record and applies it to the committed state.
fn persist(
    shared: &Arc<Shared>,
    reg: &mut Registry,
    db_name: &str,
    ops: &[JournalOp],
) -> CoreResult<()> {
    let usage = reg.usage()?;
    let slot = reg.slot_mut(db_name)?;
    let frame = slot.journal.encode_commit(ops)?;
    let needed = usage + frame.len() as u64;
    if needed > shared.config.quota {
        return Err(CoreError::dom(
            ErrorKind::QuotaExceeded,
            format!(
                "commit needs {needed} bytes, quota is {}",
                shared.config.quota
            ),
        ));
    }
    let written = slot.journal.append_frame(&frame)?;
    for op in ops {
        slot.state.apply(op);
    }
    shared.stats.record_journal_append(written);
    Ok(())
}

/// Moves the transaction to `Aborted`, fails its queued requests with
/// `AbortError` and schedules the abort notifications.
pub(crate) fn abort_locked(
    shared: &Arc<Shared>,
    reg: &mut Registry,
    cell: &Arc<TxnCell>,
    inner: &mut TxnInner,
    error: DomException,
) {
    inner.state = TransactionState::Aborted;
    inner.accepting = false;
    inner.error = Some(error.clone());
    inner.overlay.clear();
    inner.ops.clear();

    let cancelled = DomException::new(ErrorKind::Abort, "The transaction was aborted.");
    let callbacks: Vec<_> = inner
        .queue
        .drain(..)
        .filter_map(|pending| match pending.request.resolve(Err(cancelled.clone())) {
            Delivery::Error(callback) => callback,
            Delivery::Success(_) => None,
        })
        .collect();
    let on_abort = inner.on_abort.take();

    shared.stats.record_transaction_abort();
    if error.kind == ErrorKind::Abort {
        debug!(target: "stashdb::txn", txn = %cell.id, "transaction aborted");
    } else {
        warn!(target: "stashdb::txn", txn = %cell.id, %error, "transaction aborted");
    }

    shared.event_loop.queue_task(move || {
        for callback in callbacks {
            let _ = callback(&cancelled);
        }
        if let Some(on_abort) = on_abort {
            on_abort(&error);
        }
    });

    let upgrade = inner.upgrade.take();
    let error = inner.error.clone();
    retire(shared, reg, cell, upgrade, error);
}

/// Removes a finished transaction from its database and lets whatever it
/// was blocking proceed.
fn retire(
    shared: &Arc<Shared>,
    reg: &mut Registry,
    cell: &Arc<TxnCell>,
    upgrade: Option<UpgradeContext>,
    error: Option<DomException>,
) {
    if let Some(slot) = reg.databases.get_mut(&cell.db_name) {
        slot.live.retain(|t| !Arc::ptr_eq(t, cell));
        if slot.upgrade.as_ref().is_some_and(|t| Arc::ptr_eq(t, cell)) {
            slot.upgrade = None;
        }
    }
    if let Some(upgrade) = upgrade {
        open::finish_upgrade(shared, reg, cell.connection, upgrade, error);
    }
    reg.settle_connection(cell.connection);
    schedule_pump(shared, &cell.db_name);
}
