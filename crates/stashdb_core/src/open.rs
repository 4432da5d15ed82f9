//! Open and delete requests.
//!
//! Requests against one database are served one at a time in arrival
//! order. An open that raises the version first asks every other
//! connection to close (`versionchange`), reports `blocked` while any stay
//! open, then runs the upgrade callback inside a version change
//! transaction. A delete notifies other connections, force-closes those
//! still open and releases the journal.

use crate::database::Database;
use crate::engine::{schedule_pump, Registry, Shared};
use crate::error::{CoreError, DomException, ErrorKind};
use crate::transaction::{lifecycle, Transaction, TxnCell, TxnInner, UpgradeContext};
use crate::types::{ConnectionId, ReadyState, TransactionMode};
use crate::journal::JournalOp;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub(crate) enum OpenKind {
    Open { version: Option<u64> },
    Delete,
}

pub(crate) enum OpenOutcome {
    Opened(Database),
    Deleted { old_version: u64 },
}

type OutcomeCallback = Box<dyn FnOnce(&OpenOutcome) + Send>;
type UpgradeCallback = Box<dyn FnOnce(&Database, &Transaction, u64) + Send>;
type BlockedCallback = Box<dyn FnOnce(u64, Option<u64>) + Send>;

pub(crate) struct OpenCell {
    name: String,
    kind: OpenKind,
    inner: Mutex<OpenInner>,
}

struct OpenInner {
    ready: ReadyState,
    outcome: Option<OpenOutcome>,
    error: Option<DomException>,
    on_success: Option<OutcomeCallback>,
    on_error: Option<Box<dyn FnOnce(&DomException) + Send>>,
    on_upgrade_needed: Option<UpgradeCallback>,
    on_blocked: Option<BlockedCallback>,
    queued: bool,
    notified: bool,
    blocked: bool,
}

impl OpenCell {
    pub(crate) fn new(name: &str, kind: OpenKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            inner: Mutex::new(OpenInner {
                ready: ReadyState::Pending,
                outcome: None,
                error: None,
                on_success: None,
                on_error: None,
                on_upgrade_needed: None,
                on_blocked: None,
                queued: false,
                notified: false,
                blocked: false,
            }),
        })
    }
}

/// Queues processing of an open or delete request.
pub(crate) fn schedule(shared: &Arc<Shared>, cell: &Arc<OpenCell>) {
    let task_shared = Arc::clone(shared);
    let task_cell = Arc::clone(cell);
    shared
        .event_loop
        .queue_task(move || process(&task_shared, &task_cell));
}

fn process(shared: &Arc<Shared>, cell: &Arc<OpenCell>) {
    let mut reg = shared.registry.lock();
    if cell.inner.lock().ready == ReadyState::Done {
        return;
    }

    if let OpenKind::Delete = cell.kind {
        if !reg.databases.contains_key(&cell.name) {
            succeed(shared, cell, OpenOutcome::Deleted { old_version: 0 });
            return;
        }
    }
    let slot = match reg.ensure_slot(&cell.name, &shared.config) {
        Ok(slot) => slot,
        Err(e) => {
            fail(shared, cell, e.to_exception());
            return;
        }
    };

    {
        let mut inner = cell.inner.lock();
        if !inner.queued {
            inner.queued = true;
            slot.queue.push_back(Arc::clone(cell));
        }
    }
    let is_front = slot.queue.front().is_some_and(|f| Arc::ptr_eq(f, cell));
    if !is_front || slot.upgrade.is_some() {
        return;
    }
    let current = slot.state.version;

    match cell.kind {
        OpenKind::Open { version } => {
            let requested = version.unwrap_or_else(|| current.max(1));
            if requested < current {
                slot.queue.pop_front();
                fail(
                    shared,
                    cell,
                    DomException::new(
                        ErrorKind::Version,
                        format!("requested version {requested} is lower than {current}"),
                    ),
                );
                schedule_pump(shared, &cell.name);
                return;
            }
            if requested == current {
                slot.queue.pop_front();
                let id = reg.new_connection(&cell.name, current);
                let db = Database::new(Arc::clone(shared), id, cell.name.clone());
                debug!(target: "stashdb::db", database = %cell.name, version = current, "connection opened");
                succeed(shared, cell, OpenOutcome::Opened(db));
                schedule_pump(shared, &cell.name);
                return;
            }
            if wait_for_others(shared, &reg, cell, current, Some(requested)) {
                return;
            }
            start_upgrade(shared, &mut reg, cell, current, requested);
        }
        OpenKind::Delete => {
            // Connections still open after the notification round are
            // closed by force rather than blocking the delete.
            let notified = cell.inner.lock().notified;
            if !notified && wait_for_others(shared, &reg, cell, current, None) {
                return;
            }
            delete(shared, &mut reg, cell, current);
        }
    }
}

/// Sends `versionchange` to other connections once and reports `blocked`
/// while any stay open. Returns true if the request must keep waiting.
fn wait_for_others(
    shared: &Arc<Shared>,
    reg: &Registry,
    cell: &Arc<OpenCell>,
    old: u64,
    new: Option<u64>,
) -> bool {
    let others = reg.open_connections(&cell.name);
    if others.is_empty() {
        return false;
    }
    let mut inner = cell.inner.lock();
    if !inner.notified {
        inner.notified = true;
        for id in &others {
            let Some(handler) = reg
                .connections
                .get(id)
                .and_then(|c| c.on_version_change.clone())
            else {
                continue;
            };
            let db = Database::new(Arc::clone(shared), *id, cell.name.clone());
            shared
                .event_loop
                .queue_task(move || handler(&db, old, new));
        }
        schedule(shared, cell);
        return true;
    }
    if !inner.blocked {
        inner.blocked = true;
        debug!(target: "stashdb::db", database = %cell.name, open = others.len(), "request blocked");
        if let Some(on_blocked) = inner.on_blocked.take() {
            shared.event_loop.queue_task(move || on_blocked(old, new));
        }
    }
    true
}

fn start_upgrade(
    shared: &Arc<Shared>,
    reg: &mut Registry,
    cell: &Arc<OpenCell>,
    old_version: u64,
    new_version: u64,
) {
    let connection = reg.new_connection(&cell.name, new_version);
    let id = reg.allocate_transaction();
    let Ok(slot) = reg.slot_mut(&cell.name) else {
        return;
    };

    let old_stores: BTreeSet<String> = slot.state.stores.keys().cloned().collect();
    let mut inner = TxnInner::new();
    inner.accepting = false;
    inner.started = true;
    inner.schema = Some(slot.state.schema());
    inner.ops.push(JournalOp::SetVersion {
        version: new_version,
    });
    inner.upgrade = Some(UpgradeContext {
        request: Arc::clone(cell),
        old_version,
        old_stores,
    });
    let txn = Arc::new(TxnCell {
        id,
        db_name: cell.name.clone(),
        connection,
        mode: TransactionMode::VersionChange,
        scope: BTreeSet::new(),
        inner: Mutex::new(inner),
    });
    slot.live.push(Arc::clone(&txn));
    slot.upgrade = Some(Arc::clone(&txn));
    if let Some(conn) = reg.connections.get_mut(&connection) {
        conn.upgrade = Some(Arc::clone(&txn));
    }
    shared.stats.record_transaction_start();
    info!(
        target: "stashdb::db",
        database = %cell.name,
        old_version,
        new_version,
        "upgrade started"
    );

    let db = Database::new(Arc::clone(shared), connection, cell.name.clone());
    let callback = {
        let mut open = cell.inner.lock();
        open.outcome = Some(OpenOutcome::Opened(db.clone()));
        open.on_upgrade_needed.take()
    };
    let task_shared = Arc::clone(shared);
    shared.event_loop.queue_task(move || {
        {
            let mut inner = txn.inner.lock();
            if inner.state.is_finished() {
                return;
            }
            inner.accepting = true;
        }
        let handle = Transaction::new(Arc::clone(&task_shared), Arc::clone(&txn));
        if let Some(callback) = callback {
            callback(&db, &handle, old_version);
        }
        let _reg = task_shared.registry.lock();
        let mut inner = txn.inner.lock();
        inner.accepting = false;
        lifecycle::schedule_next(&task_shared, &txn, &mut inner);
    });
}

/// Resolves the open request behind a finished version change transaction.
pub(crate) fn finish_upgrade(
    shared: &Arc<Shared>,
    reg: &mut Registry,
    connection: ConnectionId,
    upgrade: UpgradeContext,
    error: Option<DomException>,
) {
    let cell = upgrade.request;
    if let Ok(slot) = reg.slot_mut(&cell.name) {
        if slot.queue.front().is_some_and(|f| Arc::ptr_eq(f, &cell)) {
            slot.queue.pop_front();
        }
    }
    let closing = reg
        .connections
        .get(&connection)
        .map_or(true, |c| c.close_pending || c.closed);
    if let Some(conn) = reg.connections.get_mut(&connection) {
        conn.upgrade = None;
        if error.is_some() {
            conn.version = upgrade.old_version;
            conn.store_names = upgrade.old_stores;
            conn.close_pending = true;
        }
    }

    match error {
        Some(error) => {
            info!(target: "stashdb::db", database = %cell.name, %error, "upgrade aborted");
            fail(
                shared,
                &cell,
                DomException::new(ErrorKind::Abort, "the upgrade transaction was aborted"),
            );
        }
        None if closing => {
            fail(
                shared,
                &cell,
                DomException::new(
                    ErrorKind::Abort,
                    "the connection was closed before the upgrade finished",
                ),
            );
        }
        None => {
            info!(target: "stashdb::db", database = %cell.name, "upgrade committed");
            let db = Database::new(Arc::clone(shared), connection, cell.name.clone());
            succeed(shared, &cell, OpenOutcome::Opened(db));
        }
    }
}

fn delete(shared: &Arc<Shared>, reg: &mut Registry, cell: &Arc<OpenCell>, old_version: u64) {
    for id in reg.open_connections(&cell.name) {
        force_close(shared, reg, id);
    }

    let Some(mut slot) = reg.databases.remove(&cell.name) else {
        succeed(shared, cell, OpenOutcome::Deleted { old_version: 0 });
        return;
    };
    slot.queue.pop_front();
    for waiting in slot.queue.drain(..) {
        waiting.inner.lock().queued = false;
        schedule(shared, &waiting);
    }
    if let Err(e) = slot.journal.destroy() {
        fail(shared, cell, CoreError::from(e).to_exception());
        return;
    }
    info!(target: "stashdb::db", database = %cell.name, old_version, "database deleted");
    succeed(shared, cell, OpenOutcome::Deleted { old_version });
}

/// Closes a connection immediately, aborting its unfinished transactions.
fn force_close(shared: &Arc<Shared>, reg: &mut Registry, id: ConnectionId) {
    let Some(db_name) = reg.connections.get(&id).map(|c| c.db_name.clone()) else {
        return;
    };
    let victims: Vec<Arc<TxnCell>> = reg
        .databases
        .get(&db_name)
        .map(|slot| {
            slot.live
                .iter()
                .filter(|t| t.connection == id)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    for txn in victims {
        let mut inner = txn.inner.lock();
        if !inner.state.is_finished() {
            lifecycle::abort_locked(
                shared,
                reg,
                &txn,
                &mut inner,
                DomException::new(ErrorKind::Abort, "the database is being deleted"),
            );
        }
    }
    if let Some(conn) = reg.connections.get_mut(&id) {
        conn.close_pending = true;
        conn.closed = true;
        conn.on_version_change = None;
    }
    debug!(target: "stashdb::db", connection = %id, "connection force-closed");
}

fn succeed(shared: &Arc<Shared>, cell: &Arc<OpenCell>, outcome: OpenOutcome) {
    let callback = {
        let mut inner = cell.inner.lock();
        inner.ready = ReadyState::Done;
        inner.outcome = Some(outcome);
        inner.on_error = None;
        inner.on_success.take()
    };
    if let Some(callback) = callback {
        let task_cell = Arc::clone(cell);
        shared.event_loop.queue_task(move || {
            let inner = task_cell.inner.lock();
            if let Some(outcome) = &inner.outcome {
                let outcome = outcome.clone_handle();
                drop(inner);
                callback(&outcome);
            }
        });
    }
}

fn fail(shared: &Arc<Shared>, cell: &Arc<OpenCell>, error: DomException) {
    let callback = {
        let mut inner = cell.inner.lock();
        inner.ready = ReadyState::Done;
        inner.outcome = None;
        inner.error = Some(error.clone());
        inner.on_success = None;
        inner.on_error.take()
    };
    debug!(target: "stashdb::db", database = %cell.name, %error, "request failed");
    if let Some(callback) = callback {
        shared.event_loop.queue_task(move || callback(&error));
    }
}

impl OpenOutcome {
    fn clone_handle(&self) -> Self {
        match self {
            Self::Opened(db) => Self::Opened(db.clone()),
            Self::Deleted { old_version } => Self::Deleted {
                old_version: *old_version,
            },
        }
    }
}

/// Handle to a pending [`Factory::open`](crate::Factory::open).
#[derive(Clone)]
pub struct OpenRequest {
    cell: Arc<OpenCell>,
}

impl OpenRequest {
    pub(crate) fn new(cell: Arc<OpenCell>) -> Self {
        Self { cell }
    }

    /// Returns whether the request has resolved.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.cell.inner.lock().ready
    }

    /// Returns the connection once opened (also during the upgrade callback).
    #[must_use]
    pub fn result(&self) -> Option<Database> {
        match &self.cell.inner.lock().outcome {
            Some(OpenOutcome::Opened(db)) => Some(db.clone()),
            _ => None,
        }
    }

    /// Returns the error, if the open failed.
    #[must_use]
    pub fn error(&self) -> Option<DomException> {
        self.cell.inner.lock().error.clone()
    }

    /// Sets the callback run when a version change is needed. It receives
    /// the new connection, the version change transaction and the old
    /// version; schema changes are only allowed inside it.
    pub fn on_upgrade_needed(
        &self,
        callback: impl FnOnce(&Database, &Transaction, u64) + Send + 'static,
    ) {
        self.cell.inner.lock().on_upgrade_needed = Some(Box::new(callback));
    }

    /// Sets the callback run with the opened connection.
    pub fn on_success(&self, callback: impl FnOnce(&Database) + Send + 'static) {
        let mut inner = self.cell.inner.lock();
        if inner.ready == ReadyState::Pending {
            inner.on_success = Some(Box::new(move |outcome| {
                if let OpenOutcome::Opened(db) = outcome {
                    callback(db);
                }
            }));
        }
    }

    /// Sets the callback run if the open fails.
    pub fn on_error(&self, callback: impl FnOnce(&DomException) + Send + 'static) {
        let mut inner = self.cell.inner.lock();
        if inner.ready == ReadyState::Pending {
            inner.on_error = Some(Box::new(callback));
        }
    }

    /// Sets the callback run (once) while other connections keep the
    /// upgrade waiting. It receives the old and new versions.
    pub fn on_blocked(&self, callback: impl FnOnce(u64, Option<u64>) + Send + 'static) {
        self.cell.inner.lock().on_blocked = Some(Box::new(callback));
    }
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("name", &self.cell.name)
            .field("kind", &self.cell.kind)
            .field("ready", &self.ready_state())
            .finish()
    }
}

/// Handle to a pending [`Factory::delete_database`](crate::Factory::delete_database).
#[derive(Clone)]
pub struct DeleteRequest {
    cell: Arc<OpenCell>,
}

impl DeleteRequest {
    pub(crate) fn new(cell: Arc<OpenCell>) -> Self {
        Self { cell }
    }

    /// Returns whether the request has resolved.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.cell.inner.lock().ready
    }

    /// Returns the version the database had, once deleted (0 if it did not
    /// exist).
    #[must_use]
    pub fn old_version(&self) -> Option<u64> {
        match &self.cell.inner.lock().outcome {
            Some(OpenOutcome::Deleted { old_version }) => Some(*old_version),
            _ => None,
        }
    }

    /// Returns the error, if the delete failed.
    #[must_use]
    pub fn error(&self) -> Option<DomException> {
        self.cell.inner.lock().error.clone()
    }

    /// Sets the callback run once the database is gone. It receives the old
    /// version.
    pub fn on_success(&self, callback: impl FnOnce(u64) + Send + 'static) {
        let mut inner = self.cell.inner.lock();
        if inner.ready == ReadyState::Pending {
            inner.on_success = Some(Box::new(move |outcome| {
                if let OpenOutcome::Deleted { old_version } = outcome {
                    callback(*old_version);
                }
            }));
        }
    }

    /// Sets the callback run if the delete fails.
    pub fn on_error(&self, callback: impl FnOnce(&DomException) + Send + 'static) {
        let mut inner = self.cell.inner.lock();
        if inner.ready == ReadyState::Pending {
            inner.on_error = Some(Box::new(callback));
        }
    }

    /// Sets the callback run (once) while other connections stay open.
    pub fn on_blocked(&self, callback: impl FnOnce(u64, Option<u64>) + Send + 'static) {
        self.cell.inner.lock().on_blocked = Some(Box::new(callback));
    }
}

impl std::fmt::Debug for DeleteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteRequest")
            .field("name", &self.cell.name)
            .field("ready", &self.ready_state())
            .finish()
    }
}
