//! Transactions: scoped units of work with all-or-nothing persistence.
//!
//! Lifecycle: `Active → Committing → Committed`, or `Active → Aborted`.
//!
//! While `Active`, a transaction additionally *accepts* requests only
//! inside the task that created it and inside callbacks of its own
//! requests. Once it stops accepting and its queue drains, it commits on
//! its own; [`Transaction::commit`] requests that earlier.

mod execute;
pub(crate) mod lifecycle;
mod state;

pub(crate) use state::{KeySource, Operation, PendingRequest, StoreOverlay, TxnCell, TxnInner, UpgradeContext};

use crate::database::Database;
use crate::engine::Shared;
use crate::error::{CoreError, CoreResult, DomException, ErrorKind};
use crate::object_store::ObjectStore;
use crate::types::{TransactionId, TransactionMode, TransactionState};
use std::sync::Arc;
use tracing::debug;

/// Handle to a transaction.
///
/// Cloning yields another handle to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<Shared>,
    cell: Arc<TxnCell>,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<Shared>, cell: Arc<TxnCell>) -> Self {
        Self { shared, cell }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.cell.id
    }

    /// Returns the transaction mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.cell.mode
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.cell.inner.lock().state
    }

    /// Returns true while new requests and `commit()` are allowed.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.cell.inner.lock().is_accepting()
    }

    /// Returns the error the transaction aborted with.
    #[must_use]
    pub fn error(&self) -> Option<DomException> {
        self.cell.inner.lock().error.clone()
    }

    /// Returns the connection that created the transaction.
    #[must_use]
    pub fn database(&self) -> Database {
        Database::new(
            Arc::clone(&self.shared),
            self.cell.connection,
            self.cell.db_name.clone(),
        )
    }

    /// Returns the names of the stores the transaction can reach.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        match &self.cell.inner.lock().schema {
            Some(schema) => schema.keys().cloned().collect(),
            None => self.cell.scope.iter().cloned().collect(),
        }
    }

    /// Returns a handle to a store in the transaction's scope.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` if the transaction has finished
    /// - `NotFoundError` if the store is not in scope
    pub fn object_store(&self, name: &str) -> CoreResult<ObjectStore> {
        let inner = self.cell.inner.lock();
        if inner.state.is_finished() {
            return Err(CoreError::invalid_state("the transaction has finished"));
        }
        let in_scope = match &inner.schema {
            Some(schema) => schema.contains_key(name),
            None => self.cell.scope.contains(name),
        };
        if !in_scope {
            return Err(CoreError::not_found(format!(
                "object store {name:?} is not in the transaction's scope"
            )));
        }
        Ok(ObjectStore::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.cell),
            name.to_string(),
        ))
    }

    /// Requests commit. No further requests are accepted; queued ones still
    /// run, then all effects persist atomically.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` unless the transaction is active and accepting.
    pub fn commit(&self) -> CoreResult<()> {
        let mut inner = self.cell.inner.lock();
        match inner.state {
            TransactionState::Active if inner.accepting => {}
            TransactionState::Active => {
                return Err(CoreError::invalid_state(
                    "the transaction is not active; commit() must be called from its own task",
                ))
            }
            TransactionState::Committing => {
                return Err(CoreError::invalid_state("commit() was already called"))
            }
            TransactionState::Committed | TransactionState::Aborted => {
                return Err(CoreError::invalid_state("the transaction has finished"))
            }
        }
        inner.state = TransactionState::Committing;
        inner.accepting = false;
        debug!(target: "stashdb::txn", txn = %self.cell.id, "commit requested");
        lifecycle::schedule_next(&self.shared, &self.cell, &mut inner);
        Ok(())
    }

    /// Aborts the transaction, discarding all of its effects.
    ///
    /// Queued requests fail with `AbortError`, delivered asynchronously and
    /// in order, followed by the abort callback.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` once commit was requested or the transaction
    /// finished.
    pub fn abort(&self) -> CoreResult<()> {
        let mut reg = self.shared.registry.lock();
        let mut inner = self.cell.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(CoreError::invalid_state(
                "abort() is only allowed before commit",
            ));
        }
        lifecycle::abort_locked(
            &self.shared,
            &mut reg,
            &self.cell,
            &mut inner,
            DomException::new(ErrorKind::Abort, "The transaction was aborted."),
        );
        Ok(())
    }

    /// Sets the callback run after a successful commit.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        let mut inner = self.cell.inner.lock();
        if !inner.state.is_finished() {
            inner.on_complete = Some(Box::new(callback));
        }
    }

    /// Sets the callback run after the transaction aborted.
    pub fn on_abort(&self, callback: impl FnOnce(&DomException) + Send + 'static) {
        let mut inner = self.cell.inner.lock();
        if !inner.state.is_finished() {
            inner.on_abort = Some(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.cell.id)
            .field("mode", &self.cell.mode)
            .field("database", &self.cell.db_name)
            .field("state", &self.state())
            .finish()
    }
}
