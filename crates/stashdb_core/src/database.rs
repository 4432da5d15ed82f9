//! Database connections.

use crate::engine::{schedule_pump, Registry, Shared};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::journal::JournalOp;
use crate::state::StoreMeta;
use crate::transaction::{lifecycle, StoreOverlay, Transaction, TxnCell};
use crate::types::{ConnectionId, TransactionMode};
use stashdb_codec::KeyPath;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Options for [`Database::create_object_store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// In-line key path; `None` for out-of-line keys.
    pub key_path: Option<KeyPath>,
    /// Generate numeric keys for records written without one.
    pub auto_increment: bool,
}

impl StoreOptions {
    /// Options for a store keyed by `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a valid key path.
    pub fn key_path(path: &str) -> CoreResult<Self> {
        Ok(Self {
            key_path: Some(KeyPath::parse(path)?),
            auto_increment: false,
        })
    }

    /// Enables the key generator.
    #[must_use]
    pub const fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }
}

/// A connection to a named database.
///
/// Connections come from [`Factory::open`](crate::Factory::open). The
/// connection's version and store names are fixed when it opens, except
/// while its own upgrade runs.
///
/// ```
/// use stashdb_core::{Config, Factory, StoreOptions, TransactionMode};
///
/// let factory = Factory::in_memory(Config::default());
/// let request = factory.open("library", Some(1)).unwrap();
/// request.on_upgrade_needed(|db, _txn, _old| {
///     db.create_object_store("books", StoreOptions::key_path("isbn").unwrap())
///         .unwrap();
/// });
/// factory.event_loop().run_until_idle();
///
/// let db = request.result().unwrap();
/// assert_eq!(db.version(), 1);
/// let txn = db.transaction(&["books"], TransactionMode::ReadOnly).unwrap();
/// assert_eq!(txn.object_store_names(), vec!["books".to_string()]);
/// ```
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
    id: ConnectionId,
    name: String,
}

impl Database {
    pub(crate) fn new(shared: Arc<Shared>, id: ConnectionId, name: String) -> Self {
        Self { shared, id, name }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the version this connection sees.
    #[must_use]
    pub fn version(&self) -> u64 {
        let reg = self.shared.registry.lock();
        reg.connection(self.id).map_or(0, |c| c.version)
    }

    /// Returns the store names, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        let reg = self.shared.registry.lock();
        reg.connection(self.id)
            .map(|c| c.store_names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Creates a read-only or read-write transaction over `stores`.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` if the connection is closing or its upgrade is
    ///   still running
    /// - `TypeError` for [`TransactionMode::VersionChange`]
    /// - `InvalidAccessError` if `stores` is empty
    /// - `NotFoundError` if a store does not exist
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> CoreResult<Transaction> {
        let mut reg = self.shared.registry.lock();
        let conn = reg.connection(self.id)?;
        if conn.close_pending || conn.closed {
            return Err(CoreError::invalid_state("the connection is closing"));
        }
        if conn.upgrade.is_some() {
            return Err(CoreError::invalid_state(
                "a version change transaction is running",
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(CoreError::dom(
                ErrorKind::Type,
                "version change transactions are created by open requests",
            ));
        }
        if stores.is_empty() {
            return Err(CoreError::invalid_access(
                "a transaction needs at least one object store",
            ));
        }
        let mut scope = BTreeSet::new();
        for store in stores {
            if !conn.store_names.contains(*store) {
                return Err(CoreError::not_found(format!(
                    "object store {store:?} not found"
                )));
            }
            scope.insert((*store).to_string());
        }

        let cell = lifecycle::create(&self.shared, &mut reg, self.id, &self.name, scope, mode)?;
        Ok(Transaction::new(Arc::clone(&self.shared), cell))
    }

    /// Creates an object store. Only allowed inside the upgrade callback.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` outside an upgrade
    /// - `TransactionInactiveError` if the upgrade is not accepting
    /// - `ConstraintError` if the store exists
    /// - `InvalidAccessError` for a key generator with an empty key path
    pub fn create_object_store(&self, name: &str, options: StoreOptions) -> CoreResult<()> {
        let mut reg = self.shared.registry.lock();
        let txn = self.upgrade_transaction(&reg)?;
        let mut inner = txn.inner.lock();
        if !inner.is_accepting() {
            return Err(CoreError::transaction_inactive(
                "the upgrade transaction is not active",
            ));
        }
        if options.auto_increment && options.key_path.as_ref().is_some_and(KeyPath::is_root) {
            return Err(CoreError::invalid_access(
                "a key generator needs a non-empty key path",
            ));
        }
        let schema = inner.schema.get_or_insert_with(Default::default);
        if schema.contains_key(name) {
            return Err(CoreError::constraint(format!(
                "object store {name:?} already exists"
            )));
        }
        schema.insert(
            name.to_string(),
            StoreMeta {
                key_path: options.key_path.clone(),
                auto_increment: options.auto_increment,
            },
        );
        inner.overlay.insert(name.to_string(), StoreOverlay::fresh());
        inner.ops.push(JournalOp::CreateStore {
            name: name.to_string(),
            key_path: options.key_path,
            auto_increment: options.auto_increment,
        });
        drop(inner);
        reg.connection_mut(self.id)?
            .store_names
            .insert(name.to_string());
        debug!(target: "stashdb::db", database = %self.name, store = name, "object store created");
        Ok(())
    }

    /// Deletes an object store and its records. Only allowed inside the
    /// upgrade callback.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` outside an upgrade
    /// - `TransactionInactiveError` if the upgrade is not accepting
    /// - `NotFoundError` if the store does not exist
    pub fn delete_object_store(&self, name: &str) -> CoreResult<()> {
        let mut reg = self.shared.registry.lock();
        let txn = self.upgrade_transaction(&reg)?;
        let mut inner = txn.inner.lock();
        if !inner.is_accepting() {
            return Err(CoreError::transaction_inactive(
                "the upgrade transaction is not active",
            ));
        }
        let removed = inner
            .schema
            .as_mut()
            .and_then(|schema| schema.remove(name));
        if removed.is_none() {
            return Err(CoreError::not_found(format!(
                "object store {name:?} not found"
            )));
        }
        inner.overlay.remove(name);
        inner.ops.push(JournalOp::DeleteStore {
            name: name.to_string(),
        });
        drop(inner);
        reg.connection_mut(self.id)?.store_names.remove(name);
        debug!(target: "stashdb::db", database = %self.name, store = name, "object store deleted");
        Ok(())
    }

    /// Closes the connection once its transactions finish. New transactions
    /// are refused immediately.
    pub fn close(&self) {
        let mut reg = self.shared.registry.lock();
        let Ok(conn) = reg.connection_mut(self.id) else {
            return;
        };
        if conn.close_pending {
            return;
        }
        conn.close_pending = true;
        let closed_now = reg.settle_connection(self.id);
        debug!(target: "stashdb::db", database = %self.name, connection = %self.id, closed_now, "close requested");
        schedule_pump(&self.shared, &self.name);
    }

    /// Returns true once `close()` was called or the connection was closed
    /// by a database deletion.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let reg = self.shared.registry.lock();
        reg.connection(self.id)
            .map_or(true, |c| c.close_pending || c.closed)
    }

    /// Sets the handler run when another request wants to upgrade or delete
    /// the database. It receives the old and new versions; the new version
    /// is `None` for a deletion. Handlers usually call [`Database::close`].
    pub fn on_version_change(
        &self,
        handler: impl Fn(&Database, u64, Option<u64>) + Send + Sync + 'static,
    ) {
        let mut reg = self.shared.registry.lock();
        if let Ok(conn) = reg.connection_mut(self.id) {
            if !conn.closed {
                conn.on_version_change = Some(Arc::new(handler));
            }
        }
    }

    fn upgrade_transaction(&self, reg: &Registry) -> CoreResult<Arc<TxnCell>> {
        reg.connection(self.id)?
            .upgrade
            .clone()
            .ok_or_else(|| CoreError::invalid_state("schema changes need a version change transaction"))
    }
}

impl PartialEq for Database {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.id == other.id
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}
