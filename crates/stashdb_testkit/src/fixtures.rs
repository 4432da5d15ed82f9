//! Test fixtures and database helpers.
//!
//! The helpers mirror the ones conformance tests are written against:
//! create a fresh database with an upgrade callback, wait for a
//! transaction, keep a transaction alive with a chain of requests.

use crate::error::{ScenarioError, ScenarioResult};
use parking_lot::Mutex;
use stashdb_codec::Value;
use stashdb_core::{
    Config, CoreError, CoreResult, Database, DomException, ErrorKind, Factory, ObjectStore,
    ReadyState, Request, StoreOptions, Transaction, TransactionState,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

/// A factory for tests, optionally backed by a temporary directory that
/// is removed on drop.
pub struct TestFactory {
    /// The factory.
    pub factory: Factory,
    temp_dir: Option<TempDir>,
}

impl TestFactory {
    /// Creates an in-memory factory.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates an in-memory factory with `config`.
    pub fn memory_with(config: Config) -> Self {
        Self {
            factory: Factory::in_memory(config),
            temp_dir: None,
        }
    }

    /// Creates a factory in a fresh temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or factory cannot be created.
    pub fn file() -> ScenarioResult<Self> {
        let temp_dir = TempDir::new().map_err(CoreError::from)?;
        let factory = Factory::open_dir(temp_dir.path(), Config::default().sync_on_commit(false))?;
        Ok(Self {
            factory,
            temp_dir: Some(temp_dir),
        })
    }

    /// Returns the directory of a file-backed factory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Drops the factory and opens a new one on the same directory, as a
    /// process restart would. In-memory factories are returned unchanged.
    ///
    /// Every other handle to the factory must be dropped first, or the
    /// directory is still locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be reopened.
    pub fn reopen(self) -> ScenarioResult<Self> {
        let Self { factory, temp_dir } = self;
        let Some(temp_dir) = temp_dir else {
            return Ok(Self {
                factory,
                temp_dir: None,
            });
        };
        let config = factory.config().clone();
        factory.event_loop().run_until_idle();
        drop(factory);
        let factory = Factory::open_dir(temp_dir.path(), config)?;
        Ok(Self {
            factory,
            temp_dir: Some(temp_dir),
        })
    }
}

impl std::ops::Deref for TestFactory {
    type Target = Factory;

    fn deref(&self) -> &Self::Target {
        &self.factory
    }
}

/// Returns a database name no other test uses.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Builds a book record keyed by `isbn`.
pub fn book(isbn: &str, title: &str) -> Value {
    Value::map([("isbn", isbn.into()), ("title", title.into())])
}

/// Returns the `title` field of a resolved `get` request.
pub fn title_of(request: &Request) -> Option<String> {
    request
        .result()
        .and_then(|result| result.value().cloned())
        .and_then(|value| value.field("title").and_then(Value::as_text).map(String::from))
}

/// Creates the `books` store, keyed by `isbn`.
///
/// # Errors
///
/// Fails outside an upgrade callback or if the store exists.
pub fn create_books_store(db: &Database) -> CoreResult<()> {
    db.create_object_store("books", StoreOptions::key_path("isbn")?)
}

/// Deletes `name` and opens it at version 1, running `upgrade` inside the
/// version change transaction.
///
/// # Errors
///
/// Returns the upgrade callback's error, or the open request's error.
pub fn create_database(
    factory: &Factory,
    name: &str,
    upgrade: impl FnOnce(&Database) -> CoreResult<()> + Send + 'static,
) -> ScenarioResult<Database> {
    delete_database(factory, name)?;

    let request = factory.open(name, Some(1))?;
    let upgrade_error = Arc::new(Mutex::new(None::<CoreError>));
    let slot = Arc::clone(&upgrade_error);
    request.on_upgrade_needed(move |db, txn, _old| {
        if let Err(e) = upgrade(db) {
            if let Err(abort_error) = txn.abort() {
                debug!(error = %abort_error, "upgrade transaction already finished");
            }
            *slot.lock() = Some(e);
        }
    });
    factory
        .event_loop()
        .run_until(|| request.ready_state() == ReadyState::Done);

    if let Some(e) = upgrade_error.lock().take() {
        return Err(e.into());
    }
    match (request.result(), request.error()) {
        (_, Some(error)) => Err(ScenarioError::Failed {
            context: format!("opening {name:?}"),
            error,
        }),
        (Some(db), None) if request.ready_state() == ReadyState::Done => Ok(db),
        _ => Err(ScenarioError::Stalled(format!("opening {name:?}"))),
    }
}

/// Deletes `name` and returns its old version.
///
/// # Errors
///
/// Returns the delete request's error.
pub fn delete_database(factory: &Factory, name: &str) -> ScenarioResult<u64> {
    let request = factory.delete_database(name);
    factory
        .event_loop()
        .run_until(|| request.ready_state() == ReadyState::Done);
    if let Some(error) = request.error() {
        return Err(ScenarioError::Failed {
            context: format!("deleting {name:?}"),
            error,
        });
    }
    request
        .old_version()
        .ok_or_else(|| ScenarioError::Stalled(format!("deleting {name:?}")))
}

/// Runs the event loop until `txn` finishes.
///
/// # Errors
///
/// Returns the transaction's error if it aborted.
pub fn await_transaction(factory: &Factory, txn: &Transaction) -> ScenarioResult<()> {
    let finished = factory
        .event_loop()
        .run_until(|| txn.state().is_finished());
    if !finished {
        return Err(ScenarioError::Stalled(format!(
            "transaction {} did not finish",
            txn.id()
        )));
    }
    match txn.state() {
        TransactionState::Aborted => Err(ScenarioError::Failed {
            context: format!("transaction {}", txn.id()),
            error: txn
                .error()
                .unwrap_or_else(|| DomException::new(ErrorKind::Abort, "aborted")),
        }),
        _ => Ok(()),
    }
}

/// Keeps a transaction from committing by chaining `get` requests from
/// each success callback until [`KeepAlive::release`] is called.
#[derive(Debug)]
pub struct KeepAlive {
    spinning: Arc<AtomicBool>,
}

impl KeepAlive {
    /// Stops the chain; the transaction commits once the last request
    /// completes.
    pub fn release(&self) {
        self.spinning.store(false, Ordering::SeqCst);
    }
}

/// Starts a keep-alive chain on `store_name`.
///
/// # Errors
///
/// Fails if the transaction cannot take requests.
pub fn keep_alive(txn: &Transaction, store_name: &str) -> CoreResult<KeepAlive> {
    let spinning = Arc::new(AtomicBool::new(true));
    spin(txn.object_store(store_name)?, Arc::clone(&spinning))?;
    Ok(KeepAlive { spinning })
}

fn spin(store: ObjectStore, spinning: Arc<AtomicBool>) -> CoreResult<()> {
    if !spinning.load(Ordering::SeqCst) {
        return Ok(());
    }
    let request = store.get(0)?;
    request.on_success(move |_| {
        if let Err(e) = spin(store, spinning) {
            debug!(error = %e, "keep-alive chain stopped");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::TransactionMode;

    #[test]
    fn create_database_runs_the_upgrade() {
        let factory = TestFactory::memory();
        let db = create_database(&factory, "fixtures", |db| create_books_store(db)).unwrap();
        assert_eq!(db.version(), 1);
        assert_eq!(db.object_store_names(), vec!["books".to_string()]);
    }

    #[test]
    fn failing_upgrade_is_reported() {
        let factory = TestFactory::memory();
        let result = create_database(&factory, "fixtures", |db| {
            create_books_store(db)?;
            create_books_store(db)
        });
        assert!(matches!(result, Err(ScenarioError::Core(e)) if e.kind() == ErrorKind::Constraint));
        factory.event_loop().run_until_idle();
        assert!(factory.databases().is_empty(), "the upgrade was aborted");
    }

    #[test]
    fn keep_alive_holds_the_transaction_open() {
        let factory = TestFactory::memory();
        let db = create_database(&factory, "fixtures", |db| create_books_store(db)).unwrap();
        let txn = db.transaction(&["books"], TransactionMode::ReadOnly).unwrap();
        let guard = keep_alive(&txn, "books").unwrap();

        factory.event_loop().run_until(|| factory.event_loop().tasks_executed() > 50);
        assert_eq!(txn.state(), TransactionState::Active);

        guard.release();
        await_transaction(&factory, &txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[test]
    fn file_factory_reopens() {
        let factory = TestFactory::file().unwrap();
        let db = create_database(&factory, "fixtures", |db| create_books_store(db)).unwrap();
        db.close();
        drop(db);
        let factory = factory.reopen().unwrap();
        assert_eq!(factory.databases().len(), 1);
        assert!(factory.path().is_some());
    }

    #[test]
    fn names_are_unique() {
        assert_ne!(unique_name("db"), unique_name("db"));
    }
}
