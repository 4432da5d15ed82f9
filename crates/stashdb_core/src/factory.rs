//! The database factory: entry point for opening, deleting and
//! inspecting databases.

use crate::config::Config;
use crate::dir::FactoryDir;
use crate::engine::Shared;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::event_loop::EventLoop;
use crate::open::{self, DeleteRequest, OpenCell, OpenKind, OpenRequest};
use crate::stats::StatsSnapshot;
use crate::usage::UsageSource;
use serde::Serialize;
use stashdb_codec::Key;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Name and version of an existing database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
}

/// Summary of one object store, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    /// Store name.
    pub name: String,
    /// Committed record count.
    pub records: usize,
    /// In-line key path, if any.
    pub key_path: Option<String>,
    /// Whether the store generates keys.
    pub auto_increment: bool,
    /// Last generated key.
    pub key_generator: u64,
}

/// Summary of one database, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseReport {
    /// Database name.
    pub name: String,
    /// Current version.
    pub version: u64,
    /// Object stores, sorted by name.
    pub stores: Vec<StoreReport>,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Sequence number of the last commit record.
    pub last_sequence: u64,
}

/// Opens, deletes and lists databases.
///
/// Every factory owns an [`EventLoop`]; requests resolve while the loop
/// runs. Cloning yields another handle to the same factory.
///
/// ```
/// use stashdb_core::{Config, Factory};
///
/// let factory = Factory::in_memory(Config::default());
/// let request = factory.open("notes", None).unwrap();
/// factory.event_loop().run_until_idle();
///
/// let db = request.result().unwrap();
/// assert_eq!(db.version(), 1);
/// assert_eq!(factory.databases()[0].name, "notes");
/// ```
#[derive(Clone)]
pub struct Factory {
    shared: Arc<Shared>,
}

impl Factory {
    /// Creates a factory whose databases live in memory.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        Self {
            shared: Shared::new(config, None),
        }
    }

    /// Opens a persistent factory rooted at `path` and replays every
    /// journal found there.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the directory is missing and `create_if_missing` is false
    /// - another process holds the directory ([`CoreError::DirectoryLocked`])
    /// - a journal is corrupt
    pub fn open_dir(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = FactoryDir::open(path, config.create_if_missing)?;
        let shared = Shared::new(config, Some(dir));
        {
            let mut reg = shared.registry.lock();
            reg.load_all(&shared.config)?;
            info!(
                target: "stashdb::db",
                path = %path.display(),
                databases = reg.databases.len(),
                "factory opened"
            );
        }
        Ok(Self { shared })
    }

    /// Returns the event loop requests are delivered on.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.shared.event_loop
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the root directory of a persistent factory.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.shared
            .registry
            .lock()
            .dir()
            .map(|dir| dir.path().to_path_buf())
    }

    /// Opens a connection to `name`, creating the database if needed.
    ///
    /// With `version` set above the current version, the request's upgrade
    /// callback runs first. `None` opens the current version (1 for a new
    /// database).
    ///
    /// # Errors
    ///
    /// `TypeError` if `version` is `Some(0)`.
    pub fn open(&self, name: &str, version: Option<u64>) -> CoreResult<OpenRequest> {
        if version == Some(0) {
            return Err(CoreError::dom(ErrorKind::Type, "version must be at least 1"));
        }
        let cell = OpenCell::new(name, OpenKind::Open { version });
        open::schedule(&self.shared, &cell);
        Ok(OpenRequest::new(cell))
    }

    /// Deletes `name` once the open requests queued before it are served.
    /// Deleting a missing database succeeds with old version 0.
    pub fn delete_database(&self, name: &str) -> DeleteRequest {
        let cell = OpenCell::new(name, OpenKind::Delete);
        open::schedule(&self.shared, &cell);
        DeleteRequest::new(cell)
    }

    /// Lists existing databases, sorted by name.
    #[must_use]
    pub fn databases(&self) -> Vec<DatabaseInfo> {
        let reg = self.shared.registry.lock();
        reg.databases
            .iter()
            .filter(|(_, slot)| slot.state.version > 0)
            .map(|(name, slot)| DatabaseInfo {
                name: name.clone(),
                version: slot.state.version,
            })
            .collect()
    }

    /// Compares two keys.
    ///
    /// # Errors
    ///
    /// `DataError` if either key is invalid.
    pub fn cmp(&self, a: &Key, b: &Key) -> CoreResult<Ordering> {
        a.validate().map_err(|e| CoreError::data(e.to_string()))?;
        b.validate().map_err(|e| CoreError::data(e.to_string()))?;
        Ok(a.cmp(b))
    }

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns the bytes held by all journals.
    ///
    /// # Errors
    ///
    /// Returns an error if a journal cannot report its size.
    pub fn usage(&self) -> CoreResult<u64> {
        self.shared.registry.lock().usage()
    }

    /// Returns this factory as a usage source for a
    /// [`StorageManager`](crate::StorageManager).
    #[must_use]
    pub fn usage_source(&self) -> Arc<dyn UsageSource> {
        let shared = Arc::clone(&self.shared);
        Arc::new(move || shared.registry.lock().usage())
    }

    /// Describes every loaded database.
    ///
    /// # Errors
    ///
    /// Returns an error if a journal cannot report its size.
    pub fn inspect(&self) -> CoreResult<Vec<DatabaseReport>> {
        let reg = self.shared.registry.lock();
        reg.databases
            .iter()
            .map(|(name, slot)| {
                let stores = slot
                    .state
                    .stores
                    .iter()
                    .map(|(store, data)| StoreReport {
                        name: store.clone(),
                        records: data.records.len(),
                        key_path: data.meta.key_path.as_ref().map(|p| p.as_str().to_string()),
                        auto_increment: data.meta.auto_increment,
                        key_generator: data.key_generator,
                    })
                    .collect();
                Ok(DatabaseReport {
                    name: name.clone(),
                    version: slot.state.version,
                    stores,
                    journal_bytes: slot.journal.size()?,
                    last_sequence: slot.journal.last_sequence().0,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("path", &self.path())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, StoreOptions};
    use crate::error::DomException;
    use crate::request::{ErrorDisposition, RequestResult};
    use crate::types::{ReadyState, TransactionMode, TransactionState};
    use parking_lot::Mutex;
    use stashdb_codec::Value;
    use tempfile::tempdir;

    fn book(isbn: &str, title: &str) -> Value {
        Value::map([("isbn", isbn.into()), ("title", title.into())])
    }

    fn open_books(factory: &Factory, name: &str) -> Database {
        let request = factory.open(name, Some(1)).unwrap();
        request.on_upgrade_needed(|db, _, _| {
            db.create_object_store("books", StoreOptions::key_path("isbn").unwrap())
                .unwrap();
        });
        factory.event_loop().run_until_idle();
        request.result().unwrap()
    }

    fn put_books(factory: &Factory, db: &Database, books: &[(&str, &str)]) {
        let txn = db
            .transaction(&["books"], TransactionMode::ReadWrite)
            .unwrap();
        let store = txn.object_store("books").unwrap();
        for (isbn, title) in books {
            store.put(book(isbn, title), None).unwrap();
        }
        txn.commit().unwrap();
        factory.event_loop().run_until_idle();
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    fn read_titles(factory: &Factory, db: &Database, keys: &[&str]) -> Vec<Option<String>> {
        let txn = db.transaction(&["books"], TransactionMode::ReadOnly).unwrap();
        let store = txn.object_store("books").unwrap();
        let requests: Vec<_> = keys.iter().map(|k| store.get(*k).unwrap()).collect();
        factory.event_loop().run_until_idle();
        requests
            .iter()
            .map(|r| {
                r.result()
                    .and_then(|res| res.value().cloned())
                    .and_then(|v| v.field("title").and_then(Value::as_text).map(String::from))
            })
            .collect()
    }

    #[test]
    fn open_runs_upgrade_once() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        assert_eq!(db.version(), 1);
        assert_eq!(db.object_store_names(), vec!["books".to_string()]);
        assert_eq!(
            factory.databases(),
            vec![DatabaseInfo {
                name: "library".into(),
                version: 1
            }]
        );

        let again = factory.open("library", None).unwrap();
        again.on_upgrade_needed(|_, _, _| panic!("no upgrade expected"));
        factory.event_loop().run_until_idle();
        assert_eq!(again.ready_state(), ReadyState::Done);
        assert_eq!(again.result().unwrap().version(), 1);
    }

    #[test]
    fn explicit_commit_round_trip() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        put_books(&factory, &db, &[("one", "t1"), ("two", "t2"), ("three", "t3")]);

        let titles = read_titles(&factory, &db, &["one", "two", "three", "four"]);
        assert_eq!(
            titles,
            vec![Some("t1".into()), Some("t2".into()), Some("t3".into()), None]
        );
    }

    #[test]
    fn calls_after_commit_fail_synchronously() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("books").unwrap();
        let first = store.put(book("one", "t1"), None).unwrap();

        let from_callback = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&from_callback);
        let callback_store = store.clone();
        first.on_success(move |_| {
            *slot.lock() = Some(callback_store.put(book("two", "t2"), None).map(|_| ()));
        });

        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committing);
        assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(
            store.put(book("two", "t2"), None).unwrap_err().kind(),
            ErrorKind::TransactionInactive
        );
        assert_eq!(txn.abort().unwrap_err().kind(), ErrorKind::InvalidState);

        factory.event_loop().run_until_idle();
        let inside = from_callback.lock().take().unwrap();
        assert_eq!(inside.unwrap_err().kind(), ErrorKind::TransactionInactive);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(
            read_titles(&factory, &db, &["one", "two"]),
            vec![Some("t1".into()), None]
        );
    }

    #[test]
    fn abort_discards_everything() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("books").unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        for isbn in ["one", "two", "three"] {
            let request = store.put(book(isbn, "t"), None).unwrap();
            let errors = Arc::clone(&errors);
            request.on_error(move |e| {
                errors.lock().push(e.name());
                ErrorDisposition::Handled
            });
        }
        let aborted = Arc::new(Mutex::new(None::<DomException>));
        let seen = Arc::clone(&aborted);
        txn.on_abort(move |e| *seen.lock() = Some(e.clone()));

        txn.abort().unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(errors.lock().is_empty(), "errors are delivered asynchronously");

        factory.event_loop().run_until_idle();
        assert_eq!(*errors.lock(), vec!["AbortError"; 3]);
        assert_eq!(aborted.lock().as_ref().unwrap().kind, ErrorKind::Abort);
        assert_eq!(
            read_titles(&factory, &db, &["one", "two", "three"]),
            vec![None, None, None]
        );
    }

    #[test]
    fn unhandled_request_error_aborts() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        put_books(&factory, &db, &[("one", "t1")]);

        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("books").unwrap();
        store.put(book("two", "t2"), None).unwrap();
        store.add(book("one", "again"), None).unwrap();
        factory.event_loop().run_until_idle();

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.error().unwrap().kind, ErrorKind::Constraint);
        assert_eq!(
            read_titles(&factory, &db, &["one", "two"]),
            vec![Some("t1".into()), None]
        );
    }

    #[test]
    fn request_error_after_commit_aborts() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        put_books(&factory, &db, &[("one", "t1")]);

        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("books").unwrap();
        store.put(book("two", "t2"), None).unwrap();
        store.add(book("one", "again"), None).unwrap();
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committing);
        factory.event_loop().run_until_idle();

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.error().unwrap().kind, ErrorKind::Constraint);
        assert_eq!(
            read_titles(&factory, &db, &["one", "two"]),
            vec![Some("t1".into()), None]
        );
    }

    #[test]
    fn success_callbacks_fire_in_submission_order() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");

        let order = Arc::new(Mutex::new(Vec::new()));
        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("books").unwrap();
        for i in 0..5 {
            let request = if i % 2 == 0 {
                store.put(book(&format!("isbn{i}"), "t"), None).unwrap()
            } else {
                store.count().unwrap()
            };
            let order = Arc::clone(&order);
            request.on_success(move |_| order.lock().push(i));
        }
        factory.event_loop().run_until_idle();

        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn handled_request_error_keeps_the_transaction() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        put_books(&factory, &db, &[("one", "t1")]);

        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("books").unwrap();
        store
            .add(book("one", "again"), None)
            .unwrap()
            .on_error(|_| ErrorDisposition::Handled);
        store.put(book("two", "t2"), None).unwrap();
        factory.event_loop().run_until_idle();

        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(
            read_titles(&factory, &db, &["one", "two"]),
            vec![Some("t1".into()), Some("t2".into())]
        );
    }

    #[test]
    fn writers_on_the_same_store_run_in_order() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");

        let first = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let second = db.transaction(&["books"], TransactionMode::ReadOnly).unwrap();
        first
            .object_store("books")
            .unwrap()
            .put(book("one", "t1"), None)
            .unwrap();
        let read = second.object_store("books").unwrap().get("one").unwrap();
        factory.event_loop().run_until_idle();

        let title = read
            .result()
            .and_then(|r| r.value().cloned())
            .and_then(|v| v.field("title").cloned());
        assert_eq!(title, Some(Value::from("t1")));
    }

    #[test]
    fn auto_increment_generates_keys() {
        let factory = Factory::in_memory(Config::default());
        let request = factory.open("counter", Some(1)).unwrap();
        request.on_upgrade_needed(|db, _, _| {
            db.create_object_store("items", StoreOptions::default().auto_increment(true))
                .unwrap();
        });
        factory.event_loop().run_until_idle();
        let db = request.result().unwrap();

        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("items").unwrap();
        let a = store.add("a", None).unwrap();
        let b = store.add("b", None).unwrap();
        let explicit = store.put("c", Some(Key::from(10))).unwrap();
        let d = store.add("d", None).unwrap();
        factory.event_loop().run_until_idle();

        let key = |r: &crate::Request| r.result().and_then(|res| res.key().cloned());
        assert_eq!(key(&a), Some(Key::from(1)));
        assert_eq!(key(&b), Some(Key::from(2)));
        assert_eq!(key(&explicit), Some(Key::from(10)));
        assert_eq!(key(&d), Some(Key::from(11)));
    }

    #[test]
    fn upgrade_waits_for_other_connections() {
        let factory = Factory::in_memory(Config::default());
        let old = open_books(&factory, "library");

        let upgrade = factory.open("library", Some(2)).unwrap();
        let blocked = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&blocked);
        upgrade.on_blocked(move |old, new| *seen.lock() = Some((old, new)));
        factory.event_loop().run_until_idle();
        assert_eq!(*blocked.lock(), Some((1, Some(2))));
        assert_eq!(upgrade.ready_state(), ReadyState::Pending);

        old.close();
        factory.event_loop().run_until_idle();
        assert_eq!(upgrade.result().unwrap().version(), 2);
        assert_eq!(old.version(), 1);
    }

    #[test]
    fn version_change_handler_can_unblock() {
        let factory = Factory::in_memory(Config::default());
        let old = open_books(&factory, "library");
        old.on_version_change(|db, old, new| {
            assert_eq!((old, new), (1, Some(2)));
            db.close();
        });

        let upgrade = factory.open("library", Some(2)).unwrap();
        upgrade.on_blocked(|_, _| panic!("should not block"));
        factory.event_loop().run_until_idle();
        assert_eq!(upgrade.result().unwrap().version(), 2);
        assert!(old.is_closed());
    }

    #[test]
    fn lower_version_fails() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        db.close();
        let request = factory.open("library", Some(3)).unwrap();
        factory.event_loop().run_until_idle();
        assert_eq!(request.result().unwrap().version(), 3);

        let stale = factory.open("library", Some(2)).unwrap();
        factory.event_loop().run_until_idle();
        assert_eq!(stale.error().unwrap().kind, ErrorKind::Version);
        assert!(factory.open("library", Some(0)).is_err());
    }

    #[test]
    fn aborted_upgrade_keeps_the_old_schema() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        db.close();

        let request = factory.open("library", Some(2)).unwrap();
        request.on_upgrade_needed(|db, txn, old| {
            assert_eq!(old, 1);
            db.create_object_store("authors", StoreOptions::default())
                .unwrap();
            txn.abort().unwrap();
        });
        factory.event_loop().run_until_idle();
        assert_eq!(request.error().unwrap().kind, ErrorKind::Abort);
        assert_eq!(factory.databases()[0].version, 1);

        let reopened = factory.open("library", None).unwrap();
        factory.event_loop().run_until_idle();
        assert_eq!(
            reopened.result().unwrap().object_store_names(),
            vec!["books".to_string()]
        );
    }

    #[test]
    fn schema_changes_need_an_upgrade() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        assert_eq!(
            db.create_object_store("x", StoreOptions::default())
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            db.transaction(&["missing"], TransactionMode::ReadOnly)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            db.transaction(&[], TransactionMode::ReadOnly).unwrap_err().kind(),
            ErrorKind::InvalidAccess
        );
    }

    #[test]
    fn delete_closes_connections() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        put_books(&factory, &db, &[("one", "t1")]);
        let before = factory.usage().unwrap();

        let request = factory.delete_database("library");
        factory.event_loop().run_until_idle();
        assert_eq!(request.old_version(), Some(1));
        assert!(db.is_closed());
        assert!(factory.databases().is_empty());
        assert!(factory.usage().unwrap() < before);
        assert_eq!(
            db.transaction(&["books"], TransactionMode::ReadOnly)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidState
        );

        let missing = factory.delete_database("never-created");
        factory.event_loop().run_until_idle();
        assert_eq!(missing.old_version(), Some(0));
    }

    #[test]
    fn commit_beyond_quota_aborts() {
        let factory = Factory::in_memory(Config::default().quota(4096));
        let db = open_books(&factory, "library");
        let before = factory.usage().unwrap();

        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let big = Value::map([("isbn", "big".into()), ("blob", Value::Bytes(vec![7; 8192]))]);
        txn.object_store("books").unwrap().put(big, None).unwrap();
        factory.event_loop().run_until_idle();

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.error().unwrap().kind, ErrorKind::QuotaExceeded);
        assert_eq!(factory.usage().unwrap(), before);
    }

    #[test]
    fn commits_grow_usage_and_stats() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        let before = factory.usage().unwrap();
        put_books(&factory, &db, &[("one", "t1")]);
        assert!(factory.usage().unwrap() > before);

        let stats = factory.stats();
        assert_eq!(stats.transactions_committed, 2);
        assert_eq!(stats.journal_records, 2);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn read_only_transactions_write_nothing() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        let before = factory.usage().unwrap();
        let titles = read_titles(&factory, &db, &["one"]);
        assert_eq!(titles, vec![None]);
        assert_eq!(factory.usage().unwrap(), before);
        let txn = db.transaction(&["books"], TransactionMode::ReadOnly).unwrap();
        assert_eq!(
            txn.object_store("books")
                .unwrap()
                .put(book("x", "y"), None)
                .unwrap_err()
                .kind(),
            ErrorKind::ReadOnly
        );
    }

    #[test]
    fn persistent_factory_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let factory = Factory::open_dir(dir.path(), Config::default()).unwrap();
            let db = open_books(&factory, "library");
            put_books(&factory, &db, &[("one", "t1"), ("two", "t2")]);
            db.close();
            factory.event_loop().run_until_idle();
        }

        let factory = Factory::open_dir(dir.path(), Config::default()).unwrap();
        assert_eq!(factory.databases().len(), 1);
        let request = factory.open("library", None).unwrap();
        factory.event_loop().run_until_idle();
        let db = request.result().unwrap();
        assert_eq!(db.version(), 1);
        assert_eq!(
            read_titles(&factory, &db, &["one", "two"]),
            vec![Some("t1".into()), Some("t2".into())]
        );

        let report = factory.inspect().unwrap();
        assert_eq!(report[0].stores[0].records, 2);
        assert_eq!(report[0].stores[0].key_path.as_deref(), Some("isbn"));
        assert_eq!(report[0].last_sequence, 2);
    }

    #[test]
    fn second_factory_on_a_directory_is_refused() {
        let dir = tempdir().unwrap();
        let _first = Factory::open_dir(dir.path(), Config::default()).unwrap();
        assert!(matches!(
            Factory::open_dir(dir.path(), Config::default()),
            Err(CoreError::DirectoryLocked)
        ));
    }

    #[test]
    fn cmp_orders_keys() {
        let factory = Factory::in_memory(Config::default());
        assert_eq!(
            factory.cmp(&Key::from(1), &Key::from("a")).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            factory.cmp(&Key::Number(f64::NAN), &Key::from(1)).unwrap_err().kind(),
            ErrorKind::Data
        );
    }

    #[test]
    fn get_all_and_count_see_uncommitted_writes() {
        let factory = Factory::in_memory(Config::default());
        let db = open_books(&factory, "library");
        put_books(&factory, &db, &[("a", "1"), ("b", "2")]);

        let txn = db.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("books").unwrap();
        store.delete("a").unwrap();
        store.put(book("c", "3"), None).unwrap();
        let all = store.get_all(None).unwrap();
        let count = store.count().unwrap();
        factory.event_loop().run_until_idle();

        let titles: Vec<_> = all
            .result()
            .and_then(|r| r.values().map(<[Value]>::to_vec))
            .unwrap()
            .iter()
            .filter_map(|v| v.field("title").and_then(Value::as_text).map(String::from))
            .collect();
        assert_eq!(titles, vec!["2", "3"]);
        assert_eq!(count.result().and_then(|r| r.count()), Some(2));
        assert!(matches!(all.result(), Some(RequestResult::Values(_))));
    }
}
