//! Conformance scenarios.
//!
//! Each scenario is a black-box check against a [`Factory`]. Scenarios use
//! unique database names and delete what they create, so any number of
//! them can share one factory, in memory or on disk.

use crate::assertions::{expect_eq, expect_error, expect_true};
use crate::error::{ScenarioError, ScenarioResult};
use crate::fetch::{run_success_event, UPDATE_SUCCESS};
use crate::fixtures::{
    await_transaction, book, create_books_store, create_database, delete_database, keep_alive,
    title_of, unique_name,
};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use stashdb_codec::{Key, Value};
use stashdb_core::{
    ErrorKind, Factory, StorageEstimate, StorageManager, StoreOptions, TransactionMode,
    TransactionState, ALREADY_UPDATED_MESSAGE, INACTIVE_MESSAGE, INDEXED_DB,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Suite checking explicit `commit()` semantics.
pub const EXPLICIT_COMMIT: &str = "explicit-commit";
/// Suite checking the storage estimate breakdown.
pub const USAGE_BREAKDOWN: &str = "usage-breakdown";
/// Suite checking background fetch UI updates.
pub const BACKGROUND_FETCH: &str = "background-fetch";

/// A named conformance check.
#[derive(Clone, Copy)]
pub struct Scenario {
    /// Suite the scenario belongs to.
    pub suite: &'static str,
    /// Human readable name.
    pub name: &'static str,
    /// The check.
    pub run: fn(&Factory) -> ScenarioResult<()>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("suite", &self.suite)
            .field("name", &self.name)
            .finish()
    }
}

/// Result of running one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    /// Suite name.
    pub suite: &'static str,
    /// Scenario name.
    pub name: &'static str,
    /// Whether the scenario passed.
    pub passed: bool,
    /// Failure description.
    pub error: Option<String>,
    /// Wall-clock time taken, in microseconds.
    pub elapsed_us: u64,
}

/// Returns every scenario, grouped by suite.
pub fn all_scenarios() -> Vec<Scenario> {
    vec![
        scenario(
            EXPLICIT_COMMIT,
            "Explicitly committed data can be read back out.",
            committed_data_reads_back,
        ),
        scenario(
            EXPLICIT_COMMIT,
            "A committed transaction is blocked immediately.",
            committed_blocks_immediately,
        ),
        scenario(
            EXPLICIT_COMMIT,
            "A committed transaction is blocked in future request callbacks.",
            committed_blocks_in_callbacks,
        ),
        scenario(
            EXPLICIT_COMMIT,
            "Puts issued after commit do not put anything.",
            puts_after_commit_do_nothing,
        ),
        scenario(
            EXPLICIT_COMMIT,
            "Calling commit on an aborted transaction throws.",
            commit_after_abort_throws,
        ),
        scenario(
            EXPLICIT_COMMIT,
            "Calling commit on a committed transaction throws.",
            commit_twice_throws,
        ),
        scenario(
            EXPLICIT_COMMIT,
            "Calling abort on a committed transaction throws and data is still committed.",
            abort_after_commit_throws,
        ),
        scenario(
            EXPLICIT_COMMIT,
            "Calling txn.commit() when txn is inactive should throw.",
            commit_while_inactive_throws,
        ),
        scenario(
            USAGE_BREAKDOWN,
            "estimate() resolves to dictionary with usage breakdown member",
            estimate_has_breakdown,
        ),
        scenario(
            USAGE_BREAKDOWN,
            "estimate() usage breakdown reflects increase after large value is stored",
            breakdown_grows_with_large_value,
        ),
        scenario(
            BACKGROUND_FETCH,
            "Background Fetch event can update UI once",
            fetch_update_once,
        ),
        scenario(
            BACKGROUND_FETCH,
            "Background Fetch event cannot update UI twice",
            fetch_update_twice,
        ),
        scenario(
            BACKGROUND_FETCH,
            "Background Fetch event cannot update UI when inactive",
            fetch_update_inactive,
        ),
    ]
}

fn scenario(
    suite: &'static str,
    name: &'static str,
    run: fn(&Factory) -> ScenarioResult<()>,
) -> Scenario {
    Scenario { suite, name, run }
}

/// Returns the scenarios of `suite`, or all of them for `None`.
pub fn scenarios(suite: Option<&str>) -> Vec<Scenario> {
    all_scenarios()
        .into_iter()
        .filter(|s| suite.map_or(true, |suite| s.suite == suite))
        .collect()
}

/// Returns the suite names in registry order.
pub fn suite_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    for scenario in all_scenarios() {
        if !names.contains(&scenario.suite) {
            names.push(scenario.suite);
        }
    }
    names
}

/// Runs `scenarios` against `factory`, one after another.
pub fn run_scenarios(factory: &Factory, scenarios: &[Scenario]) -> Vec<ScenarioOutcome> {
    scenarios
        .iter()
        .map(|scenario| {
            let start = Instant::now();
            let result = (scenario.run)(factory);
            factory.event_loop().run_until_idle();
            let elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
            match &result {
                Ok(()) => debug!(suite = scenario.suite, name = scenario.name, "passed"),
                Err(e) => info!(suite = scenario.suite, name = scenario.name, error = %e, "failed"),
            }
            ScenarioOutcome {
                suite: scenario.suite,
                name: scenario.name,
                passed: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                elapsed_us,
            }
        })
        .collect()
}

fn books_database(factory: &Factory) -> ScenarioResult<(String, stashdb_core::Database)> {
    let name = unique_name("explicit-commit");
    let db = create_database(factory, &name, |db| create_books_store(db))?;
    Ok((name, db))
}

fn cleanup(factory: &Factory, name: &str, db: &stashdb_core::Database) -> ScenarioResult<()> {
    db.close();
    delete_database(factory, name)?;
    Ok(())
}

fn committed_data_reads_back(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    let store = txn.object_store("books")?;
    store.put(book("one", "t1"), None)?;
    store.put(book("two", "t2"), None)?;
    store.put(book("three", "t3"), None)?;
    txn.commit()?;
    await_transaction(factory, &txn)?;

    let txn2 = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    let store2 = txn2.object_store("books")?;
    let gets = [store2.get("one")?, store2.get("two")?, store2.get("three")?];
    txn2.commit()?;
    await_transaction(factory, &txn2)?;

    let titles: Vec<Option<String>> = gets.iter().map(title_of).collect();
    expect_eq(
        titles,
        vec![Some("t1".into()), Some("t2".into()), Some("t3".into())],
        "Data put by an explicitly committed transaction should be gettable",
    )?;
    cleanup(factory, &name, &db)
}

fn committed_blocks_immediately(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    let store = txn.object_store("books")?;
    txn.commit()?;
    expect_error(
        store.put(book("one", "t1"), None),
        ErrorKind::TransactionInactive,
        "After commit is called, the transaction should be inactive",
    )?;
    await_transaction(factory, &txn)?;
    cleanup(factory, &name, &db)
}

fn committed_blocks_in_callbacks(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    let store = txn.object_store("books")?;
    let put = store.put(book("one", "t1"), None)?;

    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    let callback_store = store.clone();
    put.on_success(move |_| {
        let result = callback_store.put(book("two", "t2"), None).map(|_| ());
        *slot.lock() = Some(result);
    });
    txn.commit()?;
    await_transaction(factory, &txn)?;

    let inside = observed
        .lock()
        .take()
        .ok_or_else(|| ScenarioError::assertion("the success callback did not run"))?;
    expect_error(
        inside,
        ErrorKind::TransactionInactive,
        "The transaction should not be active in the callback of a request after commit() is called",
    )?;
    cleanup(factory, &name, &db)
}

fn puts_after_commit_do_nothing(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    let store = txn.object_store("books")?;
    txn.commit()?;
    expect_error(
        store.put(book("one", "t1"), None),
        ErrorKind::TransactionInactive,
        "Exception not thrown when calling put after a commit",
    )?;

    let txn2 = db.transaction(&["books"], TransactionMode::ReadOnly)?;
    let get = txn2.object_store("books")?.get("one")?;
    await_transaction(factory, &txn2)?;
    expect_true(
        get.result().is_some_and(|r| r.is_absent()),
        "a put issued after commit must not store anything",
    )?;
    cleanup(factory, &name, &db)
}

fn commit_after_abort_throws(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    txn.object_store("books")?;
    txn.abort()?;
    expect_error(
        txn.commit(),
        ErrorKind::InvalidState,
        "The transaction should have been aborted",
    )?;
    factory.event_loop().run_until_idle();
    cleanup(factory, &name, &db)
}

fn commit_twice_throws(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    txn.object_store("books")?;
    txn.commit()?;
    expect_error(
        txn.commit(),
        ErrorKind::InvalidState,
        "The transaction should have already committed",
    )?;
    await_transaction(factory, &txn)?;
    cleanup(factory, &name, &db)
}

fn abort_after_commit_throws(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    txn.object_store("books")?.put(book("one", "t1"), None)?;
    txn.commit()?;
    expect_error(
        txn.abort(),
        ErrorKind::InvalidState,
        "The transaction should already have committed",
    )?;

    let txn2 = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    let get = txn2.object_store("books")?.get("one")?;
    await_transaction(factory, &txn2)?;
    expect_eq(
        title_of(&get),
        Some("t1".to_string()),
        "Expected the result to be retrievable",
    )?;
    cleanup(factory, &name, &db)
}

fn commit_while_inactive_throws(factory: &Factory) -> ScenarioResult<()> {
    let (name, db) = books_database(factory)?;
    let txn = db.transaction(&["books"], TransactionMode::ReadWrite)?;
    txn.object_store("books")?;
    let release = keep_alive(&txn, "books")?;

    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    let timer_txn = txn.clone();
    factory.event_loop().set_timeout(Duration::ZERO, move || {
        let result = timer_txn.commit();
        release.release();
        *slot.lock() = Some(result);
    });
    await_transaction(factory, &txn)?;

    let inside = observed
        .lock()
        .take()
        .ok_or_else(|| ScenarioError::assertion("the timer did not fire"))?;
    expect_error(
        inside,
        ErrorKind::InvalidState,
        "The transaction should be inactive so commit should be uncallable",
    )?;
    expect_eq(txn.state(), TransactionState::Committed, "transaction state")?;
    cleanup(factory, &name, &db)
}

fn estimate(manager: &StorageManager) -> ScenarioResult<StorageEstimate> {
    let estimate = manager.estimate()?;
    expect_eq(
        estimate.usage,
        estimate.breakdown.values().sum::<u64>(),
        "usage should equal the sum of the breakdown",
    )?;
    Ok(estimate)
}

/// A manager reporting `factory` plus one idle subsystem.
fn usage_manager(factory: &Factory) -> StorageManager {
    let manager = StorageManager::for_factory(factory);
    manager.register("serviceWorkerRegistrations", || Ok(0));
    manager
}

fn unchanged_except_indexed_db(
    before: &StorageEstimate,
    after: &StorageEstimate,
    what: &str,
) -> ScenarioResult<()> {
    let strip = |e: &StorageEstimate| {
        let mut others = e.breakdown.clone();
        others.remove(INDEXED_DB);
        others
    };
    expect_eq(
        strip(after),
        strip(before),
        &format!("after {what}, breakdown object should remain unchanged aside from IndexedDb usage"),
    )
}

fn estimate_has_breakdown(factory: &Factory) -> ScenarioResult<()> {
    let estimate = estimate(&usage_manager(factory))?;
    expect_true(
        estimate.breakdown.contains_key(INDEXED_DB),
        "the breakdown should report IndexedDb",
    )
}

fn breakdown_grows_with_large_value(factory: &Factory) -> ScenarioResult<()> {
    const ARRAY_SIZE: usize = 1_000_000;
    let manager = usage_manager(factory);
    let name = unique_name("storage-manager");
    let store_name = "storageManager";

    delete_database(factory, &name)?;
    let before_create = estimate(&manager)?;

    let db = create_database(factory, &name, move |db| {
        db.create_object_store(store_name, StoreOptions::default())
    })?;
    let after_create = estimate(&manager)?;
    expect_true(
        after_create.entry(INDEXED_DB) > before_create.entry(INDEXED_DB),
        "estimated usage should increase after object store is created",
    )?;
    unchanged_except_indexed_db(&before_create, &after_create, "create")?;

    let mut blob = vec![0u8; ARRAY_SIZE];
    rand::thread_rng().fill_bytes(&mut blob);
    let txn = db.transaction(&[store_name], TransactionMode::ReadWrite)?;
    txn.object_store(store_name)?
        .add(Value::Bytes(blob), Some(Key::from(1)))?;
    await_transaction(factory, &txn)?;

    let after_put = estimate(&manager)?;
    expect_true(
        after_put.entry(INDEXED_DB) > after_create.entry(INDEXED_DB),
        "estimated usage should increase after large value is stored",
    )?;
    unchanged_except_indexed_db(&after_create, &after_put, "put")?;

    db.close();
    delete_database(factory, &name)?;
    Ok(())
}

fn fetch_outcome(factory: &Factory, registration: &str, expected: &str) -> ScenarioResult<()> {
    let messages = run_success_event(factory.event_loop(), registration);
    let [message] = messages.as_slice() else {
        return Err(ScenarioError::assertion(format!(
            "expected one message for {registration:?}, got {}",
            messages.len()
        )));
    };
    expect_eq(message.event_type.as_str(), "backgroundfetchsuccess", "event type")?;
    expect_eq(message.update.as_str(), expected, registration)
}

fn fetch_update_once(factory: &Factory) -> ScenarioResult<()> {
    fetch_outcome(factory, "update-once", UPDATE_SUCCESS)
}

fn fetch_update_twice(factory: &Factory) -> ScenarioResult<()> {
    fetch_outcome(factory, "update-twice", ALREADY_UPDATED_MESSAGE)
}

fn fetch_update_inactive(factory: &Factory) -> ScenarioResult<()> {
    fetch_outcome(factory, "update-inactive", INACTIVE_MESSAGE)
}
