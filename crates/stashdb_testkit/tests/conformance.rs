//! Runs every conformance scenario against in-memory and file-backed
//! factories.

use stashdb_core::Config;
use stashdb_testkit::prelude::*;

fn run_one(suite: &str, name: &str) {
    let factory = TestFactory::memory();
    let scenario = scenarios(Some(suite))
        .into_iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no scenario {name:?} in {suite}"));
    if let Err(e) = (scenario.run)(&factory) {
        panic!("{suite} / {name}: {e}");
    }
}

#[test]
fn explicit_commit_reads_back() {
    run_one(EXPLICIT_COMMIT, "Explicitly committed data can be read back out.");
}

#[test]
fn explicit_commit_blocks_immediately() {
    run_one(EXPLICIT_COMMIT, "A committed transaction is blocked immediately.");
}

#[test]
fn explicit_commit_blocks_in_callbacks() {
    run_one(
        EXPLICIT_COMMIT,
        "A committed transaction is blocked in future request callbacks.",
    );
}

#[test]
fn explicit_commit_ignores_later_puts() {
    run_one(EXPLICIT_COMMIT, "Puts issued after commit do not put anything.");
}

#[test]
fn explicit_commit_after_abort() {
    run_one(EXPLICIT_COMMIT, "Calling commit on an aborted transaction throws.");
}

#[test]
fn explicit_commit_twice() {
    run_one(EXPLICIT_COMMIT, "Calling commit on a committed transaction throws.");
}

#[test]
fn explicit_abort_after_commit() {
    run_one(
        EXPLICIT_COMMIT,
        "Calling abort on a committed transaction throws and data is still committed.",
    );
}

#[test]
fn explicit_commit_while_inactive() {
    run_one(
        EXPLICIT_COMMIT,
        "Calling txn.commit() when txn is inactive should throw.",
    );
}

#[test]
fn usage_breakdown_present() {
    run_one(
        USAGE_BREAKDOWN,
        "estimate() resolves to dictionary with usage breakdown member",
    );
}

#[test]
fn usage_breakdown_grows() {
    run_one(
        USAGE_BREAKDOWN,
        "estimate() usage breakdown reflects increase after large value is stored",
    );
}

#[test]
fn background_fetch_scenarios() {
    for scenario in scenarios(Some(BACKGROUND_FETCH)) {
        let factory = TestFactory::memory();
        if let Err(e) = (scenario.run)(&factory) {
            panic!("{}: {e}", scenario.name);
        }
    }
}

#[test]
fn all_scenarios_share_one_file_factory() {
    let factory = TestFactory::file().unwrap();
    let outcomes = run_scenarios(&factory, &all_scenarios());
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.passed).collect();
    assert!(failed.is_empty(), "failed scenarios: {failed:#?}");
    assert_eq!(outcomes.len(), all_scenarios().len());
    assert!(factory.databases().is_empty(), "scenarios clean up after themselves");
}

#[test]
fn scenarios_pass_with_a_coarse_quantum() {
    let factory = TestFactory::memory_with(
        Config::default().task_quantum(std::time::Duration::from_millis(5)),
    );
    let outcomes = run_scenarios(&factory, &all_scenarios());
    assert!(outcomes.iter().all(|o| o.passed), "{outcomes:#?}");
}

#[test]
fn outcomes_serialize_to_json() {
    let factory = TestFactory::memory();
    let outcomes = run_scenarios(&factory, &scenarios(Some(BACKGROUND_FETCH)));
    let json = serde_json::to_value(&outcomes).unwrap();
    assert_eq!(json.as_array().map(Vec::len), Some(3));
    assert_eq!(json[0]["suite"], "background-fetch");
    assert_eq!(json[0]["passed"], true);
    assert!(json[0]["error"].is_null());
}
