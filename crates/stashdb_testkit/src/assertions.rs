//! Assertion helpers returning [`ScenarioResult`] instead of panicking.

use crate::error::{ScenarioError, ScenarioResult};
use stashdb_core::{CoreResult, ErrorKind};
use std::fmt::Debug;

/// Checks that `result` failed synchronously with `kind`.
///
/// ```
/// use stashdb_core::{CoreError, ErrorKind};
/// use stashdb_testkit::expect_error;
///
/// let result: Result<(), _> = Err(CoreError::invalid_state("done"));
/// assert!(expect_error(result, ErrorKind::InvalidState, "second commit").is_ok());
/// ```
///
/// # Errors
///
/// Returns an assertion failure if `result` is `Ok` or fails with another
/// kind.
pub fn expect_error<T: Debug>(result: CoreResult<T>, kind: ErrorKind, what: &str) -> ScenarioResult<()> {
    match result {
        Err(e) if e.kind() == kind => Ok(()),
        Err(e) => Err(ScenarioError::assertion(format!(
            "{what}: expected {kind}, got {e}"
        ))),
        Ok(value) => Err(ScenarioError::assertion(format!(
            "{what}: expected {kind}, got Ok({value:?})"
        ))),
    }
}

/// Checks that `actual == expected`.
///
/// # Errors
///
/// Returns an assertion failure naming `what` otherwise.
pub fn expect_eq<T: PartialEq + Debug>(actual: T, expected: T, what: &str) -> ScenarioResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ScenarioError::assertion(format!(
            "{what}: expected {expected:?}, got {actual:?}"
        )))
    }
}

/// Checks that `condition` holds.
///
/// # Errors
///
/// Returns an assertion failure with `message` otherwise.
pub fn expect_true(condition: bool, message: &str) -> ScenarioResult<()> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::assertion(message))
    }
}
