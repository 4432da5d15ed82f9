//! Scenario failures.

use stashdb_core::{CoreError, DomException};
use thiserror::Error;

/// Why a scenario failed.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// An engine call failed unexpectedly.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A transaction or request failed unexpectedly.
    #[error("{context}: {error}")]
    Failed {
        /// What was being awaited.
        context: String,
        /// The delivered error.
        error: DomException,
    },

    /// An assertion did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// The event loop went idle before the awaited outcome.
    #[error("stalled: {0}")]
    Stalled(String),
}

impl ScenarioError {
    /// Creates an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }
}

/// Result type for scenarios and fixtures.
pub type ScenarioResult<T> = Result<T, ScenarioError>;
