//! # StashDB Testkit
//!
//! Test utilities for StashDB.
//!
//! This crate provides:
//! - Factory fixtures and database helpers
//! - Property-based test generators using proptest
//! - Assertion helpers that return errors instead of panicking
//! - The conformance scenarios run by `stashdb check`
//!
//! ## Usage
//!
//! ```rust
//! use stashdb_testkit::prelude::*;
//!
//! let factory = TestFactory::memory();
//! let outcomes = run_scenarios(&factory, &scenarios(Some(EXPLICIT_COMMIT)));
//! assert!(outcomes.iter().all(|o| o.passed));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod assertions;
pub mod conformance;
pub mod error;
pub mod fetch;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::conformance::*;
    pub use crate::error::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use assertions::*;
pub use conformance::*;
pub use error::*;
pub use fetch::*;
pub use fixtures::*;
pub use generators::*;
