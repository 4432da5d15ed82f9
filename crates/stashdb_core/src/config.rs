//! Factory configuration.

use std::time::Duration;

/// Configuration for a database factory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether a persistent factory creates its root directory if missing.
    pub create_if_missing: bool,

    /// Whether to sync the journal after every commit record (safer but slower).
    pub sync_on_commit: bool,

    /// Total bytes the factory may occupy. Commits that would exceed it
    /// abort with `QuotaExceededError`.
    pub quota: u64,

    /// Largest encoded value accepted by `put`/`add`.
    pub max_value_size: usize,

    /// Virtual time each event loop task consumes.
    pub task_quantum: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            quota: 1024 * 1024 * 1024,        // 1 GiB
            max_value_size: 64 * 1024 * 1024, // 64 MiB
            task_quantum: Duration::from_micros(100),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the root directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the storage quota in bytes.
    #[must_use]
    pub const fn quota(mut self, bytes: u64) -> Self {
        self.quota = bytes;
        self
    }

    /// Sets the maximum encoded value size in bytes.
    #[must_use]
    pub const fn max_value_size(mut self, bytes: usize) -> Self {
        self.max_value_size = bytes;
        self
    }

    /// Sets the virtual time consumed by each task.
    #[must_use]
    pub const fn task_quantum(mut self, quantum: Duration) -> Self {
        self.task_quantum = quantum;
        self
    }
}
