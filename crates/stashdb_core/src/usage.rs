//! Storage usage accounting.
//!
//! A [`StorageManager`] aggregates named [`UsageSource`]s into a
//! [`StorageEstimate`]. Every call to [`StorageManager::estimate`] queries
//! the sources afresh; nothing is cached between calls.

use crate::error::CoreResult;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Breakdown entry name used for database factories.
pub const INDEXED_DB: &str = "IndexedDb";

/// Something that consumes storage and can report how much.
pub trait UsageSource: Send + Sync {
    /// Returns the bytes currently held.
    ///
    /// # Errors
    ///
    /// Returns an error if the usage cannot be determined.
    fn usage(&self) -> CoreResult<u64>;
}

impl<F> UsageSource for F
where
    F: Fn() -> CoreResult<u64> + Send + Sync,
{
    fn usage(&self) -> CoreResult<u64> {
        self()
    }
}

/// A usage snapshot.
///
/// `usage` always equals the sum of `breakdown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageEstimate {
    /// Total bytes held by all sources.
    pub usage: u64,
    /// Bytes available in total.
    pub quota: u64,
    /// Bytes held per source.
    pub breakdown: BTreeMap<String, u64>,
}

impl StorageEstimate {
    /// Returns the entry for `source`, or 0 if it is not registered.
    #[must_use]
    pub fn entry(&self, source: &str) -> u64 {
        self.breakdown.get(source).copied().unwrap_or(0)
    }
}

/// Aggregates storage usage across subsystems.
///
/// ```
/// use stashdb_core::{Config, Factory, StorageManager};
///
/// let factory = Factory::in_memory(Config::default());
/// let manager = StorageManager::for_factory(&factory);
/// manager.register("caches", || Ok(512));
///
/// let estimate = manager.estimate().unwrap();
/// assert_eq!(estimate.entry("caches"), 512);
/// assert_eq!(estimate.usage, estimate.breakdown.values().sum::<u64>());
/// ```
pub struct StorageManager {
    quota: u64,
    sources: RwLock<BTreeMap<String, Arc<dyn UsageSource>>>,
}

impl StorageManager {
    /// Creates a manager with no sources.
    #[must_use]
    pub fn new(quota: u64) -> Self {
        Self {
            quota,
            sources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a manager reporting `factory` under [`INDEXED_DB`], with the
    /// factory's quota.
    #[must_use]
    pub fn for_factory(factory: &crate::Factory) -> Self {
        let manager = Self::new(factory.config().quota);
        manager.register_source(INDEXED_DB, factory.usage_source());
        manager
    }

    /// Registers a closure as source `name`, replacing any previous one.
    pub fn register(
        &self,
        name: &str,
        source: impl Fn() -> CoreResult<u64> + Send + Sync + 'static,
    ) {
        self.register_source(name, Arc::new(source));
    }

    /// Registers `source` under `name`, replacing any previous one.
    pub fn register_source(&self, name: &str, source: Arc<dyn UsageSource>) {
        self.sources.write().insert(name.to_string(), source);
    }

    /// Removes source `name`. Returns true if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.sources.write().remove(name).is_some()
    }

    /// Returns the registered source names, sorted.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources.read().keys().cloned().collect()
    }

    /// Queries every source.
    ///
    /// # Errors
    ///
    /// Returns the first error a source reports.
    pub fn estimate(&self) -> CoreResult<StorageEstimate> {
        let sources: Vec<(String, Arc<dyn UsageSource>)> = self
            .sources
            .read()
            .iter()
            .map(|(name, source)| (name.clone(), Arc::clone(source)))
            .collect();
        let mut breakdown = BTreeMap::new();
        for (name, source) in sources {
            breakdown.insert(name, source.usage()?);
        }
        Ok(StorageEstimate {
            usage: breakdown.values().sum(),
            quota: self.quota,
            breakdown,
        })
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("quota", &self.quota)
            .field("sources", &self.source_names())
            .finish()
    }
}
