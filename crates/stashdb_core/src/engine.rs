//! State shared by a factory and every handle it gives out.
//!
//! Lock order: the [`Registry`] mutex first, then at most one transaction
//! cell, then request or open-request cells. No lock is held while user
//! callbacks run.

use crate::config::Config;
use crate::database::Database;
use crate::dir::FactoryDir;
use crate::error::{CoreError, CoreResult};
use crate::event_loop::EventLoop;
use crate::journal::Journal;
use crate::open::OpenCell;
use crate::state::DatabaseState;
use crate::stats::EngineStats;
use crate::transaction::{lifecycle, TxnCell};
use crate::types::{ConnectionId, TransactionId};
use parking_lot::Mutex;
use stashdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::info;

pub(crate) type VersionChangeHandler = Arc<dyn Fn(&Database, u64, Option<u64>) + Send + Sync>;

pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) event_loop: EventLoop,
    pub(crate) stats: EngineStats,
    pub(crate) registry: Mutex<Registry>,
}

impl Shared {
    pub(crate) fn new(config: Config, dir: Option<FactoryDir>) -> Arc<Self> {
        Arc::new(Self {
            event_loop: EventLoop::new(config.task_quantum),
            config,
            stats: EngineStats::new(),
            registry: Mutex::new(Registry::new(dir)),
        })
    }
}

/// One loaded database.
pub(crate) struct DatabaseSlot {
    pub(crate) state: DatabaseState,
    pub(crate) journal: Journal,
    /// Unfinished transactions in creation order.
    pub(crate) live: Vec<Arc<TxnCell>>,
    /// Open and delete requests waiting their turn; the front one is served.
    pub(crate) queue: VecDeque<Arc<OpenCell>>,
    /// The running version change transaction, if any.
    pub(crate) upgrade: Option<Arc<TxnCell>>,
}

impl DatabaseSlot {
    fn new(state: DatabaseState, journal: Journal) -> Self {
        Self {
            state,
            journal,
            live: Vec::new(),
            queue: VecDeque::new(),
            upgrade: None,
        }
    }
}

pub(crate) struct ConnectionState {
    pub(crate) db_name: String,
    pub(crate) version: u64,
    pub(crate) store_names: BTreeSet<String>,
    /// `close()` was called; the connection closes once its transactions finish.
    pub(crate) close_pending: bool,
    pub(crate) closed: bool,
    pub(crate) upgrade: Option<Arc<TxnCell>>,
    pub(crate) on_version_change: Option<VersionChangeHandler>,
}

pub(crate) struct Registry {
    dir: Option<FactoryDir>,
    pub(crate) databases: BTreeMap<String, DatabaseSlot>,
    pub(crate) connections: HashMap<ConnectionId, ConnectionState>,
    next_connection: u64,
    next_transaction: u64,
}

impl Registry {
    fn new(dir: Option<FactoryDir>) -> Self {
        Self {
            dir,
            databases: BTreeMap::new(),
            connections: HashMap::new(),
            next_connection: 1,
            next_transaction: 1,
        }
    }

    pub(crate) fn dir(&self) -> Option<&FactoryDir> {
        self.dir.as_ref()
    }

    /// Replays every journal in the factory directory.
    pub(crate) fn load_all(&mut self, config: &Config) -> CoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        for path in dir.journal_files()? {
            let backend = FileBackend::open(&path)?;
            let (journal, replay) = Journal::open(Box::new(backend), config.sync_on_commit)?;
            info!(
                target: "stashdb::db",
                database = %replay.name,
                version = replay.state.version,
                "database loaded"
            );
            self.databases
                .insert(replay.name, DatabaseSlot::new(replay.state, journal));
        }
        Ok(())
    }

    /// Returns the slot for `name`, creating an empty database if needed.
    pub(crate) fn ensure_slot(
        &mut self,
        name: &str,
        config: &Config,
    ) -> CoreResult<&mut DatabaseSlot> {
        if !self.databases.contains_key(name) {
            let backend: Box<dyn StorageBackend> = match &self.dir {
                Some(dir) => Box::new(FileBackend::open(&dir.journal_path(name))?),
                None => Box::new(InMemoryBackend::new()),
            };
            let journal = Journal::create(backend, name, config.sync_on_commit)?;
            self.databases.insert(
                name.to_string(),
                DatabaseSlot::new(DatabaseState::default(), journal),
            );
        }
        self.databases
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found(format!("database {name:?} not found")))
    }

    pub(crate) fn slot_mut(&mut self, name: &str) -> CoreResult<&mut DatabaseSlot> {
        self.databases
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found(format!("database {name:?} not found")))
    }

    pub(crate) fn connection(&self, id: ConnectionId) -> CoreResult<&ConnectionState> {
        self.connections
            .get(&id)
            .ok_or_else(|| CoreError::invalid_state("unknown connection"))
    }

    pub(crate) fn connection_mut(&mut self, id: ConnectionId) -> CoreResult<&mut ConnectionState> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| CoreError::invalid_state("unknown connection"))
    }

    pub(crate) fn new_connection(&mut self, db_name: &str, version: u64) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        let store_names = self
            .databases
            .get(db_name)
            .map(|slot| slot.state.stores.keys().cloned().collect())
            .unwrap_or_default();
        self.connections.insert(
            id,
            ConnectionState {
                db_name: db_name.to_string(),
                version,
                store_names,
                close_pending: false,
                closed: false,
                upgrade: None,
                on_version_change: None,
            },
        );
        id
    }

    pub(crate) fn allocate_transaction(&mut self) -> TransactionId {
        let id = TransactionId::new(self.next_transaction);
        self.next_transaction += 1;
        id
    }

    /// Connections to `db_name` that are not fully closed.
    pub(crate) fn open_connections(&self, db_name: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.db_name == db_name && !c.closed)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Closes a connection whose `close()` was called once it has no
    /// unfinished transactions. Returns true if it closed now.
    pub(crate) fn settle_connection(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.get(&id) else {
            return false;
        };
        if conn.closed || !conn.close_pending {
            return false;
        }
        let busy = self
            .databases
            .get(&conn.db_name)
            .is_some_and(|slot| slot.live.iter().any(|t| t.connection == id));
        if busy {
            return false;
        }
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.closed = true;
            conn.on_version_change = None;
        }
        true
    }

    /// Bytes held by every journal.
    pub(crate) fn usage(&self) -> CoreResult<u64> {
        self.databases
            .values()
            .map(|slot| slot.journal.size())
            .sum()
    }
}

/// Starts transactions that are no longer blocked and serves the next
/// waiting open or delete request of `db_name`.
pub(crate) fn pump(shared: &Arc<Shared>, db_name: &str) {
    let reg = shared.registry.lock();
    lifecycle::start_ready(shared, &reg, db_name);
    if let Some(slot) = reg.databases.get(db_name) {
        if slot.upgrade.is_none() {
            if let Some(front) = slot.queue.front() {
                crate::open::schedule(shared, front);
            }
        }
    }
}

/// Queues [`pump`] as a task.
pub(crate) fn schedule_pump(shared: &Arc<Shared>, db_name: &str) {
    let task_shared = Arc::clone(shared);
    let name = db_name.to_string();
    shared
        .event_loop
        .queue_task(move || pump(&task_shared, &name));
}
