//! Append-only journal: one per database.
//!
//! The first record is a [`JournalRecord::Header`]; every committed
//! transaction that changed something appends exactly one
//! [`JournalRecord::Commit`]. Loading a database replays the whole journal.
//!
//! Recovery rules:
//!
//! - an incomplete final frame (crash mid-append) is truncated away
//! - a complete frame that fails validation is [`CoreError::JournalCorruption`]

mod record;

pub use record::{compute_crc32, JournalOp, JournalRecord, JOURNAL_FORMAT, JOURNAL_MAGIC};

use crate::error::{CoreError, CoreResult};
use crate::state::DatabaseState;
use crate::types::SequenceNumber;
use record::{decode_frame, FrameRead};
use stashdb_storage::StorageBackend;
use tracing::{debug, warn};

/// Writer side of a database journal.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    last_sequence: SequenceNumber,
}

/// What replaying a journal produced.
#[derive(Debug)]
pub struct Replay {
    /// Database name from the header.
    pub name: String,
    /// Committed state.
    pub state: DatabaseState,
    /// Sequence number of the last commit record.
    pub last_sequence: SequenceNumber,
    /// Number of commit records applied.
    pub commits: usize,
    /// Bytes dropped from a torn tail.
    pub truncated: u64,
}

impl Journal {
    /// Starts a new journal for database `name` on an empty backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn create(
        mut backend: Box<dyn StorageBackend>,
        name: &str,
        sync_on_commit: bool,
    ) -> CoreResult<Self> {
        let header = JournalRecord::Header {
            name: name.to_string(),
            format: JOURNAL_FORMAT,
        };
        backend.append(&header.encode_frame()?)?;
        if sync_on_commit {
            backend.flush()?;
            backend.sync()?;
        }
        Ok(Self {
            backend,
            sync_on_commit,
            last_sequence: SequenceNumber::default(),
        })
    }

    /// Opens an existing journal and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is corrupt or unreadable.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<(Self, Replay)> {
        let replay = replay(backend.as_ref())?;
        if replay.truncated > 0 {
            let keep = backend.size()? - replay.truncated;
            warn!(
                target: "stashdb::journal",
                database = %replay.name,
                dropped = replay.truncated,
                "truncating torn journal tail"
            );
            backend.truncate(keep)?;
        }
        debug!(
            target: "stashdb::journal",
            database = %replay.name,
            commits = replay.commits,
            version = replay.state.version,
            "journal replayed"
        );
        let journal = Self {
            backend,
            sync_on_commit,
            last_sequence: replay.last_sequence,
        };
        Ok((journal, replay))
    }

    /// Encodes the commit record that would follow the last one.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_commit(&self, ops: &[JournalOp]) -> CoreResult<Vec<u8>> {
        JournalRecord::Commit {
            sequence: self.last_sequence.next(),
            ops: ops.to_vec(),
        }
        .encode_frame()
    }

    /// Appends a frame produced by [`Journal::encode_commit`] and returns
    /// the bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails.
    pub fn append_frame(&mut self, frame: &[u8]) -> CoreResult<u64> {
        self.backend.append(frame)?;
        if self.sync_on_commit {
            self.backend.flush()?;
            self.backend.sync()?;
        }
        self.last_sequence = self.last_sequence.next();
        Ok(frame.len() as u64)
    }

    /// Appends a commit record holding `ops` and returns the bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append_commit(&mut self, ops: &[JournalOp]) -> CoreResult<u64> {
        let frame = self.encode_commit(ops)?;
        self.append_frame(&frame)
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns the sequence number of the last commit.
    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    /// Releases the journal's storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be destroyed.
    pub fn destroy(mut self) -> CoreResult<()> {
        self.backend.destroy()?;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("last_sequence", &self.last_sequence)
            .finish_non_exhaustive()
    }
}

/// Replays a journal without modifying it.
///
/// # Errors
///
/// Returns [`CoreError::JournalCorruption`] if a complete record is invalid,
/// the journal does not start with a header, or sequence numbers go
/// backwards.
pub fn replay(backend: &dyn StorageBackend) -> CoreResult<Replay> {
    let data = backend.read_all()?;
    let mut offset = 0usize;
    let mut name = None;
    let mut state = DatabaseState::default();
    let mut last_sequence = SequenceNumber::default();
    let mut commits = 0;

    while offset < data.len() {
        let (record, len) = match decode_frame(&data[offset..])? {
            FrameRead::Record(record, len) => (record, len),
            FrameRead::Torn => break,
        };
        match record {
            JournalRecord::Header { name: header, .. } => {
                if name.is_some() {
                    return Err(CoreError::journal_corruption("duplicate journal header"));
                }
                name = Some(header);
            }
            JournalRecord::Commit { sequence, ops } => {
                if name.is_none() {
                    return Err(CoreError::journal_corruption(
                        "commit record before journal header",
                    ));
                }
                if sequence <= last_sequence {
                    return Err(CoreError::journal_corruption(format!(
                        "sequence went backwards: {sequence} after {last_sequence}"
                    )));
                }
                for op in &ops {
                    state.apply(op);
                }
                last_sequence = sequence;
                commits += 1;
            }
        }
        offset += len;
    }

    let name = name.ok_or_else(|| CoreError::journal_corruption("journal has no header"))?;
    Ok(Replay {
        name,
        state,
        last_sequence,
        commits,
        truncated: (data.len() - offset) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_codec::{Key, KeyPath, Value};
    use stashdb_storage::InMemoryBackend;

    fn books_ops() -> Vec<JournalOp> {
        vec![
            JournalOp::SetVersion { version: 1 },
            JournalOp::CreateStore {
                name: "books".into(),
                key_path: Some(KeyPath::parse("isbn").unwrap()),
                auto_increment: false,
            },
        ]
    }

    fn put(key: &str, title: &str) -> JournalOp {
        JournalOp::Put {
            store: "books".into(),
            key: Key::from(key),
            value: Value::map([("isbn", key.into()), ("title", title.into())]),
        }
    }

    #[test]
    fn new_journal_replays_empty() {
        let journal = Journal::create(Box::new(InMemoryBackend::new()), "db", false).unwrap();
        assert!(journal.size().unwrap() > 0);
        let (_, replay) = Journal::open(journal.backend, false).unwrap();
        assert_eq!(replay.name, "db");
        assert_eq!(replay.state, DatabaseState::default());
        assert_eq!(replay.commits, 0);
    }

    #[test]
    fn commits_replay_in_order() {
        let mut journal =
            Journal::create(Box::new(InMemoryBackend::new()), "db", false).unwrap();
        journal.append_commit(&books_ops()).unwrap();
        journal
            .append_commit(&[put("one", "t1"), put("two", "t2")])
            .unwrap();
        journal
            .append_commit(&[JournalOp::Delete {
                store: "books".into(),
                key: Key::from("one"),
            }])
            .unwrap();

        let (reopened, replay) = Journal::open(journal.backend, false).unwrap();
        assert_eq!(replay.commits, 3);
        assert_eq!(reopened.last_sequence(), SequenceNumber::new(3));
        let books = &replay.state.stores["books"];
        assert_eq!(books.records.len(), 1);
        assert!(books.records.contains_key(&Key::from("two")));
    }

    #[test]
    fn appends_grow_the_journal() {
        let mut journal =
            Journal::create(Box::new(InMemoryBackend::new()), "db", false).unwrap();
        let before = journal.size().unwrap();
        let expected = journal.encode_commit(&books_ops()).unwrap().len() as u64;
        let written = journal.append_commit(&books_ops()).unwrap();
        assert_eq!(written, expected);
        assert_eq!(journal.size().unwrap(), before + written);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let mut journal =
            Journal::create(Box::new(InMemoryBackend::new()), "db", false).unwrap();
        journal.append_commit(&books_ops()).unwrap();
        let good = journal.size().unwrap();

        let frame = JournalRecord::Commit {
            sequence: SequenceNumber::new(2),
            ops: vec![put("one", "t1")],
        }
        .encode_frame()
        .unwrap();
        journal.backend.append(&frame[..frame.len() / 2]).unwrap();

        let (reopened, replay) = Journal::open(journal.backend, false).unwrap();
        assert_eq!(replay.commits, 1);
        assert!(replay.truncated > 0);
        assert_eq!(reopened.size().unwrap(), good);
        assert!(replay.state.stores["books"].records.is_empty());
    }

    #[test]
    fn corrupt_record_is_rejected() {
        let mut journal =
            Journal::create(Box::new(InMemoryBackend::new()), "db", false).unwrap();
        journal.append_commit(&books_ops()).unwrap();
        let mut bytes = journal.backend.read_all().unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;

        let result = Journal::open(Box::new(InMemoryBackend::with_data(bytes)), false);
        assert!(matches!(result, Err(CoreError::JournalCorruption { .. })));
    }

    proptest::proptest! {
        #[test]
        fn replay_matches_direct_application(
            batches in proptest::collection::vec(
                proptest::collection::vec((0u8..16, proptest::option::of("[a-z]{1,6}")), 1..8),
                0..6,
            )
        ) {
            let mut journal =
                Journal::create(Box::new(InMemoryBackend::new()), "db", false).unwrap();
            let mut expected = DatabaseState::default();
            let mut commits = vec![books_ops()];
            for batch in batches {
                commits.push(
                    batch
                        .into_iter()
                        .map(|(key, title)| match title {
                            Some(title) => put(&key.to_string(), &title),
                            None => JournalOp::Delete {
                                store: "books".into(),
                                key: Key::from(key.to_string()),
                            },
                        })
                        .collect(),
                );
            }
            for ops in &commits {
                journal.append_commit(ops).unwrap();
                for op in ops {
                    expected.apply(op);
                }
            }

            let replayed = replay(journal.backend.as_ref()).unwrap();
            proptest::prop_assert_eq!(replayed.state, expected);
            proptest::prop_assert_eq!(replayed.commits, commits.len());
        }
    }

    #[test]
    fn headerless_journal_is_rejected() {
        let frame = JournalRecord::Commit {
            sequence: SequenceNumber::new(1),
            ops: books_ops(),
        }
        .encode_frame()
        .unwrap();
        let backend = InMemoryBackend::with_data(frame);
        assert!(replay(&backend).is_err());
    }
}
