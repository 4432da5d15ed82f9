//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A journal store kept entirely in memory.
///
/// Used by in-memory factories and by tests. Contents vanish with the
/// backend, but sizes are reported exactly like a file would report them,
/// so usage estimates behave the same for both kinds of factory.
///
/// # Example
///
/// ```rust
/// use stashdb_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert_eq!(backend.append(b"abc").unwrap(), 0);
/// assert_eq!(backend.append(b"de").unwrap(), 3);
/// assert_eq!(backend.size().unwrap(), 5);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    destroyed: RwLock<bool>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that already holds `data`.
    ///
    /// Useful for replaying hand-built or damaged journals in tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            destroyed: RwLock::new(false),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn ensure_live(&self) -> StorageResult<()> {
        if *self.destroyed.read() {
            Err(StorageError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.ensure_live()?;
        let data = self.data.read();
        let size = data.len() as u64;
        let start = usize::try_from(offset).map_err(|_| StorageError::ReadPastEnd {
            offset,
            len,
            size,
        })?;
        let end = start.saturating_add(len);

        if start > data.len() || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.ensure_live()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_live()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_live()
    }

    fn size(&self) -> StorageResult<u64> {
        self.ensure_live()?;
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_live()?;
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        // new_size <= len, which already fits in usize
        data.truncate(new_size as usize);
        Ok(())
    }

    fn destroy(&mut self) -> StorageResult<()> {
        self.data.write().clear();
        *self.destroyed.write() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn append_returns_running_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"head").unwrap(), 0);
        assert_eq!(backend.append(b"tail").unwrap(), 4);
        assert_eq!(backend.read_at(4, 4).unwrap(), b"tail");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.read_at(2, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(9, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn truncate_drops_tail() {
        let mut backend = InMemoryBackend::with_data(b"complete+torn".to_vec());
        backend.truncate(8).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"complete");
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::TruncateBeyondEnd {
                requested: 10,
                size: 3
            })
        ));
    }

    #[test]
    fn destroyed_backend_rejects_use() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        backend.destroy().unwrap();
        assert!(matches!(backend.size(), Err(StorageError::Destroyed)));
        assert!(matches!(backend.append(b"x"), Err(StorageError::Destroyed)));
    }

    proptest::proptest! {
        #[test]
        fn read_all_is_concatenation(chunks in proptest::collection::vec(
            proptest::collection::vec(proptest::num::u8::ANY, 0..64), 0..16)) {
            let mut backend = InMemoryBackend::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                let offset = backend.append(chunk).unwrap();
                proptest::prop_assert_eq!(offset, expected.len() as u64);
                expected.extend_from_slice(chunk);
            }
            proptest::prop_assert_eq!(backend.read_all().unwrap(), expected);
        }
    }
}
