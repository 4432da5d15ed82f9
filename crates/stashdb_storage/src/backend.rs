//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store holding one database journal.
///
/// Backends never interpret their contents. StashDB appends one framed
/// record per committed transaction and replays the whole store when a
/// database is loaded.
///
/// # Invariants
///
/// - `append` writes at the current end and returns that offset
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - `size` is the sum of all appended bytes minus truncated bytes
/// - after `sync` returns, appended bytes survive process termination
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the store back to `new_size` bytes.
    ///
    /// Used to drop a torn record left at the end of a journal.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size` is
    /// larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Releases everything the store holds.
    ///
    /// File backends remove their file. The backend must not be used
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying resource cannot be removed.
    fn destroy(&mut self) -> StorageResult<()>;

    /// Reads the entire contents of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be read or the read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| crate::StorageError::ReadPastEnd {
            offset: 0,
            len: usize::MAX,
            size,
        })?;
        self.read_at(0, len)
    }
}
