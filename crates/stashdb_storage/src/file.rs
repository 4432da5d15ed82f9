//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal store backed by a single file.
///
/// - `flush()` pushes data to the OS
/// - `sync()` calls `File::sync_all()`
/// - `destroy()` closes and removes the file
///
/// # Example
///
/// ```no_run
/// use stashdb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("books.journal")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: Option<File>,
    size: u64,
}

impl FileState {
    fn file(&mut self) -> StorageResult<&mut File> {
        self.file.as_mut().ok_or(StorageError::Destroyed)
    }
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState {
                file: Some(file),
                size,
            }),
        })
    }

    /// Opens or creates a file backend, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        let size = state.size;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let file = state.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut state = self.state.lock();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = state.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        state.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.state.lock().file()?.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.state.lock().file()?.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        let state = self.state.lock();
        if state.file.is_none() {
            return Err(StorageError::Destroyed);
        }
        Ok(state.size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut state = self.state.lock();
        if new_size > state.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: state.size,
            });
        }
        let file = state.file()?;
        file.set_len(new_size)?;
        file.sync_all()?;
        state.size = new_size;
        Ok(())
    }

    fn destroy(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.file.take().is_some() {
            state.size = 0;
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
