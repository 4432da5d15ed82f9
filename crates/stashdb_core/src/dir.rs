//! Factory directory management.
//!
//! A persistent factory owns one directory:
//!
//! ```text
//! <root>/
//! ├─ LOCK                     # Advisory lock for single-process access
//! └─ <sha256(name)>.journal   # One journal per database
//! ```
//!
//! Database names are arbitrary strings, so file names use the hex SHA-256
//! of the name; the real name lives in the journal header.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_EXTENSION: &str = "journal";

/// Holds the factory directory and its exclusive lock.
///
/// Only one `FactoryDir` can exist per directory at a time, across
/// processes.
#[derive(Debug)]
pub struct FactoryDir {
    path: PathBuf,
    _lock_file: File,
}

impl FactoryDir {
    /// Opens or creates a factory directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock ([`CoreError::DirectoryLocked`])
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::not_found(format!(
                    "factory directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_access(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the journal path for database `name`.
    #[must_use]
    pub fn journal_path(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(name.as_bytes());
        let mut file_name = String::with_capacity(digest.len() * 2 + 8);
        for byte in digest {
            let _ = write!(file_name, "{byte:02x}");
        }
        file_name.push('.');
        file_name.push_str(JOURNAL_EXTENSION);
        self.path.join(file_name)
    }

    /// Lists every journal file in the directory, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn journal_files(&self) -> CoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == JOURNAL_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_directory_and_lock() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("factory");
        let dir = FactoryDir::open(&root, true).unwrap();
        assert!(root.join(LOCK_FILE).exists());
        assert_eq!(dir.path(), root);
    }

    #[test]
    fn missing_directory_without_create() {
        let tmp = tempdir().unwrap();
        let err = FactoryDir::open(&tmp.path().join("nope"), false).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempdir().unwrap();
        let _first = FactoryDir::open(tmp.path(), true).unwrap();
        assert!(matches!(
            FactoryDir::open(tmp.path(), true),
            Err(CoreError::DirectoryLocked)
        ));
    }

    #[test]
    fn journal_names_are_stable_hashes() {
        let tmp = tempdir().unwrap();
        let dir = FactoryDir::open(tmp.path(), true).unwrap();
        let a = dir.journal_path("books/../db");
        assert_eq!(a, dir.journal_path("books/../db"));
        assert_ne!(a, dir.journal_path("other"));
        let file_name = a.file_name().unwrap().to_str().unwrap();
        assert_eq!(file_name.len(), 64 + ".journal".len());
        assert_eq!(a.parent().unwrap(), tmp.path());
    }

    #[test]
    fn lists_only_journals() {
        let tmp = tempdir().unwrap();
        let dir = FactoryDir::open(tmp.path(), true).unwrap();
        fs::write(dir.journal_path("a"), b"").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"").unwrap();
        assert_eq!(dir.journal_files().unwrap(), vec![dir.journal_path("a")]);
    }
}
