//! Error types for StashDB core.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// The kind of a contract violation or request failure.
///
/// Names follow the IndexedDB exception labels so that assertions written
/// against a browser read the same against StashDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation not legal in the current state (double commit, abort after
    /// commit, schema change outside an upgrade, closed connection).
    InvalidState,
    /// Request submitted while the transaction does not accept requests.
    TransactionInactive,
    /// Write attempted in a read-only transaction.
    ReadOnly,
    /// Named object store or database does not exist.
    NotFound,
    /// Uniqueness violated (`add` on an existing key, duplicate store).
    Constraint,
    /// Invalid key or value.
    Data,
    /// Request cancelled because its transaction aborted.
    Abort,
    /// Commit would exceed the configured quota.
    QuotaExceeded,
    /// Requested version is lower than the stored one.
    Version,
    /// Invalid parameter combination (empty scope, auto-increment on root path).
    InvalidAccess,
    /// Argument of the wrong shape.
    Type,
    /// Infrastructure failure (storage, codec, I/O).
    Unknown,
}

impl ErrorKind {
    /// Returns the host label for this kind, e.g. `"InvalidStateError"`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidState => "InvalidStateError",
            Self::TransactionInactive => "TransactionInactiveError",
            Self::ReadOnly => "ReadOnlyError",
            Self::NotFound => "NotFoundError",
            Self::Constraint => "ConstraintError",
            Self::Data => "DataError",
            Self::Abort => "AbortError",
            Self::QuotaExceeded => "QuotaExceededError",
            Self::Version => "VersionError",
            Self::InvalidAccess => "InvalidAccessError",
            Self::Type => "TypeError",
            Self::Unknown => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cloneable, typed failure delivered through request and transaction
/// error channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DomException {
    /// The failure kind.
    pub kind: ErrorKind,
    /// Human readable detail.
    pub message: String,
}

impl DomException {
    /// Creates a new exception.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the host label of the kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Errors that can occur in StashDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A contract violation reported synchronously to the caller.
    #[error(transparent)]
    Dom(#[from] DomException),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] stashdb_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] stashdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A complete journal record failed validation.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the factory directory.
    #[error("factory directory locked: another process has exclusive access")]
    DirectoryLocked,
}

impl CoreError {
    /// Returns the error kind; infrastructure failures map to
    /// [`ErrorKind::Unknown`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Dom(e) => e.kind,
            _ => ErrorKind::Unknown,
        }
    }

    /// Converts the error into the cloneable form used by request and
    /// transaction error channels.
    #[must_use]
    pub fn to_exception(&self) -> DomException {
        match self {
            Self::Dom(e) => e.clone(),
            other => DomException::new(ErrorKind::Unknown, other.to_string()),
        }
    }

    /// Creates an error of the given kind.
    pub fn dom(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Dom(DomException::new(kind, message))
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::dom(ErrorKind::InvalidState, message)
    }

    /// Creates a transaction inactive error.
    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::dom(ErrorKind::TransactionInactive, message)
    }

    /// Creates a read-only error.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::dom(ErrorKind::ReadOnly, message)
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::dom(ErrorKind::NotFound, message)
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::dom(ErrorKind::Constraint, message)
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::dom(ErrorKind::Data, message)
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::dom(ErrorKind::InvalidAccess, message)
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_host_labels() {
        assert_eq!(ErrorKind::InvalidState.name(), "InvalidStateError");
        assert_eq!(
            ErrorKind::TransactionInactive.to_string(),
            "TransactionInactiveError"
        );
    }

    #[test]
    fn infrastructure_errors_are_unknown() {
        let err = CoreError::journal_corruption("bad crc");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        let exception = err.to_exception();
        assert_eq!(exception.name(), "UnknownError");
        assert!(exception.message.contains("bad crc"));
    }

    #[test]
    fn dom_errors_keep_their_kind() {
        let err = CoreError::transaction_inactive("commit already requested");
        assert_eq!(err.kind(), ErrorKind::TransactionInactive);
        assert_eq!(
            err.to_string(),
            "TransactionInactiveError: commit already requested"
        );
    }
}
