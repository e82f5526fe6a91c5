//! Error types for kernstore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in kernstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] kernstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A page or record could not be read or written.
    #[error("underlying storage failure: {message}")]
    UnderlyingStorage {
        /// Description of the failure.
        message: String,
    },

    /// A store that was not shut down cleanly carries a foreign format version.
    #[error(
        "Mismatching store version found ({found} while expecting {expected}). \
         The store cannot be automatically upgraded since it isn't cleanly shutdown. \
         Recover by starting the version that wrote it and shutting down cleanly."
    )]
    StoreVersionMismatch {
        /// Version recorded in the store.
        found: String,
        /// Version this kernel writes.
        expected: String,
    },

    /// A cleanly shut down store file was written by another format version.
    #[error("unexpected version {found} in {store}, expected {expected}")]
    UnexpectedStoreVersion {
        /// Store type descriptor.
        store: String,
        /// Version found in the trailer.
        found: String,
        /// Version this kernel writes.
        expected: String,
    },

    /// Transaction log is corrupted or invalid.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Committing or applying a transaction failed.
    #[error("transaction failure: {message}")]
    TransactionFailure {
        /// Description of the failure.
        message: String,
    },

    /// A transaction would leave the store in an invalid state.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the violation.
        message: String,
    },

    /// Supplied index configuration conflicts with the stored one.
    #[error("supplied index configuration:\n{supplied}\ndoesn't match stored config in a valid way:\n{stored}\nfor '{index}'")]
    IndexConfigMismatch {
        /// Index name.
        index: String,
        /// Configuration passed by the caller.
        supplied: String,
        /// Configuration on record.
        stored: String,
    },

    /// No index with this name exists.
    #[error("no {kind} index '{name}' found")]
    IndexNotFound {
        /// Entity kind (node or relationship).
        kind: &'static str,
        /// Index name.
        name: String,
    },

    /// An index configuration key cannot be changed.
    #[error("'{key}' cannot be modified")]
    IllegalIndexConfigKey {
        /// The offending key.
        key: String,
    },

    /// Entity not found.
    #[error("{kind} {id} not found")]
    EntityNotFound {
        /// Entity kind.
        kind: &'static str,
        /// Entity id.
        id: u64,
    },

    /// Invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates an underlying storage error.
    pub fn underlying_storage(message: impl Into<String>) -> Self {
        Self::UnderlyingStorage {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a transaction failure error.
    pub fn transaction_failure(message: impl Into<String>) -> Self {
        Self::TransactionFailure {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors that mean the persistent state is damaged.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::LogCorruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::StoreVersionMismatch { .. }
        )
    }
}
