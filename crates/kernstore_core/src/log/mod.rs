//! Versioned transaction log.
//!
//! The log is a sequence of files `kernstore.log.<version>`, each starting
//! with a fixed [`LogHeader`] followed by framed entries:
//!
//! ```text
//! | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! A transaction is written as `Start`, zero or more `Command`s and exactly
//! one terminal entry: `OnePhaseCommit` or `Rollback`. Files rotate only
//! between transactions, so a transaction never spans two files.
//!
//! ## Recovery policy
//!
//! - A truncated frame at the end of a file is a clean end of log.
//! - A CRC failure on the very last frame of the newest file is a torn
//!   write: logged and treated as a clean end of log.
//! - Any other CRC failure, an unknown entry type or a bad header is fatal.
//! - A `Start` with no terminal entry is discarded by the transaction
//!   cursor.

mod channel;
mod cursor;
mod entry;
mod files;
mod header;
mod reader;
mod writer;

pub use channel::{
    LogVersionBridge, NoMoreChannels, PhysicalLogChannel, ReadAheadLogChannel,
    ReaderLogVersionBridge,
};
pub use cursor::{CommittedTransaction, TransactionCursor};
pub use entry::{compute_crc32, start_checksum, CommitEntry, LogEntry, LogEntryType, StartEntry};
pub use files::{LogFiles, LOG_FILE_PREFIX};
pub use header::{LogHeader, LOG_FORMAT_VERSION, LOG_HEADER_SIZE, LOG_MAGIC};
pub use reader::{log_entries, LogEntryReader};
pub use writer::TransactionLog;

use crate::error::CoreResult;

/// Source of truth for the current log version.
pub trait LogVersionRepository {
    /// Returns the version of the file currently written to.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    fn current_version(&self) -> CoreResult<u64>;

    /// Advances to the next version and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the new version cannot be persisted.
    fn increment_and_get_version(&self) -> CoreResult<u64>;
}
