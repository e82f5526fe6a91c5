//! Appending transactions to the log.

use super::entry::{frame, CommitEntry, LogEntry, LogEntryType, StartEntry};
use super::files::LogFiles;
use super::header::{LogHeader, LOG_HEADER_SIZE};
use super::reader::end_of_last_terminal_entry;
use super::LogVersionRepository;
use crate::command::TransactionRepresentation;
use crate::error::{CoreError, CoreResult};
use crate::types::{current_time_millis, LogPosition, StoreId, TransactionId};
use kernstore_storage::StorageBackend;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Writer for the current log file.
///
/// Every transaction is written as `Start`, its commands and one terminal
/// entry. If anything fails after `Start` is on disk, the partial frame is
/// cut off and a `Rollback` is written in its place.
pub struct TransactionLog {
    log_files: LogFiles,
    backend: Box<dyn StorageBackend>,
    version: u64,
    offset: u64,
    store_id: StoreId,
    rotation_threshold: u64,
    sync_on_commit: bool,
}

impl TransactionLog {
    /// Opens the file of the repository's current version for appending.
    ///
    /// A missing file is created with a fresh header. An existing file is
    /// cut back to the end of its last terminal entry, dropping any
    /// unfinished transaction and torn tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is corrupt, belongs to another store or
    /// cannot be written.
    pub fn open(
        log_files: LogFiles,
        versions: &dyn LogVersionRepository,
        store_id: StoreId,
        last_committed: TransactionId,
        rotation_threshold: u64,
        sync_on_commit: bool,
        read_ahead: usize,
    ) -> CoreResult<Self> {
        let version = versions.current_version()?;
        let fs = log_files.file_system().clone();
        fs.mkdirs(log_files.dir())?;
        let path = log_files.version_file(version);
        let mut backend = fs.open(&path)?;

        let offset = if backend.size()? < LOG_HEADER_SIZE as u64 {
            backend.truncate(0)?;
            backend.append(&LogHeader::new(version, store_id, last_committed).encode())?;
            backend.sync()?;
            info!(version, "started log file");
            LOG_HEADER_SIZE as u64
        } else {
            let header = LogHeader::decode(&backend.read_at(0, LOG_HEADER_SIZE)?)?;
            if header.store_id != store_id {
                return Err(CoreError::log_corruption(format!(
                    "log file {} belongs to {}, not {store_id}",
                    path.display(),
                    header.store_id
                )));
            }
            let end = end_of_last_terminal_entry(&log_files, version, read_ahead)?;
            let size = backend.size()?;
            if size > end {
                warn!(version, discarded = size - end, "cutting unfinished log tail");
                backend.truncate(end)?;
                backend.sync()?;
            }
            end
        };

        debug!(version, offset, "opened transaction log");
        Ok(Self {
            log_files,
            backend,
            version,
            offset,
            store_id,
            rotation_threshold,
            sync_on_commit,
        })
    }

    /// Returns the version being written.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the position the next entry will be written at.
    #[must_use]
    pub const fn position(&self) -> LogPosition {
        LogPosition::new(self.version, self.offset)
    }

    /// Returns the log files.
    #[must_use]
    pub const fn log_files(&self) -> &LogFiles {
        &self.log_files
    }

    fn write(&mut self, frame: &[u8]) -> CoreResult<()> {
        self.backend.append(frame)?;
        self.offset += frame.len() as u64;
        Ok(())
    }

    fn cut_back(&mut self, offset: u64) -> CoreResult<()> {
        self.backend.truncate(offset)?;
        self.offset = offset;
        Ok(())
    }

    /// Appends a whole transaction under `tx_id` and returns the position
    /// just past its commit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails. In that case the transaction is
    /// closed by a `Rollback` entry when possible.
    pub fn append(
        &mut self,
        tx: &TransactionRepresentation,
        tx_id: TransactionId,
    ) -> CoreResult<LogPosition> {
        let mut scope = StartScope::begin(self, tx)?;
        for command in &tx.commands {
            scope.write(&frame(LogEntryType::Command, &command.encode())?)?;
        }
        scope.commit(tx_id)
    }

    /// Forces written entries to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn force(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Rotates to a new version if the current file reached the threshold.
    ///
    /// Only call between transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if rotating fails.
    pub fn rotate_if_needed(
        &mut self,
        versions: &dyn LogVersionRepository,
        last_committed: TransactionId,
    ) -> CoreResult<bool> {
        if self.offset < self.rotation_threshold {
            return Ok(false);
        }
        self.rotate(versions, last_committed)?;
        Ok(true)
    }

    /// Starts the next version's file.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be advanced or the new file
    /// cannot be written.
    pub fn rotate(
        &mut self,
        versions: &dyn LogVersionRepository,
        last_committed: TransactionId,
    ) -> CoreResult<u64> {
        self.backend.sync()?;
        let next = versions.increment_and_get_version()?;
        let mut backend = self.log_files.file_system().open(&self.log_files.version_file(next))?;
        backend.truncate(0)?;
        backend.append(&LogHeader::new(next, self.store_id, last_committed).encode())?;
        backend.sync()?;
        info!(from = self.version, to = next, %last_committed, "rotated transaction log");
        self.backend = backend;
        self.version = next;
        self.offset = LOG_HEADER_SIZE as u64;
        Ok(next)
    }
}

impl fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLog")
            .field("dir", &self.log_files.dir())
            .field("version", &self.version)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// An open `Start` entry that must be closed by a terminal entry.
///
/// Dropping the scope without [`commit`](Self::commit) writes `Rollback`.
struct StartScope<'a> {
    log: &'a mut TransactionLog,
    global_id: [u8; 16],
    written_to: u64,
    closed: bool,
}

impl<'a> StartScope<'a> {
    fn begin(log: &'a mut TransactionLog, tx: &TransactionRepresentation) -> CoreResult<Self> {
        let start_position = log.position();
        let start = LogEntry::Start(StartEntry {
            master_id: tx.master_id,
            local_id: tx.local_id,
            global_id: tx.global_id,
            time_written: tx.time_started,
            last_committed_tx_when_started: tx.last_committed_tx_when_started,
            additional_header: tx.additional_header.clone(),
            start_position,
        });
        let frame = start.encode_frame()?;
        if let Err(e) = log.write(&frame) {
            // Nothing of this transaction may remain.
            if let Err(cut) = log.cut_back(start_position.offset) {
                error!(error = %cut, "could not remove partial start entry");
            }
            return Err(e);
        }
        Ok(Self {
            written_to: log.offset,
            log,
            global_id: tx.global_id,
            closed: false,
        })
    }

    fn write(&mut self, frame: &[u8]) -> CoreResult<()> {
        self.log.write(frame)?;
        self.written_to = self.log.offset;
        Ok(())
    }

    fn commit(mut self, tx_id: TransactionId) -> CoreResult<LogPosition> {
        let commit = LogEntry::OnePhaseCommit(CommitEntry {
            tx_id,
            time_written: current_time_millis(),
        });
        self.write(&commit.encode_frame()?)?;
        self.closed = true;
        if self.log.sync_on_commit {
            self.log.force()?;
        }
        Ok(self.log.position())
    }

    fn roll_back(&mut self) -> CoreResult<()> {
        self.log.cut_back(self.written_to)?;
        let rollback = LogEntry::Rollback {
            global_id: self.global_id,
        };
        self.log.write(&rollback.encode_frame()?)?;
        self.log.force()
    }
}

impl Drop for StartScope<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match self.roll_back() {
            Ok(()) => debug!(at = %self.log.position(), "wrote rollback for failed append"),
            Err(e) => error!(error = %e, "could not close transaction with rollback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::log::cursor::TransactionCursor;
    use crate::log::reader::LogEntryReader;
    use crate::store::NodeRecord;
    use kernstore_storage::{EphemeralFileSystem, FileSystem};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Versions(Mutex<u64>);

    impl LogVersionRepository for Versions {
        fn current_version(&self) -> CoreResult<u64> {
            Ok(*self.0.lock())
        }

        fn increment_and_get_version(&self) -> CoreResult<u64> {
            let mut version = self.0.lock();
            *version += 1;
            Ok(*version)
        }
    }

    fn store_id() -> StoreId {
        StoreId {
            creation_time: 1,
            random_id: 2,
        }
    }

    fn setup() -> (EphemeralFileSystem, LogFiles, Versions) {
        let fs = EphemeralFileSystem::new();
        let files = LogFiles::new(Arc::new(fs.clone()), "/db");
        (fs, files, Versions::default())
    }

    fn open(files: &LogFiles, versions: &Versions, threshold: u64) -> CoreResult<TransactionLog> {
        TransactionLog::open(
            files.clone(),
            versions,
            store_id(),
            TransactionId::BASE,
            threshold,
            true,
            4096,
        )
    }

    fn tx(nodes: &[u64]) -> TransactionRepresentation {
        let commands = nodes
            .iter()
            .map(|id| Command::Node(NodeRecord::new(*id)))
            .collect();
        TransactionRepresentation::new(commands, TransactionId::BASE)
    }

    fn entries(files: &LogFiles) -> Vec<LogEntry> {
        LogEntryReader::open(files, 0, 4096)
            .unwrap()
            .map(|result| result.unwrap().1)
            .collect()
    }

    #[test]
    fn appended_transaction_reads_back() {
        let (_fs, files, versions) = setup();
        let mut log = open(&files, &versions, u64::MAX).unwrap();
        let end = log.append(&tx(&[1, 2]), TransactionId::new(2)).unwrap();
        assert_eq!(end, log.position());

        let committed: Vec<_> = TransactionCursor::open(&files, 0, 4096)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].tx_id(), TransactionId::new(2));
        assert_eq!(committed[0].transaction.commands.len(), 2);
        assert_eq!(
            committed[0].start.start_position,
            LogPosition::new(0, LOG_HEADER_SIZE as u64)
        );
        assert_eq!(committed[0].end_position, end);
    }

    #[test]
    fn dropped_scope_writes_rollback() {
        let (_fs, files, versions) = setup();
        let mut log = open(&files, &versions, u64::MAX).unwrap();
        {
            let mut scope = StartScope::begin(&mut log, &tx(&[])).unwrap();
            let command = Command::Node(NodeRecord::new(0));
            scope
                .write(&frame(LogEntryType::Command, &command.encode()).unwrap())
                .unwrap();
        }
        let kinds: Vec<_> = entries(&files).iter().map(LogEntry::entry_type).collect();
        assert_eq!(
            kinds,
            vec![LogEntryType::Start, LogEntryType::Command, LogEntryType::Rollback]
        );
        assert_eq!(TransactionCursor::open(&files, 0, 4096).unwrap().count(), 0);
    }

    #[test]
    fn reopen_cuts_unfinished_transaction() {
        let (fs, files, versions) = setup();
        let end = {
            let mut log = open(&files, &versions, u64::MAX).unwrap();
            log.append(&tx(&[1]), TransactionId::new(2)).unwrap()
        };
        let mut dangling = fs.open(&files.version_file(0)).unwrap();
        let start = tx(&[]);
        dangling
            .append(
                &LogEntry::Start(StartEntry {
                    master_id: -1,
                    local_id: -1,
                    global_id: start.global_id,
                    time_written: 0,
                    last_committed_tx_when_started: TransactionId::BASE,
                    additional_header: Vec::new(),
                    start_position: end,
                })
                .encode_frame()
                .unwrap(),
            )
            .unwrap();

        let mut log = open(&files, &versions, u64::MAX).unwrap();
        assert_eq!(log.position(), end);
        log.append(&tx(&[2]), TransactionId::new(3)).unwrap();
        let starts = entries(&files)
            .iter()
            .filter(|entry| entry.entry_type() == LogEntryType::Start)
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn rotates_between_transactions() {
        let (_fs, files, versions) = setup();
        let mut log = open(&files, &versions, 1).unwrap();
        log.append(&tx(&[1]), TransactionId::new(2)).unwrap();
        assert!(log.rotate_if_needed(&versions, TransactionId::new(2)).unwrap());
        assert_eq!(log.version(), 1);
        assert_eq!(versions.current_version().unwrap(), 1);
        log.append(&tx(&[2]), TransactionId::new(3)).unwrap();

        assert_eq!(files.versions().unwrap(), vec![0, 1]);
        let ids: Vec<_> = TransactionCursor::open(&files, 0, 4096)
            .unwrap()
            .map(|tx| tx.unwrap().tx_id().as_u64())
            .collect();
        assert_eq!(ids, vec![2, 3]);

        let header = crate::log::PhysicalLogChannel::open(&files, 1).unwrap();
        assert_eq!(header.header().last_committed_tx, TransactionId::new(2));
    }

    #[test]
    fn foreign_log_is_rejected() {
        let (_fs, files, versions) = setup();
        drop(open(&files, &versions, u64::MAX).unwrap());
        let result = TransactionLog::open(
            files,
            &versions,
            StoreId::default(),
            TransactionId::BASE,
            u64::MAX,
            true,
            4096,
        );
        assert!(matches!(result, Err(CoreError::LogCorruption { .. })));
    }
}
