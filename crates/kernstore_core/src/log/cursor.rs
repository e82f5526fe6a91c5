//! Grouping of log entries into committed transactions.

use super::channel::{LogVersionBridge, NoMoreChannels, ReaderLogVersionBridge};
use super::entry::{CommitEntry, LogEntry, StartEntry};
use super::files::LogFiles;
use super::reader::LogEntryReader;
use crate::command::{Command, TransactionRepresentation};
use crate::error::{CoreError, CoreResult};
use crate::types::{LogPosition, TransactionId};
use tracing::{debug, warn};

/// A transaction read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    /// The `Start` entry.
    pub start: StartEntry,
    /// Commands and header fields.
    pub transaction: TransactionRepresentation,
    /// The `OnePhaseCommit` entry.
    pub commit: CommitEntry,
    /// Position just past the commit entry.
    pub end_position: LogPosition,
}

impl CommittedTransaction {
    /// Returns the committed transaction id.
    #[must_use]
    pub const fn tx_id(&self) -> TransactionId {
        self.commit.tx_id
    }
}

/// Yields committed transactions in log order.
///
/// Transactions ended by `Rollback`, and a `Start` that is followed by
/// another `Start` or by the end of the log, are dropped.
#[derive(Debug)]
pub struct TransactionCursor<B> {
    reader: LogEntryReader<B>,
}

impl<B: LogVersionBridge> TransactionCursor<B> {
    /// Creates a cursor over `reader`.
    pub const fn new(reader: LogEntryReader<B>) -> Self {
        Self { reader }
    }

    /// Returns the position just past the last entry read.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        self.reader.position()
    }

    /// Reads the next committed transaction.
    ///
    /// # Errors
    ///
    /// Returns the reader's errors, or a log corruption error for a command
    /// or commit outside a transaction.
    pub fn next_transaction(&mut self) -> CoreResult<Option<CommittedTransaction>> {
        let mut pending: Option<(StartEntry, Vec<Command>)> = None;
        while let Some((position, entry)) = self.reader.read_entry()? {
            match entry {
                LogEntry::Start(start) => {
                    if let Some((dangling, _)) = pending.replace((start, Vec::new())) {
                        warn!(
                            at = %dangling.start_position,
                            "dropping transaction without terminal entry"
                        );
                    }
                }
                LogEntry::Command(command) => match pending.as_mut() {
                    Some((_, commands)) => commands.push(command),
                    None => {
                        return Err(CoreError::log_corruption(format!(
                            "command outside a transaction at {position}"
                        )))
                    }
                },
                LogEntry::OnePhaseCommit(commit) => {
                    let (start, commands) = pending.take().ok_or_else(|| {
                        CoreError::log_corruption(format!(
                            "commit of {} without start at {position}",
                            commit.tx_id
                        ))
                    })?;
                    let transaction = TransactionRepresentation {
                        commands,
                        master_id: start.master_id,
                        local_id: start.local_id,
                        global_id: start.global_id,
                        time_started: start.time_written,
                        last_committed_tx_when_started: start.last_committed_tx_when_started,
                        additional_header: start.additional_header.clone(),
                    };
                    return Ok(Some(CommittedTransaction {
                        start,
                        transaction,
                        commit,
                        end_position: self.reader.position(),
                    }));
                }
                LogEntry::Rollback { .. } => {
                    if pending.take().is_none() {
                        debug!(%position, "rollback without start");
                    }
                }
            }
        }
        if let Some((start, _)) = pending {
            debug!(at = %start.start_position, "incomplete transaction at end of log");
        }
        Ok(None)
    }

    /// Visits transactions until `visitor` returns false or the log ends.
    ///
    /// # Errors
    ///
    /// Returns the first read or visitor error.
    pub fn for_each<V>(&mut self, mut visitor: V) -> CoreResult<()>
    where
        V: FnMut(CommittedTransaction) -> CoreResult<bool>,
    {
        while let Some(tx) = self.next_transaction()? {
            if !visitor(tx)? {
                break;
            }
        }
        Ok(())
    }
}

impl<B: LogVersionBridge> Iterator for TransactionCursor<B> {
    type Item = CoreResult<CommittedTransaction>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_transaction().transpose()
    }
}

impl TransactionCursor<ReaderLogVersionBridge> {
    /// Opens a cursor from `version` through every following file.
    ///
    /// # Errors
    ///
    /// Returns an error if the first file cannot be opened.
    pub fn open(log_files: &LogFiles, version: u64, read_ahead: usize) -> CoreResult<Self> {
        Ok(Self::new(LogEntryReader::open(log_files, version, read_ahead)?))
    }
}

impl TransactionCursor<NoMoreChannels> {
    /// Opens a cursor over the single file of `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_single(log_files: &LogFiles, version: u64, read_ahead: usize) -> CoreResult<Self> {
        Ok(Self::new(LogEntryReader::open_single(
            log_files, version, read_ahead,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::header::LogHeader;
    use crate::store::NodeRecord;
    use crate::types::StoreId;
    use kernstore_storage::{EphemeralFileSystem, FileSystem};
    use std::sync::Arc;

    fn start(global: u8) -> LogEntry {
        LogEntry::Start(StartEntry {
            master_id: -1,
            local_id: -1,
            global_id: [global; 16],
            time_written: 0,
            last_committed_tx_when_started: TransactionId::BASE,
            additional_header: Vec::new(),
            start_position: LogPosition::new(0, 0),
        })
    }

    fn node(id: u64) -> LogEntry {
        LogEntry::Command(Command::Node(NodeRecord::new(id)))
    }

    fn commit(tx: u64) -> LogEntry {
        LogEntry::OnePhaseCommit(CommitEntry {
            tx_id: TransactionId::new(tx),
            time_written: 0,
        })
    }

    fn cursor(entries: &[LogEntry]) -> TransactionCursor<NoMoreChannels> {
        let fs = EphemeralFileSystem::new();
        let files = LogFiles::new(Arc::new(fs.clone()), "/db");
        let mut backend = fs.open(&files.version_file(0)).unwrap();
        backend
            .append(&LogHeader::new(0, StoreId::default(), TransactionId::BASE).encode())
            .unwrap();
        for entry in entries {
            backend.append(&entry.encode_frame().unwrap()).unwrap();
        }
        TransactionCursor::open_single(&files, 0, 4096).unwrap()
    }

    fn ids(entries: &[LogEntry]) -> Vec<u64> {
        cursor(entries)
            .map(|tx| tx.unwrap().tx_id().as_u64())
            .collect()
    }

    #[test]
    fn groups_commands_by_transaction() {
        let mut cursor = cursor(&[start(1), node(0), node(1), commit(2), start(2), commit(3)]);
        let first = cursor.next_transaction().unwrap().unwrap();
        assert_eq!(first.tx_id(), TransactionId::new(2));
        assert_eq!(first.transaction.commands.len(), 2);
        assert_eq!(first.transaction.global_id, [1; 16]);
        let second = cursor.next_transaction().unwrap().unwrap();
        assert!(second.transaction.is_empty());
        assert_eq!(second.end_position, cursor.position());
        assert!(cursor.next_transaction().unwrap().is_none());
    }

    #[test]
    fn rolled_back_and_dangling_transactions_are_dropped() {
        let rollback = LogEntry::Rollback { global_id: [1; 16] };
        assert_eq!(
            ids(&[start(1), node(0), rollback, start(2), node(1), start(3), commit(2), start(4)]),
            vec![2]
        );
    }

    #[test]
    fn command_outside_transaction_is_corruption() {
        let mut cursor = cursor(&[node(0)]);
        assert!(matches!(
            cursor.next_transaction(),
            Err(CoreError::LogCorruption { .. })
        ));
    }

    #[test]
    fn visitor_can_stop_early() {
        let mut cursor = cursor(&[start(1), commit(2), start(2), commit(3)]);
        let mut seen = Vec::new();
        TransactionCursor::for_each(&mut cursor, |tx| {
            seen.push(tx.tx_id());
            Ok(false)
        })
        .unwrap();
        assert_eq!(seen, vec![TransactionId::new(2)]);
    }
}
