//! Recovery by log replay.
//!
//! After an unclean shutdown the record stores hold some prefix of the
//! committed transactions, possibly with later pages already flushed.
//! Every command carries a full after-image, so replaying each committed
//! transaction above the store's last committed id, in log order, brings
//! the stores to the state of the last complete transaction in the log.

use crate::apply::{StoreApplier, TransactionApplier};
use crate::error::CoreResult;
use crate::log::{LogEntry, LogEntryReader, LogFiles, LogVersionRepository, TransactionCursor};
use crate::store::{NeoStores, Position};
use crate::types::{LogPosition, TransactionId};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a recovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transactions applied.
    pub recovered: u64,
    /// Committed transactions already reflected in the stores.
    pub skipped: u64,
    /// Last committed transaction after recovery.
    pub last_committed: TransactionId,
    /// Position just past the last transaction read, if any.
    pub end_position: Option<LogPosition>,
}

/// Replays the log into a set of stores.
#[derive(Debug)]
pub struct Recovery<'a> {
    stores: &'a NeoStores,
    log_files: &'a LogFiles,
    read_ahead: usize,
}

impl<'a> Recovery<'a> {
    /// Creates a recovery of `stores` from `log_files`.
    #[must_use]
    pub const fn new(stores: &'a NeoStores, log_files: &'a LogFiles, read_ahead: usize) -> Self {
        Self {
            stores,
            log_files,
            read_ahead,
        }
    }

    /// Replays every committed transaction newer than the stores, then
    /// rebuilds id generators, flushes and marks the stores clean.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupt or a record cannot be
    /// written. The stores stay unclean in that case.
    pub fn run(&self) -> CoreResult<RecoveryReport> {
        let started = Instant::now();
        let stores = self.stores;
        let from = stores.meta.last_committed_transaction_id();
        info!(dir = %stores.dir().display(), %from, "starting recovery");

        let mut report = RecoveryReport {
            recovered: 0,
            skipped: 0,
            last_committed: from,
            end_position: None,
        };

        if let Some(lowest) = self.log_files.lowest_version()? {
            let applier = StoreApplier::new(stores);
            let mut cursor = TransactionCursor::open(self.log_files, lowest, self.read_ahead)?;
            TransactionCursor::for_each(&mut cursor, |tx| {
                let tx_id = tx.tx_id();
                report.end_position = Some(tx.end_position);
                if tx_id <= report.last_committed {
                    report.skipped += 1;
                    return Ok(true);
                }
                if tx_id != report.last_committed.next() {
                    warn!(%tx_id, expected = %report.last_committed.next(), "gap in transaction ids");
                }
                applier.apply(&tx.transaction, tx_id, true)?;
                report.recovered += 1;
                report.last_committed = tx_id;
                Ok(true)
            })?;
            self.reconcile_log_version()?;
        }

        stores
            .meta
            .set_last_committing_and_closed_transaction_id(report.last_committed);
        stores.rebuild_ids()?;
        stores.flush()?;
        stores.mark_clean();
        info!(
            recovered = report.recovered,
            skipped = report.skipped,
            last_committed = %report.last_committed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recovery finished"
        );
        Ok(report)
    }

    /// A crash between creating a rotated file and persisting the version
    /// leaves the meta-data store behind the newest file.
    fn reconcile_log_version(&self) -> CoreResult<()> {
        let meta = &self.stores.meta;
        if let Some(highest) = self.log_files.highest_version()? {
            let current = meta.current_version()?;
            if highest > current {
                debug!(from = current, to = highest, "advancing log version");
                meta.set_field(Position::LogVersion, highest as i64)?;
            }
        }
        Ok(())
    }
}

/// Returns the id of the last transaction committed in the file of
/// `version`, or the last committed id from its header if it holds none.
///
/// This only reads the log.
///
/// # Errors
///
/// Returns an error if the file is missing or corrupt.
pub fn find_last_transaction_id(
    log_files: &LogFiles,
    version: u64,
    read_ahead: usize,
) -> CoreResult<TransactionId> {
    let mut reader = LogEntryReader::open_single(log_files, version, read_ahead)?;
    let mut last = reader.channel().header().last_committed_tx;
    while let Some((_, entry)) = reader.read_entry()? {
        if let LogEntry::OnePhaseCommit(commit) = entry {
            last = last.max(commit.tx_id);
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::TransactionLog;
    use crate::page::PageCache;
    use crate::transaction::{CommitProcess, KernelTransaction};
    use kernstore_storage::{EphemeralFileSystem, FileSystem};
    use std::path::Path;
    use std::sync::Arc;

    fn open(fs: &EphemeralFileSystem) -> (PageCache, NeoStores, LogFiles) {
        let cache = PageCache::new(Arc::new(fs.clone()), 8192);
        let stores = NeoStores::open(&cache, Path::new("/db")).unwrap();
        let files = LogFiles::new(Arc::new(fs.clone()), "/db");
        (cache, stores, files)
    }

    fn commit_nodes(stores: &NeoStores, files: &LogFiles, count: usize, threshold: u64) {
        let log = TransactionLog::open(
            files.clone(),
            &stores.meta,
            stores.meta.store_id().unwrap(),
            stores.meta.last_committed_transaction_id(),
            threshold,
            true,
            4096,
        )
        .unwrap();
        let commit = CommitProcess::new(log, -1, -1);
        for value in 0..count {
            let mut tx = KernelTransaction::new(stores, &commit);
            let node = tx.create_node().unwrap();
            tx.set_node_property(node, 1, value as i64).unwrap();
            tx.commit().unwrap();
        }
    }

    #[test]
    fn replays_transactions_missing_from_the_stores() {
        let fs = EphemeralFileSystem::new();
        let crashed = {
            let (_cache, stores, files) = open(&fs);
            commit_nodes(&stores, &files, 3, 1 << 20);
            // nothing flushed: the crash image only has the log
            fs.snapshot()
        };

        let (_cache, stores, files) = open(&crashed);
        assert!(!stores.is_clean());
        let report = Recovery::new(&stores, &files, 4096).run().unwrap();
        assert_eq!(report.recovered, 3);
        assert_eq!(report.last_committed, TransactionId::new(4));
        assert!(stores.is_clean());
        assert_eq!(stores.nodes.high_id(), 3);
        assert!(stores.meta.closed_transaction_id_is_on_par_with_committing_transaction_id());
    }

    #[test]
    fn transactions_already_in_the_stores_are_skipped() {
        let fs = EphemeralFileSystem::new();
        let crashed = {
            let (_cache, stores, files) = open(&fs);
            commit_nodes(&stores, &files, 2, 1 << 20);
            stores.flush().unwrap();
            commit_nodes(&stores, &files, 1, 1 << 20);
            fs.snapshot()
        };

        let (_cache, stores, files) = open(&crashed);
        let report = Recovery::new(&stores, &files, 4096).run().unwrap();
        assert_eq!((report.skipped, report.recovered), (2, 1));
        assert_eq!(stores.meta.last_committed_transaction_id(), TransactionId::new(4));
    }

    #[test]
    fn log_version_catches_up_with_rotated_files() {
        let fs = EphemeralFileSystem::new();
        let crashed = {
            let (_cache, stores, files) = open(&fs);
            commit_nodes(&stores, &files, 3, 64);
            fs.snapshot()
        };
        let (_cache, stores, files) = open(&crashed);
        assert!(files.highest_version().unwrap() > Some(stores.meta.current_version().unwrap()));
        Recovery::new(&stores, &files, 4096).run().unwrap();
        assert_eq!(Some(stores.meta.current_version().unwrap()), files.highest_version().unwrap());
        assert_eq!(stores.meta.last_committed_transaction_id(), TransactionId::new(4));
    }

    #[test]
    fn recovery_without_logs_only_marks_clean() {
        let fs = EphemeralFileSystem::new();
        let (_cache, stores, files) = open(&fs);
        let report = Recovery::new(&stores, &files, 4096).run().unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.end_position, None);
        assert!(!fs.exists(&files.version_file(0)));
    }

    #[test]
    fn last_transaction_id_of_a_file() {
        let fs = EphemeralFileSystem::new();
        let (_cache, stores, files) = open(&fs);
        commit_nodes(&stores, &files, 3, 64);
        assert_eq!(
            find_last_transaction_id(&files, 0, 4096).unwrap(),
            TransactionId::new(2)
        );
        let highest = files.highest_version().unwrap().unwrap();
        // the newest file holds no transactions yet, only its header
        assert_eq!(
            find_last_transaction_id(&files, highest, 4096).unwrap(),
            TransactionId::new(4)
        );
    }
}
