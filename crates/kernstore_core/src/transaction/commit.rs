//! Commit process: id allocation, logging and application.

use crate::apply::{StoreApplier, TransactionApplier};
use crate::command::{Command, TransactionRepresentation};
use crate::error::{CoreError, CoreResult};
use crate::log::TransactionLog;
use crate::store::NeoStores;
use crate::types::{LogPosition, TransactionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

/// Serializes commits through the transaction log.
///
/// A commit holds the log lock while it prepares, allocates its id,
/// appends and applies, so the next transaction prepares against the
/// records this one wrote. It closes its id after releasing the lock.
///
/// A failure after the id was allocated leaves a gap the closed sequence
/// can never fill, so the process turns unhealthy and refuses further
/// commits until the database is reopened and recovered.
pub struct CommitProcess {
    log: Mutex<TransactionLog>,
    master_id: i32,
    local_id: i32,
    open: AtomicBool,
    healthy: AtomicBool,
}

impl CommitProcess {
    /// Creates a commit process writing to `log`.
    #[must_use]
    pub fn new(log: TransactionLog, master_id: i32, local_id: i32) -> Self {
        Self {
            log: Mutex::new(log),
            master_id,
            local_id,
            open: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
        }
    }

    /// Returns false after a commit failed past id allocation.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self) -> CoreResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CoreError::DatabaseClosed);
        }
        if !self.is_healthy() {
            return Err(CoreError::transaction_failure(
                "an earlier commit failed; reopen the database to recover",
            ));
        }
        Ok(())
    }

    fn poison(&self, tx_id: TransactionId, stage: &str, err: &CoreError) -> CoreError {
        self.healthy.store(false, Ordering::SeqCst);
        error!(%tx_id, stage, error = %err, "commit failed");
        CoreError::transaction_failure(format!("could not {stage} {tx_id}: {err}"))
    }

    /// Commits the commands produced by `prepare`.
    ///
    /// Returns `None` without touching the log when `prepare` yields no
    /// commands.
    ///
    /// # Errors
    ///
    /// Returns the error of `prepare` unchanged, or a transaction failure
    /// if appending or applying fails.
    pub fn commit<P>(
        &self,
        stores: &NeoStores,
        last_committed_when_started: TransactionId,
        prepare: P,
    ) -> CoreResult<Option<TransactionId>>
    where
        P: FnOnce(&NeoStores) -> CoreResult<Vec<Command>>,
    {
        let mut log = self.log.lock();
        self.ensure_usable()?;
        let commands = prepare(stores)?;
        if commands.is_empty() {
            return Ok(None);
        }
        let tx = TransactionRepresentation::new(commands, last_committed_when_started)
            .with_instance_ids(self.master_id, self.local_id);
        let tx_id = stores.meta.next_committing_transaction_id();
        self.append_and_apply(&mut log, stores, &tx, tx_id)?;
        drop(log);
        stores.meta.transaction_closed(tx_id);
        Ok(Some(tx_id))
    }

    /// Appends and applies a transaction committed elsewhere under
    /// `tx_id`, which must directly follow the last committing id.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error for an out-of-sequence id and a
    /// transaction failure if appending or applying fails.
    pub fn apply_committed(
        &self,
        stores: &NeoStores,
        tx: &TransactionRepresentation,
        tx_id: TransactionId,
    ) -> CoreResult<()> {
        let mut log = self.log.lock();
        self.ensure_usable()?;
        let expected = stores.meta.last_committing_transaction_id().next();
        if tx_id != expected {
            return Err(CoreError::invalid_argument(format!(
                "received {tx_id} but the next transaction is {expected}"
            )));
        }
        let allocated = stores.meta.next_committing_transaction_id();
        debug_assert_eq!(allocated, tx_id);
        self.append_and_apply(&mut log, stores, tx, tx_id)?;
        drop(log);
        stores.meta.transaction_closed(tx_id);
        Ok(())
    }

    fn append_and_apply(
        &self,
        log: &mut TransactionLog,
        stores: &NeoStores,
        tx: &TransactionRepresentation,
        tx_id: TransactionId,
    ) -> CoreResult<()> {
        let end = log
            .append(tx, tx_id)
            .map_err(|err| self.poison(tx_id, "append", &err))?;
        StoreApplier::new(stores)
            .apply(tx, tx_id, false)
            .map_err(|err| self.poison(tx_id, "apply", &err))?;
        debug!(%tx_id, commands = tx.commands.len(), %end, "committed transaction");
        if let Err(err) = log.rotate_if_needed(&stores.meta, tx_id) {
            // The transaction itself is durable and applied.
            self.healthy.store(false, Ordering::SeqCst);
            error!(%tx_id, error = %err, "log rotation failed after commit");
        }
        Ok(())
    }

    /// Returns the position the next entry will be written at.
    #[must_use]
    pub fn log_position(&self) -> LogPosition {
        self.log.lock().position()
    }

    /// Forces the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn force(&self) -> CoreResult<()> {
        self.log.lock().force()
    }

    /// Forces the log and flushes every store while holding the log lock,
    /// so no commit can apply between the data and meta-data flushes.
    /// Returns the log position the checkpoint covers.
    ///
    /// # Errors
    ///
    /// Returns the first sync or flush error.
    pub fn checkpoint(&self, stores: &NeoStores) -> CoreResult<LogPosition> {
        let mut log = self.log.lock();
        log.force()?;
        stores.flush()?;
        Ok(log.position())
    }

    /// Forces the log and starts a new log version.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be rotated.
    pub fn rotate(&self, stores: &NeoStores) -> CoreResult<u64> {
        let mut log = self.log.lock();
        log.rotate(&stores.meta, stores.meta.last_committing_transaction_id())
    }

    /// Forces the log and refuses every further commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn shut_down(&self) -> CoreResult<()> {
        let mut log = self.log.lock();
        self.open.store(false, Ordering::SeqCst);
        log.force()
    }
}

impl std::fmt::Debug for CommitProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitProcess")
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{log_entries, LogEntry, LogFiles};
    use crate::page::PageCache;
    use crate::store::NodeRecord;
    use kernstore_storage::{EphemeralFileSystem, FileSystem};
    use std::path::Path;
    use std::sync::Arc;

    struct Fixture {
        fs: EphemeralFileSystem,
        _cache: PageCache,
        stores: NeoStores,
        commit: CommitProcess,
        files: LogFiles,
    }

    fn fixture(rotation_threshold: u64) -> Fixture {
        let fs = EphemeralFileSystem::new();
        let cache = PageCache::new(Arc::new(fs.clone()), 8192);
        let stores = NeoStores::open(&cache, Path::new("/db")).unwrap();
        let files = LogFiles::new(Arc::new(fs.clone()), "/db");
        let log = TransactionLog::open(
            files.clone(),
            &stores.meta,
            stores.meta.store_id().unwrap(),
            stores.meta.last_committed_transaction_id(),
            rotation_threshold,
            true,
            4096,
        )
        .unwrap();
        Fixture {
            fs,
            _cache: cache,
            stores,
            commit: CommitProcess::new(log, 1, 2),
            files,
        }
    }

    fn node(id: u64) -> CoreResult<Vec<Command>> {
        Ok(vec![Command::Node(NodeRecord::new(id))])
    }

    #[test]
    fn commits_get_consecutive_ids_and_are_logged() {
        let f = fixture(1 << 20);
        let first = f.commit.commit(&f.stores, TransactionId::BASE, |_| node(0)).unwrap();
        let second = f.commit.commit(&f.stores, TransactionId::BASE, |_| node(1)).unwrap();
        assert_eq!(first, Some(TransactionId::new(2)));
        assert_eq!(second, Some(TransactionId::new(3)));
        assert_eq!(f.stores.meta.last_committed_transaction_id(), TransactionId::new(3));
        assert!(f.stores.meta.closed_transaction_id_is_on_par_with_committing_transaction_id());
        assert!(f.stores.nodes.get_in_use(1).unwrap().is_some());

        let entries = log_entries(Arc::new(f.fs.clone()), &f.files.version_file(0)).unwrap();
        let starts: Vec<_> = entries
            .iter()
            .filter_map(|(_, entry)| match entry {
                LogEntry::Start(start) => Some((start.master_id, start.local_id)),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![(1, 2), (1, 2)]);
    }

    #[test]
    fn failed_prepare_writes_nothing() {
        let f = fixture(1 << 20);
        let before = f.commit.log_position();
        let result = f.commit.commit(&f.stores, TransactionId::BASE, |_| {
            Err(CoreError::invalid_record("no"))
        });
        assert!(matches!(result, Err(CoreError::InvalidRecord { .. })));
        assert_eq!(f.commit.log_position(), before);
        assert_eq!(f.stores.meta.last_committing_transaction_id(), TransactionId::BASE);
        assert!(f.commit.is_healthy());
        assert_eq!(f.commit.commit(&f.stores, TransactionId::BASE, |_| Ok(Vec::new())).unwrap(), None);
    }

    #[test]
    fn external_transactions_must_be_in_sequence() {
        let f = fixture(1 << 20);
        let tx = TransactionRepresentation::new(node(0).unwrap(), TransactionId::BASE);
        assert!(matches!(
            f.commit.apply_committed(&f.stores, &tx, TransactionId::new(5)),
            Err(CoreError::InvalidArgument { .. })
        ));
        f.commit.apply_committed(&f.stores, &tx, TransactionId::new(2)).unwrap();
        assert_eq!(f.stores.meta.last_committed_transaction_id(), TransactionId::new(2));
    }

    #[test]
    fn log_rotates_past_the_threshold() {
        let f = fixture(64);
        f.commit.commit(&f.stores, TransactionId::BASE, |_| node(0)).unwrap();
        assert!(f.files.exists(1));
        assert_eq!(f.commit.log_position().version, 1);
        assert!(f.fs.exists(&f.files.version_file(0)));
    }

    #[test]
    fn closed_process_refuses_commits() {
        let f = fixture(1 << 20);
        f.commit.shut_down().unwrap();
        assert!(matches!(
            f.commit.commit(&f.stores, TransactionId::BASE, |_| node(0)),
            Err(CoreError::DatabaseClosed)
        ));
    }
}
