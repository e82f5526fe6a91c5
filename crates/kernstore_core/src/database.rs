//! Database facade: open, recover, transact, close.

use crate::command::TransactionRepresentation;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{ConfigStoreIndexCreator, IndexConfigStore, IndexProviders, LegacyIndexStore};
use crate::log::{CommittedTransaction, LogFiles, TransactionCursor, TransactionLog};
use crate::page::PageCache;
use crate::recovery::{Recovery, RecoveryReport};
use crate::store::NeoStores;
use crate::transaction::{CommitProcess, KernelTransaction};
use crate::types::{LogPosition, TransactionId};
use kernstore_storage::{DefaultFileSystem, FileSystem, StorageError, StoreLock};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// The main database handle.
///
/// Owns the store directory lock, the page cache, the record stores, the
/// transaction log and the legacy index configuration.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use kernstore_core::{Config, Database};
/// use std::path::Path;
///
/// let db = Database::open_with_config(Path::new("graph.db"), Config::default())?;
/// let tx_id = db.transaction(|tx| {
///     let node = tx.create_node()?;
///     tx.set_node_property(node, 1, 42)
/// })?;
/// db.close()?;
/// ```
///
/// If the previous process did not shut down cleanly, opening replays the
/// transaction log before the database becomes usable.
pub struct Database {
    config: Config,
    dir: PathBuf,
    cache: PageCache,
    stores: NeoStores,
    log_files: LogFiles,
    commit_process: CommitProcess,
    indexes: LegacyIndexStore,
    recovery: Option<RecoveryReport>,
    is_open: RwLock<bool>,
    _lock: StoreLock,
}

impl Database {
    /// Opens a database on disk with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`open_with_fs`](Self::open_with_fs).
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database on disk.
    ///
    /// # Errors
    ///
    /// See [`open_with_fs`](Self::open_with_fs).
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        Self::open_with_fs(Arc::new(DefaultFileSystem), path, config)
    }

    /// Opens a database in `dir` of the given file system.
    ///
    /// The directory is locked for the lifetime of the handle. A store that
    /// was not shut down cleanly is recovered from its log first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseLocked`] if another handle holds the
    /// directory, [`CoreError::InvalidArgument`] if there is no store and
    /// `create_if_missing` is off, and any store, log or recovery error.
    pub fn open_with_fs(fs: Arc<dyn FileSystem>, dir: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        if !NeoStores::exists(fs.as_ref(), dir) {
            if !config.create_if_missing {
                return Err(CoreError::invalid_argument(format!(
                    "no database in {} and create_if_missing is false",
                    dir.display()
                )));
            }
            fs.mkdirs(dir)?;
        }
        let lock = fs.lock_exclusive(dir).map_err(|err| match err {
            StorageError::Locked(_) => CoreError::DatabaseLocked,
            other => CoreError::from(other),
        })?;

        let cache = PageCache::new(Arc::clone(&fs), config.page_size)
            .with_conflict_injector(config.conflict_injector.clone());
        let stores = NeoStores::open(&cache, dir)?;
        let log_files = LogFiles::new(Arc::clone(&fs), dir);

        let recovery = if stores.is_clean() {
            None
        } else {
            warn!(dir = %dir.display(), "store was not shut down cleanly");
            Some(Recovery::new(&stores, &log_files, config.read_ahead_size).run()?)
        };

        let log = TransactionLog::open(
            log_files.clone(),
            &stores.meta,
            stores.meta.store_id()?,
            stores.meta.last_committed_transaction_id(),
            config.log_rotation_threshold,
            config.sync_on_commit,
            config.read_ahead_size,
        )?;
        let commit_process = CommitProcess::new(log, config.master_id, config.local_id);

        let index_store = Arc::new(IndexConfigStore::open(Arc::clone(&fs), dir)?);
        let indexes = LegacyIndexStore::new(
            Arc::clone(&index_store),
            config.clone(),
            IndexProviders::new(),
            Arc::new(ConfigStoreIndexCreator::new(index_store)),
        );

        info!(
            dir = %dir.display(),
            last_committed = %stores.meta.last_committed_transaction_id(),
            recovered = recovery.is_some(),
            "database opened"
        );
        Ok(Self {
            config,
            dir: dir.to_path_buf(),
            cache,
            stores,
            log_files,
            commit_process,
            indexes,
            recovery,
            is_open: RwLock::new(true),
            _lock: lock,
        })
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] after [`close`](Self::close).
    pub fn begin(&self) -> CoreResult<KernelTransaction<'_>> {
        self.ensure_open()?;
        Ok(KernelTransaction::new(&self.stores, &self.commit_process))
    }

    /// Runs `f` in a transaction and commits it if `f` succeeds.
    ///
    /// Returns the committed id, or `None` if `f` changed nothing.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` (after rolling back) or of the commit.
    pub fn transaction<F>(&self, f: F) -> CoreResult<Option<TransactionId>>
    where
        F: FnOnce(&mut KernelTransaction<'_>) -> CoreResult<()>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(()) => tx.commit(),
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Appends and applies a transaction committed on another instance.
    ///
    /// `tx_id` must directly follow the last committed id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an out-of-sequence id and
    /// [`CoreError::TransactionFailure`] if appending or applying fails.
    pub fn apply_committed_transaction(
        &self,
        tx: &TransactionRepresentation,
        tx_id: TransactionId,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        self.commit_process.apply_committed(&self.stores, tx, tx_id)
    }

    /// Returns every committed transaction in the log with an id above
    /// `tx_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn committed_transactions_since(
        &self,
        tx_id: TransactionId,
    ) -> CoreResult<Vec<CommittedTransaction>> {
        self.ensure_open()?;
        self.commit_process.force()?;
        let mut found = Vec::new();
        if let Some(lowest) = self.log_files.lowest_version()? {
            TransactionCursor::for_each(
                &mut TransactionCursor::open(&self.log_files, lowest, self.config.read_ahead_size)?,
                |tx| {
                    if tx.tx_id() > tx_id {
                        found.push(tx);
                    }
                    Ok(true)
                },
            )?;
        }
        Ok(found)
    }

    /// Flushes the record stores and forces the log.
    ///
    /// # Errors
    ///
    /// Returns the first flush error.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let position = self.commit_process.checkpoint(&self.stores)?;
        info!(
            last_committed = %self.stores.meta.last_committed_transaction_id(),
            %position,
            "checkpoint"
        );
        Ok(())
    }

    /// Starts a new log version, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be rotated.
    pub fn rotate_log(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        self.commit_process.rotate(&self.stores)
    }

    /// Returns the legacy index configuration.
    #[must_use]
    pub fn indexes(&self) -> &LegacyIndexStore {
        &self.indexes
    }

    /// Returns the record stores.
    #[must_use]
    pub fn stores(&self) -> &NeoStores {
        &self.stores
    }

    /// Returns the id of the last committed transaction.
    #[must_use]
    pub fn last_committed_transaction_id(&self) -> TransactionId {
        self.stores.meta.last_committed_transaction_id()
    }

    /// Returns the position the next log entry will be written at.
    #[must_use]
    pub fn log_position(&self) -> LogPosition {
        self.commit_process.log_position()
    }

    /// Returns the outcome of recovery, if this open had to recover.
    #[must_use]
    pub fn recovery(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shuts down: forces the log and closes the stores cleanly.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first sync or close error. The stores then count as not
    /// cleanly shut down and the next open recovers them.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        self.commit_process.shut_down()?;
        if !self.commit_process.is_healthy() {
            warn!(dir = %self.dir.display(), "closing after a failed commit; leaving stores for recovery");
            return Ok(());
        }
        self.stores.close(&self.cache)?;
        info!(dir = %self.dir.display(), "database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.dir)
            .field("is_open", &self.is_open())
            .field("last_committed", &self.last_committed_transaction_id())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(dir = %self.dir.display(), %err, "close on drop failed");
        }
    }
}
