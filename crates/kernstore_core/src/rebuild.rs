//! Rebuilding a store from nothing but its transaction logs.

use crate::apply::{StoreApplier, TransactionApplier};
use crate::consistency::{ConsistencyChecker, ConsistencyReport};
use crate::error::{CoreError, CoreResult};
use crate::log::{LogFiles, TransactionCursor};
use crate::page::PageCache;
use crate::recovery::find_last_transaction_id;
use crate::store::NeoStores;
use crate::types::TransactionId;
use kernstore_storage::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Usage line of the rebuild tool.
pub const USAGE: &str = "rebuild-from-logs [--full] <source dir with logs> <target dir for graphdb>";

/// Validated arguments of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildArgs {
    /// Directory holding the log files.
    pub source: PathBuf,
    /// Directory the new store is created in.
    pub target: PathBuf,
    /// Whether to run the consistency checker afterwards.
    pub full_check: bool,
}

impl RebuildArgs {
    /// Parses `[--full] <source> <target>` and validates both directories.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] with a message suitable for
    /// printing next to [`USAGE`].
    pub fn parse<S: AsRef<str>>(fs: &dyn FileSystem, args: &[S]) -> CoreResult<Self> {
        let mut full_check = false;
        let mut paths = Vec::new();
        for arg in args {
            match arg.as_ref() {
                "--full" => full_check = true,
                other => paths.push(PathBuf::from(other)),
            }
        }
        let [source, target]: [PathBuf; 2] = paths.try_into().map_err(|paths: Vec<PathBuf>| {
            CoreError::invalid_argument(format!("expected 2 directories, got {}", paths.len()))
        })?;
        let parsed = Self {
            source,
            target,
            full_check,
        };
        parsed.validate(fs)?;
        Ok(parsed)
    }

    /// Checks that the source is a directory and the target is absent or
    /// an empty directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] describing the first problem.
    pub fn validate(&self, fs: &dyn FileSystem) -> CoreResult<()> {
        if !fs.is_directory(&self.source) {
            return Err(CoreError::invalid_argument(format!(
                "{} is not a directory",
                self.source.display()
            )));
        }
        if !fs.exists(&self.target) {
            return Ok(());
        }
        if !fs.is_directory(&self.target) {
            return Err(CoreError::invalid_argument(format!(
                "{} is a file",
                self.target.display()
            )));
        }
        if NeoStores::exists(fs, &self.target) {
            return Err(CoreError::invalid_argument(format!(
                "target graph database already exists in {}",
                self.target.display()
            )));
        }
        if !fs.list_files(&self.target)?.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "{} is not empty",
                self.target.display()
            )));
        }
        Ok(())
    }
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Highest log version found in the source.
    pub highest_version: u64,
    /// Last transaction id in that log file.
    pub last_transaction_id: TransactionId,
    /// Transactions applied to the new store.
    pub applied: u64,
    /// Result of the consistency check, if one was requested.
    pub consistency: Option<ConsistencyReport>,
}

/// Creates a store in `args.target` from the logs in `args.source`.
///
/// Nothing is created until the highest log version and its last
/// transaction id are known. If replay fails after that, the files written
/// to the target are removed again.
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] if the source holds no logs, or
/// the first log, store or check error.
pub fn rebuild_from_logs(
    fs: Arc<dyn FileSystem>,
    args: &RebuildArgs,
    page_size: usize,
    read_ahead: usize,
) -> CoreResult<RebuildReport> {
    let started = Instant::now();
    let log_files = LogFiles::new(Arc::clone(&fs), &args.source);
    let highest_version = log_files.highest_version()?.ok_or_else(|| {
        CoreError::invalid_argument(format!("no log files in {}", args.source.display()))
    })?;
    let last_transaction_id = find_last_transaction_id(&log_files, highest_version, read_ahead)?;
    info!(
        source = %args.source.display(),
        target = %args.target.display(),
        highest_version,
        %last_transaction_id,
        "rebuilding store from logs"
    );

    fs.mkdirs(&args.target)?;
    let cache = PageCache::new(Arc::clone(&fs), page_size);
    let result = NeoStores::open(&cache, &args.target).and_then(|stores| {
        let outcome = replay(&stores, &log_files, read_ahead, args.full_check);
        let closed = stores.close(&cache);
        let (applied, consistency) = outcome?;
        closed?;
        Ok((applied, consistency))
    });

    match result {
        Ok((applied, consistency)) => {
            info!(applied, elapsed_ms = started.elapsed().as_millis() as u64, "rebuild finished");
            Ok(RebuildReport {
                highest_version,
                last_transaction_id,
                applied,
                consistency,
            })
        }
        Err(err) => {
            discard_target(fs.as_ref(), &args.target);
            Err(err)
        }
    }
}

fn replay(
    stores: &NeoStores,
    log_files: &LogFiles,
    read_ahead: usize,
    full_check: bool,
) -> CoreResult<(u64, Option<ConsistencyReport>)> {
    let mut applied = 0;
    let mut last = stores.meta.last_committed_transaction_id();
    if let Some(lowest) = log_files.lowest_version()? {
        let applier = StoreApplier::new(stores);
        TransactionCursor::for_each(&mut TransactionCursor::open(log_files, lowest, read_ahead)?, |tx| {
            applier.apply(&tx.transaction, tx.tx_id(), true)?;
            last = last.max(tx.tx_id());
            applied += 1;
            Ok(true)
        })?;
    }
    stores.meta.set_last_committing_and_closed_transaction_id(last);
    stores.rebuild_ids()?;
    stores.flush()?;

    let consistency = if full_check {
        Some(ConsistencyChecker::new(stores).check()?)
    } else {
        None
    };
    Ok((applied, consistency))
}

fn discard_target(fs: &dyn FileSystem, target: &Path) {
    match fs.list_files(target) {
        Ok(files) => {
            for file in files {
                if let Err(err) = fs.delete(&file) {
                    warn!(file = %file.display(), %err, "could not remove partial store file");
                }
            }
        }
        Err(err) => warn!(target = %target.display(), %err, "could not list partial store"),
    }
}
