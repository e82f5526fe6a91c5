//! The meta-data store: whole-graph scalar fields, one record each.
//!
//! ```text
//! position  field
//! 0         creation time
//! 1         random number
//! 2         current log version
//! 3         last committed transaction id
//! 4         store format version
//! 5         first graph property record
//! 6         last constraint-introducing transaction id
//! ```
//!
//! Fields are cached in memory. A cached value equal to
//! [`FIELD_NOT_INITIALIZED`] is never returned: it triggers a reload of all
//! fields in one page visit.

use super::format::{pointer, raw_pointer, MetaDataFormat, RecordFormat};
use super::record_store::RecordStore;
use super::sequence::OutOfOrderSequence;
use super::{version_long_to_string, version_string_to_long, STORE_VERSION};
use crate::error::{CoreError, CoreResult};
use crate::log::LogVersionRepository;
use crate::page::{retry_until_consistent, PageCache, PageLock};
use crate::types::{current_time_millis, PropertyId, StoreId, TransactionId};
use kernstore_storage::{FileSystem, StorageBackend};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::{debug, info};

/// Cached value of a field that has not been read yet.
pub const FIELD_NOT_INITIALIZED: i64 = i64::MIN;

/// Number of fields.
pub const FIELD_COUNT: usize = 7;

const RECORD_SIZE: usize = MetaDataFormat::RECORD_SIZE;

/// Bytes taken by the full set of fields. Every field lives on page 0, so
/// the page size must be at least this large.
pub const META_BLOCK_SIZE: usize = FIELD_COUNT * RECORD_SIZE;

/// Position of a field in the meta-data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Position {
    /// Store creation time.
    CreationTime = 0,
    /// Random number chosen at creation.
    RandomNumber = 1,
    /// Current log version.
    LogVersion = 2,
    /// Last committed transaction id.
    LastTransactionId = 3,
    /// Encoded store format version.
    StoreVersion = 4,
    /// Head of the graph property chain.
    FirstGraphProperty = 5,
    /// Id of the last transaction that introduced a constraint.
    LastConstraintTransaction = 6,
}

impl Position {
    /// All positions in file order.
    pub const ALL: [Self; FIELD_COUNT] = [
        Self::CreationTime,
        Self::RandomNumber,
        Self::LogVersion,
        Self::LastTransactionId,
        Self::StoreVersion,
        Self::FirstGraphProperty,
        Self::LastConstraintTransaction,
    ];

    /// Returns the record id of this field.
    #[must_use]
    pub const fn id(self) -> u64 {
        self as u64
    }

    /// Looks up a position by record id.
    #[must_use]
    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(id).ok()?).copied()
    }

    /// Returns a human-readable field name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreationTime => "creation time",
            Self::RandomNumber => "random number",
            Self::LogVersion => "log version",
            Self::LastTransactionId => "last committed transaction",
            Self::StoreVersion => "store version",
            Self::FirstGraphProperty => "first graph property",
            Self::LastConstraintTransaction => "last constraint transaction",
        }
    }
}

/// Whole-graph fields plus transaction id bookkeeping.
///
/// `last_committing` is bumped by every committing transaction;
/// `last_closed` trails it and catches up as transactions are applied, in
/// whatever order that happens. The closed id never exceeds the committing
/// id.
pub struct MetaDataStore {
    store: RecordStore<MetaDataFormat>,
    fields: [AtomicI64; FIELD_COUNT],
    last_committing: AtomicU64,
    last_closed: OutOfOrderSequence,
}

impl MetaDataStore {
    /// Opens or creates the meta-data store at `path`.
    ///
    /// Older files are upgraded silently: a file of five records gains the
    /// graph property field, a file of six records gains the constraint
    /// field, and a missing store version is backfilled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the page size cannot hold
    /// every field, [`CoreError::StoreVersionMismatch`] if the store was not
    /// shut down cleanly and carries another version, or an I/O error.
    pub fn open(cache: &PageCache, path: &Path) -> CoreResult<Self> {
        if cache.page_size() < META_BLOCK_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "page size {} cannot hold the {META_BLOCK_SIZE} byte meta-data block",
                cache.page_size()
            )));
        }
        let store = RecordStore::<MetaDataFormat>::open(cache, path)?;
        let meta = Self {
            store,
            fields: std::array::from_fn(|_| AtomicI64::new(FIELD_NOT_INITIALIZED)),
            last_committing: AtomicU64::new(0),
            last_closed: OutOfOrderSequence::new(0),
        };

        let size = meta.store.paged_file().size();
        if size == 0 {
            meta.initialize()?;
            // A crash must not leave a log without the identity it was written for.
            meta.store.flush()?;
        }
        meta.upgrade_file_size()?;

        if meta.creation_time()? != 0 && meta.get_field(Position::StoreVersion)? == 0 {
            let version = version_string_to_long(STORE_VERSION)?;
            info!(version = STORE_VERSION, "backfilling missing store version");
            meta.set_field(Position::StoreVersion, version)?;
        }
        meta.check_version()?;

        let last = TransactionId::new(meta.get_field(Position::LastTransactionId)?.max(0) as u64);
        meta.last_committing.store(last.as_u64(), Ordering::SeqCst);
        meta.last_closed.set(last.as_u64());

        debug!(
            store_id = %meta.store_id()?,
            last_tx = %last,
            log_version = meta.current_version()?,
            "opened meta-data store"
        );
        Ok(meta)
    }

    fn initialize(&self) -> CoreResult<()> {
        let values = [
            current_time_millis() as i64,
            rand::random::<i64>(),
            0,
            TransactionId::BASE.as_u64() as i64,
            version_string_to_long(STORE_VERSION)?,
            -1,
            0,
        ];
        for (position, value) in Position::ALL.into_iter().zip(values) {
            self.set_field(position, value)?;
        }
        info!("created new meta-data store");
        Ok(())
    }

    fn upgrade_file_size(&self) -> CoreResult<()> {
        let file = self.store.paged_file();
        if file.size() == 5 * RECORD_SIZE as u64 {
            info!("adding graph property field to meta-data store");
            self.set_field(Position::FirstGraphProperty, -1)?;
        }
        if file.size() == 6 * RECORD_SIZE as u64 {
            info!("adding constraint transaction field to meta-data store");
            self.set_field(Position::LastConstraintTransaction, 0)?;
        }
        Ok(())
    }

    fn check_version(&self) -> CoreResult<()> {
        if self.store.is_clean() {
            return Ok(());
        }
        let found = self.get_field(Position::StoreVersion)?;
        let expected = version_string_to_long(STORE_VERSION)?;
        if found != expected {
            return Err(CoreError::StoreVersionMismatch {
                found: version_long_to_string(found)?,
                expected: STORE_VERSION.to_string(),
            });
        }
        Ok(())
    }

    /// Reads all fields in one page visit and caches them.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be loaded.
    pub fn scan_all_fields(&self) -> CoreResult<()> {
        let offsets = Position::ALL.map(|position| self.store.locate(position.id()).1);
        let values = retry_until_consistent(self.store.paged_file(), 0, PageLock::Shared, |cursor| {
            let mut values = [0i64; FIELD_COUNT];
            for (offset, value) in offsets.into_iter().zip(values.iter_mut()) {
                *value = if cursor.get_u8(offset) == 0 {
                    -1
                } else {
                    cursor.get_i64(offset + 1)
                };
            }
            Ok(values)
        })?;
        for (field, value) in self.fields.iter().zip(values) {
            field.store(value, Ordering::Release);
        }
        Ok(())
    }

    /// Returns a field, reloading from the page if it is not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be loaded.
    pub fn get_field(&self, position: Position) -> CoreResult<i64> {
        let field = &self.fields[position as usize];
        let cached = field.load(Ordering::Acquire);
        if cached != FIELD_NOT_INITIALIZED {
            return Ok(cached);
        }
        self.scan_all_fields()?;
        Ok(field.load(Ordering::Acquire))
    }

    /// Writes a field to its record and the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be loaded.
    pub fn set_field(&self, position: Position, value: i64) -> CoreResult<()> {
        let (page_id, offset) = self.store.locate(position.id());
        retry_until_consistent(self.store.paged_file(), page_id, PageLock::Exclusive, |cursor| {
            cursor.put_u8(offset, 1)?;
            cursor.put_i64(offset + 1, value)
        })?;
        self.fields[position as usize].store(value, Ordering::Release);
        Ok(())
    }

    /// Returns the store creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has to be reloaded and the page cannot
    /// be read. The same holds for the other field getters.
    pub fn creation_time(&self) -> CoreResult<u64> {
        Ok(self.get_field(Position::CreationTime)? as u64)
    }

    /// Returns the random number chosen at creation.
    pub fn random_number(&self) -> CoreResult<u64> {
        Ok(self.get_field(Position::RandomNumber)? as u64)
    }

    /// Returns the immutable store identity.
    pub fn store_id(&self) -> CoreResult<StoreId> {
        Ok(StoreId {
            creation_time: self.creation_time()?,
            random_id: self.random_number()?,
        })
    }

    /// Returns the encoded store version.
    pub fn store_version(&self) -> CoreResult<i64> {
        self.get_field(Position::StoreVersion)
    }

    /// Returns the head of the graph property chain.
    pub fn graph_next_prop(&self) -> CoreResult<Option<PropertyId>> {
        Ok(pointer(self.get_field(Position::FirstGraphProperty)?))
    }

    /// Sets the head of the graph property chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn set_graph_next_prop(&self, prop: Option<PropertyId>) -> CoreResult<()> {
        self.set_field(Position::FirstGraphProperty, raw_pointer(prop))
    }

    /// Returns the id of the last transaction that introduced a constraint.
    pub fn latest_constraint_introducing_tx(&self) -> CoreResult<TransactionId> {
        Ok(TransactionId::new(
            self.get_field(Position::LastConstraintTransaction)?.max(0) as u64,
        ))
    }

    /// Records the last constraint-introducing transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn set_latest_constraint_introducing_tx(&self, tx: TransactionId) -> CoreResult<()> {
        self.set_field(Position::LastConstraintTransaction, tx.as_u64() as i64)
    }

    /// Allocates the id for a transaction about to commit.
    pub fn next_committing_transaction_id(&self) -> TransactionId {
        TransactionId::new(self.last_committing.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns the id most recently handed to a committing transaction.
    #[must_use]
    pub fn last_committing_transaction_id(&self) -> TransactionId {
        TransactionId::new(self.last_committing.load(Ordering::SeqCst))
    }

    /// Returns the highest id below which every transaction is closed.
    #[must_use]
    pub fn last_committed_transaction_id(&self) -> TransactionId {
        TransactionId::new(self.last_closed.get())
    }

    /// Sets both the committing and closed id, after recovery or replay.
    pub fn set_last_committing_and_closed_transaction_id(&self, tx: TransactionId) {
        self.last_committing.store(tx.as_u64(), Ordering::SeqCst);
        self.last_closed.set(tx.as_u64());
        self.fields[Position::LastTransactionId as usize].store(tx.as_u64() as i64, Ordering::Release);
    }

    /// Reports a transaction as applied.
    pub fn transaction_closed(&self, tx: TransactionId) {
        self.last_closed.offer(tx.as_u64());
    }

    /// Returns true when no transaction is between commit and close.
    #[must_use]
    pub fn closed_transaction_id_is_on_par_with_committing_transaction_id(&self) -> bool {
        self.last_closed.get() == self.last_committing.load(Ordering::SeqCst)
    }

    /// Writes the last committed transaction id and flushes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written or flushed.
    pub fn flush(&self) -> CoreResult<()> {
        self.set_field(
            Position::LastTransactionId,
            self.last_committed_transaction_id().as_u64() as i64,
        )?;
        self.store.flush()
    }

    /// Returns whether the store is consistent.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.store.is_clean()
    }

    /// Marks the store consistent after recovery.
    pub fn mark_clean(&self) {
        self.store.mark_clean();
    }

    /// Flushes and writes the clean-shutdown trailer.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or writing the trailer fails.
    pub fn close(&self, cache: &PageCache) -> CoreResult<()> {
        self.flush()?;
        self.store.close(cache)
    }

    /// Reads one field straight from a closed file, without a page cache.
    ///
    /// Positions from [`Position::StoreVersion`] on read as `-1` when the
    /// file predates them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or an older position is
    /// missing.
    pub fn read_record(fs: &dyn FileSystem, path: &Path, position: Position) -> CoreResult<i64> {
        let backend = fs.open(path)?;
        let size = backend.size()?;
        let offset = position.id() * RECORD_SIZE as u64;
        if offset + RECORD_SIZE as u64 > size {
            if position >= Position::StoreVersion {
                return Ok(-1);
            }
            return Err(CoreError::underlying_storage(format!(
                "{} has no {} record",
                path.display(),
                position.name()
            )));
        }
        let bytes = backend.read_at(offset, RECORD_SIZE)?;
        let record = MetaDataFormat::decode(position.id(), &bytes)?;
        Ok(if record.in_use { record.value } else { -1 })
    }

    /// Writes one field straight into a closed file, returning the previous
    /// value (`-1` if there was none).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub fn set_record(
        fs: &dyn FileSystem,
        path: &Path,
        position: Position,
        value: i64,
    ) -> CoreResult<i64> {
        let present = fs.exists(path)
            && fs.file_size(path)? >= (position.id() + 1) * RECORD_SIZE as u64;
        let previous = if present {
            Self::read_record(fs, path, position)?
        } else {
            -1
        };
        let mut bytes = [0u8; RECORD_SIZE];
        MetaDataFormat::encode(
            &super::format::MetaRecord {
                id: position.id(),
                in_use: true,
                value,
            },
            &mut bytes,
        );
        let mut backend = fs.open(path)?;
        backend.write_at(position.id() * RECORD_SIZE as u64, &bytes)?;
        backend.sync()?;
        Ok(previous)
    }
}

impl LogVersionRepository for MetaDataStore {
    fn current_version(&self) -> CoreResult<u64> {
        Ok(self.get_field(Position::LogVersion)?.max(0) as u64)
    }

    fn increment_and_get_version(&self) -> CoreResult<u64> {
        let (page_id, offset) = self.store.locate(Position::LogVersion.id());
        let mut base = None;
        let next = retry_until_consistent(self.store.paged_file(), page_id, PageLock::Exclusive, |cursor| {
            let current = *base.get_or_insert_with(|| cursor.get_i64(offset + 1));
            let next = current + 1;
            cursor.put_u8(offset, 1)?;
            cursor.put_i64(offset + 1, next)?;
            Ok(next)
        })?;
        self.fields[Position::LogVersion as usize].store(next, Ordering::Release);
        Ok(next as u64)
    }
}

impl std::fmt::Debug for MetaDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaDataStore")
            .field("store_id", &self.store_id().ok())
            .field("last_committing", &self.last_committing.load(Ordering::SeqCst))
            .field("last_closed", &self.last_closed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ConflictInjector;
    use kernstore_storage::EphemeralFileSystem;
    use std::sync::Arc;

    const PATH: &str = "/db/neostore";

    fn cache(fs: &EphemeralFileSystem) -> PageCache {
        PageCache::new(Arc::new(fs.clone()), 8192)
    }

    fn open(fs: &EphemeralFileSystem) -> (PageCache, MetaDataStore) {
        let cache = cache(fs);
        let meta = MetaDataStore::open(&cache, Path::new(PATH)).unwrap();
        (cache, meta)
    }

    #[test]
    fn new_store_has_all_fields_initialized() {
        let fs = EphemeralFileSystem::new();
        let (_cache, meta) = open(&fs);
        for position in Position::ALL {
            assert_ne!(meta.get_field(position).unwrap(), FIELD_NOT_INITIALIZED);
        }
        assert_eq!(meta.last_committed_transaction_id(), TransactionId::BASE);
        assert_eq!(meta.graph_next_prop().unwrap(), None);
        assert_eq!(
            version_long_to_string(meta.store_version().unwrap()).unwrap(),
            STORE_VERSION
        );
        assert!(meta.creation_time().unwrap() > 0);
    }

    #[test]
    fn fields_survive_clean_close() {
        let fs = EphemeralFileSystem::new();
        let store_id = {
            let (cache, meta) = open(&fs);
            let tx = meta.next_committing_transaction_id();
            meta.transaction_closed(tx);
            meta.set_graph_next_prop(Some(4)).unwrap();
            meta.close(&cache).unwrap();
            meta.store_id().unwrap()
        };
        let (_cache, meta) = open(&fs);
        assert!(meta.is_clean());
        assert_eq!(meta.store_id().unwrap(), store_id);
        assert_eq!(meta.last_committed_transaction_id(), TransactionId::new(2));
        assert_eq!(meta.graph_next_prop().unwrap(), Some(4));
    }

    #[test]
    fn five_record_file_gains_graph_property_field() {
        let fs = EphemeralFileSystem::new();
        {
            let (cache, meta) = open(&fs);
            meta.close(&cache).unwrap();
        }
        // Drop the trailer and the last two records.
        fs.open(Path::new(PATH)).unwrap().truncate(5 * RECORD_SIZE as u64).unwrap();
        assert_eq!(
            MetaDataStore::read_record(&fs, Path::new(PATH), Position::FirstGraphProperty).unwrap(),
            -1
        );

        let (cache, meta) = open(&fs);
        assert_eq!(meta.get_field(Position::FirstGraphProperty).unwrap(), -1);
        assert_eq!(meta.get_field(Position::LastConstraintTransaction).unwrap(), 0);
        meta.close(&cache).unwrap();
        drop(meta);

        let (_cache, meta) = open(&fs);
        assert_eq!(meta.graph_next_prop().unwrap(), None);
        assert_eq!(
            MetaDataStore::read_record(&fs, Path::new(PATH), Position::LastConstraintTransaction)
                .unwrap(),
            0
        );
    }

    #[test]
    fn missing_store_version_is_backfilled() {
        let fs = EphemeralFileSystem::new();
        {
            let (cache, meta) = open(&fs);
            meta.set_field(Position::StoreVersion, 0).unwrap();
            meta.close(&cache).unwrap();
        }
        let (_cache, meta) = open(&fs);
        assert_eq!(
            meta.store_version().unwrap(),
            version_string_to_long(STORE_VERSION).unwrap()
        );
    }

    #[test]
    fn unclean_store_with_foreign_version_is_fatal() {
        let fs = EphemeralFileSystem::new();
        {
            let (_cache, meta) = open(&fs);
            meta.set_field(Position::StoreVersion, version_string_to_long("v0.A.0").unwrap())
                .unwrap();
            meta.flush().unwrap();
            // no close: the trailer is never written
        }
        let cache = cache(&fs);
        match MetaDataStore::open(&cache, Path::new(PATH)) {
            Err(CoreError::StoreVersionMismatch { found, expected }) => {
                assert_eq!(found, "v0.A.0");
                assert_eq!(expected, STORE_VERSION);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unclean_store_with_matching_version_opens() {
        let fs = EphemeralFileSystem::new();
        {
            let (_cache, meta) = open(&fs);
            meta.flush().unwrap();
        }
        let (_cache, meta) = open(&fs);
        assert!(!meta.is_clean());
    }

    #[test]
    fn static_set_record_returns_previous_value() {
        let fs = EphemeralFileSystem::new();
        {
            let (cache, meta) = open(&fs);
            meta.flush().unwrap();
            cache.unmap(Path::new(PATH)).unwrap();
        }
        let path = Path::new(PATH);
        let previous = MetaDataStore::set_record(&fs, path, Position::LogVersion, 12).unwrap();
        assert_eq!(previous, 0);
        assert_eq!(MetaDataStore::read_record(&fs, path, Position::LogVersion).unwrap(), 12);
    }

    #[test]
    fn static_set_record_on_short_file_reports_no_previous_value() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new(PATH);
        let mut bytes = [0u8; RECORD_SIZE];
        MetaDataFormat::encode(
            &crate::store::format::MetaRecord { id: 0, in_use: true, value: 77 },
            &mut bytes,
        );
        fs.open(path).unwrap().write_at(0, &bytes).unwrap();
        assert_eq!(MetaDataStore::set_record(&fs, path, Position::LogVersion, 5).unwrap(), -1);
        assert_eq!(MetaDataStore::read_record(&fs, path, Position::LogVersion).unwrap(), 5);
        assert_eq!(MetaDataStore::read_record(&fs, path, Position::CreationTime).unwrap(), 77);
    }

    #[test]
    fn static_set_record_surfaces_damaged_record() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new(PATH);
        let damaged = [0x7fu8; 3 * RECORD_SIZE];
        fs.open(path).unwrap().write_at(0, &damaged).unwrap();
        let err = MetaDataStore::set_record(&fs, path, Position::LogVersion, 5).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRecord { .. }));
        assert!(MetaDataStore::read_record(&fs, path, Position::LogVersion).is_err());
    }

    #[test]
    fn page_smaller_than_meta_block_is_rejected() {
        let fs = EphemeralFileSystem::new();
        let cache = PageCache::new(Arc::new(fs.clone()), 32);
        let err = MetaDataStore::open(&cache, Path::new(PATH)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn fields_fit_on_the_smallest_page() {
        let fs = EphemeralFileSystem::new();
        let cache = PageCache::new(Arc::new(fs.clone()), META_BLOCK_SIZE);
        let meta = MetaDataStore::open(&cache, Path::new(PATH)).unwrap();
        meta.set_graph_next_prop(Some(9)).unwrap();
        assert_eq!(meta.increment_and_get_version().unwrap(), 1);
        meta.close(&cache).unwrap();

        let cache = PageCache::new(Arc::new(fs), META_BLOCK_SIZE);
        let meta = MetaDataStore::open(&cache, Path::new(PATH)).unwrap();
        assert_eq!(meta.graph_next_prop().unwrap(), Some(9));
        assert_eq!(meta.current_version().unwrap(), 1);
    }

    #[test]
    fn transaction_ids_track_committing_and_closed() {
        let fs = EphemeralFileSystem::new();
        let (_cache, meta) = open(&fs);
        let a = meta.next_committing_transaction_id();
        let b = meta.next_committing_transaction_id();
        assert_eq!((a.as_u64(), b.as_u64()), (2, 3));
        assert!(!meta.closed_transaction_id_is_on_par_with_committing_transaction_id());

        meta.transaction_closed(b);
        assert_eq!(meta.last_committed_transaction_id(), TransactionId::BASE);
        meta.transaction_closed(a);
        assert_eq!(meta.last_committed_transaction_id(), b);
        assert!(meta.closed_transaction_id_is_on_par_with_committing_transaction_id());

        meta.set_last_committing_and_closed_transaction_id(TransactionId::new(10));
        assert_eq!(meta.last_committing_transaction_id().as_u64(), 10);
        assert_eq!(meta.last_committed_transaction_id().as_u64(), 10);
    }

    #[derive(Debug)]
    struct FirstAttemptConflicts;

    impl ConflictInjector for FirstAttemptConflicts {
        fn should_conflict(&self, _page_id: u64, attempt: u32) -> bool {
            attempt == 0
        }
    }

    #[test]
    fn increment_version_is_not_doubled_by_a_retry() {
        let fs = EphemeralFileSystem::new();
        let cache = PageCache::new(Arc::new(fs.clone()), 8192)
            .with_conflict_injector(Some(Arc::new(FirstAttemptConflicts)));
        let meta = MetaDataStore::open(&cache, Path::new(PATH)).unwrap();
        assert_eq!(meta.current_version().unwrap(), 0);
        assert_eq!(meta.increment_and_get_version().unwrap(), 1);
        assert_eq!(meta.increment_and_get_version().unwrap(), 2);
        meta.scan_all_fields().unwrap();
        assert_eq!(meta.current_version().unwrap(), 2);
    }
}
