//! Generic fixed-size record store.

use super::file::StoreFile;
use super::format::RecordFormat;
use super::id::IdGenerator;
use crate::error::{CoreError, CoreResult};
use crate::page::{retry_until_consistent, PageCache, PageLock, PagedFile};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Store of fixed-size records of one [`RecordFormat`].
///
/// Records never straddle a page: a page holds
/// `page_size / F::RECORD_SIZE` records and the remainder is unused.
pub struct RecordStore<F: RecordFormat> {
    file: Arc<PagedFile>,
    store_file: StoreFile,
    ids: IdGenerator,
    records_per_page: u64,
    _format: PhantomData<F>,
}

impl<F: RecordFormat> RecordStore<F> {
    /// Opens the store at `path`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the page size cannot hold a record, the trailer
    /// names another version, or the file cannot be read.
    pub fn open(cache: &PageCache, path: &Path) -> CoreResult<Self> {
        let records_per_page = (cache.page_size() / F::RECORD_SIZE) as u64;
        if records_per_page == 0 {
            return Err(CoreError::invalid_argument(format!(
                "page size {} cannot hold a {} record of {} bytes",
                cache.page_size(),
                F::TYPE_DESCRIPTOR,
                F::RECORD_SIZE
            )));
        }

        let store_file = StoreFile::open(cache.file_system().as_ref(), path, F::TYPE_DESCRIPTOR)?;
        let file = cache.map(path)?;
        let mut store = Self {
            file,
            store_file,
            ids: IdGenerator::default(),
            records_per_page,
            _format: PhantomData,
        };
        store.ids = store.rebuild_id_generator()?;
        debug!(
            store = F::TYPE_DESCRIPTOR,
            high_id = store.ids.high_id(),
            free = store.ids.free_count(),
            "opened record store"
        );
        Ok(store)
    }

    /// Maps a record id to its page and byte offset within that page.
    pub(crate) fn locate(&self, id: u64) -> (u64, usize) {
        let page_id = id / self.records_per_page;
        let slot = (id % self.records_per_page) as usize;
        (page_id, slot * F::RECORD_SIZE)
    }

    fn records_in_file(&self) -> u64 {
        let page_size = self.file.page_size() as u64;
        let size = self.file.size();
        let full_pages = size / page_size;
        let tail = (size % page_size) / F::RECORD_SIZE as u64;
        full_pages * self.records_per_page + tail.min(self.records_per_page)
    }

    fn rebuild_id_generator(&self) -> CoreResult<IdGenerator> {
        let count = self.records_in_file();
        let mut high_id = 0;
        let mut free = BTreeSet::new();
        let mut id = 0;
        while id < count {
            let (page_id, _) = self.locate(id);
            let last = ((page_id + 1) * self.records_per_page).min(count);
            let flags = retry_until_consistent(&self.file, page_id, PageLock::Shared, |cursor| {
                Ok((id..last)
                    .map(|record| cursor.get_u8(self.locate(record).1))
                    .collect::<Vec<_>>())
            })?;
            for (offset, flag) in flags.into_iter().enumerate() {
                let record = id + offset as u64;
                if flag == 0 {
                    free.insert(record);
                } else {
                    high_id = record + 1;
                }
            }
            id = last;
        }
        free.retain(|record| *record < high_id);
        Ok(IdGenerator::new(high_id, free))
    }

    /// Rebuilds the id generator from the in-use flags, after recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the pages cannot be read.
    pub fn rebuild_ids(&self) -> CoreResult<()> {
        self.ids.reset_from(self.rebuild_id_generator()?);
        Ok(())
    }

    /// Reads the record at `id`. Ids past the end read as unused records.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be loaded or the bytes are invalid.
    pub fn get_record(&self, id: u64) -> CoreResult<F::Record> {
        let (page_id, offset) = self.locate(id);
        let mut bytes = vec![0u8; F::RECORD_SIZE];
        retry_until_consistent(&self.file, page_id, PageLock::Shared, |cursor| {
            cursor.get_bytes(offset, &mut bytes);
            Ok(())
        })?;
        F::decode(id, &bytes)
    }

    /// Reads the record at `id` if it is in use.
    ///
    /// # Errors
    ///
    /// Same as [`get_record`](Self::get_record).
    pub fn get_in_use(&self, id: u64) -> CoreResult<Option<F::Record>> {
        let record = self.get_record(id)?;
        Ok(F::in_use(&record).then_some(record))
    }

    /// Writes the full record under an exclusive page lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be loaded.
    pub fn update_record(&self, record: &F::Record) -> CoreResult<()> {
        let id = F::id(record);
        let (page_id, offset) = self.locate(id);
        let mut bytes = vec![0u8; F::RECORD_SIZE];
        F::encode(record, &mut bytes);
        retry_until_consistent(&self.file, page_id, PageLock::Exclusive, |cursor| {
            cursor.put_bytes(offset, &bytes)
        })?;
        if F::in_use(record) {
            self.ids.mark_used(id);
        }
        Ok(())
    }

    /// Allocates a record id.
    pub fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    /// Returns an id for reuse.
    pub fn free_id(&self, id: u64) {
        self.ids.free_id(id);
    }

    /// Returns one past the highest id in use or allocated.
    #[must_use]
    pub fn high_id(&self) -> u64 {
        self.ids.high_id()
    }

    /// Visits every in-use record in id order until `visitor` returns false.
    ///
    /// # Errors
    ///
    /// Returns the first read or visitor error.
    pub fn scan<V>(&self, mut visitor: V) -> CoreResult<()>
    where
        V: FnMut(F::Record) -> CoreResult<bool>,
    {
        for id in 0..self.high_id() {
            let record = self.get_record(id)?;
            if F::in_use(&record) && !visitor(record)? {
                break;
            }
        }
        Ok(())
    }

    /// Returns the mapped file.
    #[must_use]
    pub fn paged_file(&self) -> &Arc<PagedFile> {
        &self.file
    }

    /// Returns whether the store is consistent.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.store_file.is_clean()
    }

    /// Marks the store consistent after recovery.
    pub fn mark_clean(&self) {
        self.store_file.mark_clean();
    }

    /// Flushes dirty pages.
    ///
    /// # Errors
    ///
    /// Returns an error if the pages cannot be written.
    pub fn flush(&self) -> CoreResult<()> {
        self.file.flush()
    }

    /// Flushes, unmaps and writes the clean-shutdown trailer.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or writing the trailer fails.
    pub fn close(&self, cache: &PageCache) -> CoreResult<()> {
        cache.unmap(self.store_file.path())?;
        self.store_file.write_trailer(cache.file_system().as_ref())
    }
}

impl<F: RecordFormat> fmt::Debug for RecordStore<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("store", &F::TYPE_DESCRIPTOR)
            .field("path", &self.store_file.path())
            .field("high_id", &self.ids.high_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::format::{NodeFormat, NodeRecord, RelationshipFormat, RelationshipRecord};
    use kernstore_storage::{EphemeralFileSystem, FileSystem};

    fn cache(fs: &EphemeralFileSystem) -> PageCache {
        // 64 / 21 = 3 relationship records per page
        PageCache::new(Arc::new(fs.clone()), 64)
    }

    #[test]
    fn records_do_not_straddle_pages() {
        let fs = EphemeralFileSystem::new();
        let cache = cache(&fs);
        let path = Path::new("/db/rels");
        let store = RecordStore::<RelationshipFormat>::open(&cache, path).unwrap();
        for id in 0..4 {
            store
                .update_record(&RelationshipRecord::new(id, 1, 2, 0))
                .unwrap();
        }
        assert_eq!(store.get_record(3).unwrap().start_node, 1);
        store.flush().unwrap();
        // Three records on page 0, then the fourth at the start of page 1.
        assert_eq!(fs.file_size(path).unwrap(), 64 + 21);
    }

    #[test]
    fn id_generator_is_rebuilt_from_in_use_flags() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/nodes");
        {
            let cache = cache(&fs);
            let store = RecordStore::<NodeFormat>::open(&cache, path).unwrap();
            for id in 0..5 {
                store.update_record(&NodeRecord::new(id)).unwrap();
            }
            let mut deleted = NodeRecord::new(2);
            deleted.in_use = false;
            store.update_record(&deleted).unwrap();
            store.close(&cache).unwrap();
        }

        let cache = cache(&fs);
        let store = RecordStore::<NodeFormat>::open(&cache, path).unwrap();
        assert!(store.is_clean());
        assert_eq!(store.high_id(), 5);
        assert_eq!(store.next_id(), 2);
        assert_eq!(store.next_id(), 5);
    }

    #[test]
    fn scan_visits_in_use_records_and_stops_early() {
        let fs = EphemeralFileSystem::new();
        let cache = cache(&fs);
        let store = RecordStore::<NodeFormat>::open(&cache, Path::new("/db/nodes")).unwrap();
        for id in [0, 2, 3] {
            store.update_record(&NodeRecord::new(id)).unwrap();
        }

        let mut seen = Vec::new();
        store
            .scan(|record| {
                seen.push(record.id);
                Ok(seen.len() < 2)
            })
            .unwrap();
        assert_eq!(seen, vec![0, 2]);
        assert_eq!(store.get_in_use(1).unwrap(), None);
    }

    #[test]
    fn unclosed_store_is_not_clean_on_reopen() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/nodes");
        {
            let cache = cache(&fs);
            let store = RecordStore::<NodeFormat>::open(&cache, path).unwrap();
            store.update_record(&NodeRecord::new(0)).unwrap();
            store.flush().unwrap();
        }
        let cache = cache(&fs);
        let store = RecordStore::<NodeFormat>::open(&cache, path).unwrap();
        assert!(!store.is_clean());
        store.mark_clean();
        assert!(store.is_clean());
        assert!(store.get_in_use(0).unwrap().is_some());
    }

    #[test]
    fn tiny_page_is_rejected() {
        let fs = EphemeralFileSystem::new();
        let cache = PageCache::new(Arc::new(fs), 8);
        assert!(matches!(
            RecordStore::<NodeFormat>::open(&cache, Path::new("/db/nodes")),
            Err(CoreError::InvalidArgument { .. })
        ));
    }
}
