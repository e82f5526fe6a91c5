//! Page cache for record store files.
//!
//! Every store file is mapped into a [`PagedFile`]: a set of fixed-size pages
//! loaded lazily from the backing file. Pages are accessed through
//! [`PageCursor`]s taken with [`PageLock::Shared`] or
//! [`PageLock::Exclusive`]:
//!
//! - shared cursors read optimistically and must ask [`PageCursor::retry`]
//!   whether a writer touched the page during the read
//! - exclusive cursors hold the page latch for their lifetime
//!
//! [`retry_until_consistent`] wraps the retry loop so that callers have a
//! single exit condition.

mod cursor;

pub use cursor::{retry_until_consistent, PageCursor, PageLock};

use crate::error::{CoreError, CoreResult};
use kernstore_storage::{FileSystem, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Forces optimistic conflicts on chosen attempts.
///
/// `attempt` counts from 0 for every cursor. Returning true makes the
/// cursor's next [`PageCursor::retry`] report a conflict.
pub trait ConflictInjector: Send + Sync + fmt::Debug {
    /// Returns true if the given attempt on `page_id` should conflict.
    fn should_conflict(&self, page_id: u64, attempt: u32) -> bool;
}

/// Shared map of all files mapped by one database instance.
pub struct PageCache {
    fs: Arc<dyn FileSystem>,
    page_size: usize,
    files: Mutex<HashMap<PathBuf, Arc<PagedFile>>>,
    injector: Option<Arc<dyn ConflictInjector>>,
}

impl PageCache {
    /// Creates a page cache over `fs`.
    pub fn new(fs: Arc<dyn FileSystem>, page_size: usize) -> Self {
        Self {
            fs,
            page_size,
            files: Mutex::new(HashMap::new()),
            injector: None,
        }
    }

    /// Installs a conflict injector for all files mapped afterwards.
    #[must_use]
    pub fn with_conflict_injector(mut self, injector: Option<Arc<dyn ConflictInjector>>) -> Self {
        self.injector = injector;
        self
    }

    /// Returns the file system this cache reads from.
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maps a file, returning the existing mapping if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn map(&self, path: &Path) -> CoreResult<Arc<PagedFile>> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(path) {
            return Ok(Arc::clone(file));
        }

        let backend = self.fs.open(path)?;
        let size = backend.size()?;
        let file = Arc::new(PagedFile {
            path: path.to_path_buf(),
            page_size: self.page_size,
            backend: Mutex::new(backend),
            pages: RwLock::new(HashMap::new()),
            logical_size: AtomicU64::new(size),
            injector: self.injector.clone(),
        });
        debug!(path = %path.display(), size, "mapped store file");
        files.insert(path.to_path_buf(), Arc::clone(&file));
        Ok(file)
    }

    /// Flushes and forgets the mapping of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if dirty pages cannot be written.
    pub fn unmap(&self, path: &Path) -> CoreResult<()> {
        let file = self.files.lock().remove(path);
        if let Some(file) = file {
            file.flush()?;
        }
        Ok(())
    }

    /// Flushes every mapped file.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub fn flush_all(&self) -> CoreResult<()> {
        let files: Vec<_> = self.files.lock().values().cloned().collect();
        for file in files {
            file.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for PageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCache")
            .field("page_size", &self.page_size)
            .field("mapped", &self.files.lock().len())
            .finish()
    }
}

pub(crate) struct Page {
    pub(crate) data: Arc<RwLock<Box<[u8]>>>,
    /// Even while idle, odd while an exclusive cursor is open.
    pub(crate) version: AtomicU64,
    dirty: AtomicBool,
}

/// A file mapped into the page cache.
pub struct PagedFile {
    path: PathBuf,
    page_size: usize,
    backend: Mutex<Box<dyn StorageBackend>>,
    pages: RwLock<HashMap<u64, Arc<Page>>>,
    /// Highest byte ever written or present on disk.
    logical_size: AtomicU64,
    injector: Option<Arc<dyn ConflictInjector>>,
}

impl PagedFile {
    /// Returns the path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of bytes in the file, including unflushed writes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.logical_size.load(Ordering::Acquire)
    }

    /// Opens a cursor on `page_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be loaded from the backing file.
    pub fn io(&self, page_id: u64, lock: PageLock) -> CoreResult<PageCursor<'_>> {
        let page = self.page(page_id)?;
        Ok(PageCursor::open(self, page_id, page, lock))
    }

    fn page(&self, page_id: u64) -> CoreResult<Arc<Page>> {
        if let Some(page) = self.pages.read().get(&page_id) {
            return Ok(Arc::clone(page));
        }

        let mut pages = self.pages.write();
        if let Some(page) = pages.get(&page_id) {
            return Ok(Arc::clone(page));
        }

        let mut buf = vec![0u8; self.page_size].into_boxed_slice();
        let start = page_id * self.page_size as u64;
        let backend = self.backend.lock();
        let on_disk = backend.size()?;
        if start < on_disk {
            let len = (on_disk - start).min(self.page_size as u64) as usize;
            let bytes = backend.read_at(start, len).map_err(|e| {
                CoreError::underlying_storage(format!(
                    "unable to load page {page_id} of {}: {e}",
                    self.path.display()
                ))
            })?;
            buf[..len].copy_from_slice(&bytes);
        }
        drop(backend);

        let page = Arc::new(Page {
            data: Arc::new(RwLock::new(buf)),
            version: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
        });
        pages.insert(page_id, Arc::clone(&page));
        Ok(page)
    }

    pub(crate) fn mark_written(&self, page: &Page, page_id: u64, end_in_page: usize) {
        page.dirty.store(true, Ordering::Release);
        let end = page_id * self.page_size as u64 + end_in_page as u64;
        self.logical_size.fetch_max(end, Ordering::AcqRel);
    }

    pub(crate) fn injected_conflict(&self, page_id: u64, attempt: u32) -> bool {
        self.injector
            .as_ref()
            .is_some_and(|injector| injector.should_conflict(page_id, attempt))
    }

    /// Writes dirty pages back to the file and syncs it.
    ///
    /// Only bytes below [`size`](Self::size) are written, so the file never
    /// grows past its last record.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or syncing fails.
    pub fn flush(&self) -> CoreResult<()> {
        let logical = self.size();
        let dirty: Vec<(u64, Arc<Page>)> = self
            .pages
            .read()
            .iter()
            .filter(|(_, page)| page.dirty.swap(false, Ordering::AcqRel))
            .map(|(id, page)| (*id, Arc::clone(page)))
            .collect();

        let mut backend = self.backend.lock();
        for (page_id, page) in &dirty {
            let start = page_id * self.page_size as u64;
            if start >= logical {
                continue;
            }
            let len = (logical - start).min(self.page_size as u64) as usize;
            let data = page.data.read();
            backend.write_at(start, &data[..len])?;
        }
        backend.sync()?;
        Ok(())
    }
}

impl fmt::Debug for PagedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedFile")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernstore_storage::EphemeralFileSystem;

    fn cache(fs: &EphemeralFileSystem) -> PageCache {
        PageCache::new(Arc::new(fs.clone()), 64)
    }

    #[test]
    fn pages_past_end_read_as_zeros() {
        let fs = EphemeralFileSystem::new();
        let file = cache(&fs).map(Path::new("/db/a")).unwrap();
        let cursor = file.io(3, PageLock::Shared).unwrap();
        assert_eq!(cursor.get_i64(8), 0);
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn flush_writes_only_up_to_last_written_byte() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/a");
        let file = cache(&fs).map(path).unwrap();
        {
            let mut cursor = file.io(1, PageLock::Exclusive).unwrap();
            cursor.put_i64(0, 42).unwrap();
        }
        file.flush().unwrap();

        let bytes = fs.read_file(path).unwrap();
        assert_eq!(bytes.len(), 64 + 8);
        assert_eq!(&bytes[64..], &42i64.to_le_bytes());
    }

    #[test]
    fn map_returns_same_file() {
        let fs = EphemeralFileSystem::new();
        let cache = cache(&fs);
        let a = cache.map(Path::new("/db/a")).unwrap();
        let b = cache.map(Path::new("/db/a")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unmap_flushes_pending_writes() {
        let fs = EphemeralFileSystem::new();
        let cache = cache(&fs);
        let path = Path::new("/db/a");
        let file = cache.map(path).unwrap();
        file.io(0, PageLock::Exclusive).unwrap().put_u8(0, 7).unwrap();
        drop(file);
        cache.unmap(path).unwrap();
        assert_eq!(fs.read_file(path).unwrap(), vec![7]);
    }

    #[test]
    fn existing_content_is_loaded() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/a");
        fs.open(path).unwrap().append(&[0, 1, 2, 3]).unwrap();
        let file = cache(&fs).map(path).unwrap();
        assert_eq!(file.size(), 4);
        let cursor = file.io(0, PageLock::Shared).unwrap();
        assert_eq!(cursor.get_u8(3), 3);
    }
}
