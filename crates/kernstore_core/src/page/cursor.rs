//! Page cursors and the optimistic retry loop.

use super::{Page, PagedFile};
use crate::error::{CoreError, CoreResult};
use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::RawRwLock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{trace, warn};

/// Retry count after which a single read or write loop is reported.
const LONG_RETRY_WARN: u32 = 1000;

/// Access mode of a [`PageCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLock {
    /// Optimistic read access.
    Shared,
    /// Exclusive write access.
    Exclusive,
}

enum Mode {
    Shared { snapshot: u64 },
    Exclusive { guard: Option<ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>> },
}

/// Handle on one page of a [`PagedFile`].
pub struct PageCursor<'a> {
    file: &'a PagedFile,
    page_id: u64,
    page: Arc<Page>,
    mode: Mode,
    attempt: u32,
}

impl<'a> PageCursor<'a> {
    pub(super) fn open(file: &'a PagedFile, page_id: u64, page: Arc<Page>, lock: PageLock) -> Self {
        let mode = match lock {
            PageLock::Shared => Mode::Shared {
                snapshot: page.version.load(Ordering::Acquire),
            },
            PageLock::Exclusive => {
                let guard = page.data.write_arc();
                page.version.fetch_add(1, Ordering::AcqRel);
                Mode::Exclusive { guard: Some(guard) }
            }
        };
        Self {
            file,
            page_id,
            page,
            mode,
            attempt: 0,
        }
    }

    /// Returns the id of the page under this cursor.
    #[must_use]
    pub fn page_id(&self) -> u64 {
        self.page_id
    }

    /// Copies bytes starting at `offset` into `buf`.
    pub fn get_bytes(&self, offset: usize, buf: &mut [u8]) {
        let end = offset + buf.len();
        match &self.mode {
            Mode::Shared { .. } => buf.copy_from_slice(&self.page.data.read()[offset..end]),
            Mode::Exclusive { guard } => {
                if let Some(guard) = guard {
                    buf.copy_from_slice(&guard[offset..end]);
                }
            }
        }
    }

    /// Reads one byte.
    #[must_use]
    pub fn get_u8(&self, offset: usize) -> u8 {
        let mut buf = [0u8; 1];
        self.get_bytes(offset, &mut buf);
        buf[0]
    }

    /// Reads a little-endian `u32`.
    #[must_use]
    pub fn get_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.get_bytes(offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    /// Reads a little-endian `i64`.
    #[must_use]
    pub fn get_i64(&self, offset: usize) -> i64 {
        let mut buf = [0u8; 8];
        self.get_bytes(offset, &mut buf);
        i64::from_le_bytes(buf)
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error on a shared cursor or if the write would run past
    /// the end of the page.
    pub fn put_bytes(&mut self, offset: usize, data: &[u8]) -> CoreResult<()> {
        let Mode::Exclusive { guard: Some(guard) } = &mut self.mode else {
            return Err(CoreError::invalid_operation(format!(
                "write through shared cursor on page {}",
                self.page_id
            )));
        };
        let end = offset + data.len();
        if end > guard.len() {
            return Err(CoreError::invalid_argument(format!(
                "write of {} bytes at offset {offset} overflows page {} of {} bytes",
                data.len(),
                self.page_id,
                guard.len()
            )));
        }
        guard[offset..end].copy_from_slice(data);
        self.file.mark_written(&self.page, self.page_id, end);
        Ok(())
    }

    /// Writes one byte.
    ///
    /// # Errors
    ///
    /// Returns an error on a shared cursor.
    pub fn put_u8(&mut self, offset: usize, value: u8) -> CoreResult<()> {
        self.put_bytes(offset, &[value])
    }

    /// Writes a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns an error on a shared cursor.
    pub fn put_i64(&mut self, offset: usize, value: i64) -> CoreResult<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    /// Reports whether the work done since the last call must be redone.
    ///
    /// A shared cursor conflicts when an exclusive cursor was open on the
    /// page at any point since the previous snapshot. An exclusive cursor
    /// conflicts only when a [`super::ConflictInjector`] says so.
    pub fn retry(&mut self) -> bool {
        let injected = self.file.injected_conflict(self.page_id, self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        match &mut self.mode {
            Mode::Shared { snapshot } => {
                let current = self.page.version.load(Ordering::Acquire);
                let raced = current != *snapshot || *snapshot % 2 == 1;
                *snapshot = current;
                raced || injected
            }
            Mode::Exclusive { .. } => injected,
        }
    }
}

impl Drop for PageCursor<'_> {
    fn drop(&mut self) {
        if let Mode::Exclusive { guard } = &mut self.mode {
            drop(guard.take());
            self.page.version.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Runs `body` on a cursor until the cursor reports no conflict.
///
/// `body` must be repeatable: reads are discarded on conflict and writes
/// must be full after-images.
///
/// # Errors
///
/// Returns an error if the page cannot be loaded or `body` fails. Conflicts
/// are never surfaced.
pub fn retry_until_consistent<T, F>(
    file: &PagedFile,
    page_id: u64,
    lock: PageLock,
    mut body: F,
) -> CoreResult<T>
where
    F: FnMut(&mut PageCursor<'_>) -> CoreResult<T>,
{
    let mut cursor = file.io(page_id, lock)?;
    let mut retries = 0u32;
    loop {
        let value = body(&mut cursor)?;
        if !cursor.retry() {
            return Ok(value);
        }
        retries += 1;
        trace!(page_id, retries, path = %file.path().display(), "page conflict, retrying");
        if retries % LONG_RETRY_WARN == 0 {
            warn!(page_id, retries, path = %file.path().display(), "long optimistic retry loop");
        }
    }
}
