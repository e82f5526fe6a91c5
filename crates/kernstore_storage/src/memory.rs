//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same buffer, so an [`super::EphemeralFileSystem`] can
/// hand out several handles to one "file" and still observe every write.
///
/// # Example
///
/// ```rust
/// use kernstore_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current = data.len() as u64;

        if new_size > current {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size} bytes, current size is {current}"),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clones_share_the_buffer() {
        let mut a = InMemoryBackend::new();
        let b = a.clone();
        a.append(b"shared").unwrap();
        assert_eq!(b.read_at(0, 6).unwrap(), b"shared");
    }

    #[test]
    fn write_at_grows_with_zero_fill() {
        let mut backend = InMemoryBackend::with_data(vec![1, 2]);
        backend.write_at(4, &[9]).unwrap();
        assert_eq!(backend.data(), vec![1, 2, 0, 0, 9]);
    }

    #[test]
    fn read_past_end_reports_sizes() {
        let backend = InMemoryBackend::with_data(vec![0; 4]);
        match backend.read_at(3, 2) {
            Err(StorageError::ReadPastEnd { offset, len, size }) => {
                assert_eq!((offset, len, size), (3, 2, 4));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncate_refuses_to_grow() {
        let mut backend = InMemoryBackend::with_data(vec![0; 4]);
        assert!(backend.truncate(10).is_err());
        backend.truncate(1).unwrap();
        assert_eq!(backend.size().unwrap(), 1);
    }

    proptest! {
        #[test]
        fn write_at_then_read_at_returns_bytes(
            prefix in proptest::collection::vec(any::<u8>(), 0..64),
            offset in 0u64..128,
            payload in proptest::collection::vec(any::<u8>(), 1..32),
        ) {
            let mut backend = InMemoryBackend::with_data(prefix);
            backend.write_at(offset, &payload).unwrap();
            prop_assert_eq!(backend.read_at(offset, payload.len()).unwrap(), payload);
        }
    }
}
