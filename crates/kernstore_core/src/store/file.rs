//! Store file trailer handling.
//!
//! A cleanly closed store file ends with `"<TypeDescriptor> <version>"`.
//! Opening strips the trailer, so a file without one was not closed cleanly
//! and needs recovery.

use super::STORE_VERSION;
use crate::error::{CoreError, CoreResult};
use kernstore_storage::{FileSystem, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Longest version string a trailer can carry.
const MAX_VERSION_LEN: usize = 7;

/// A store file on disk, with its clean-shutdown state.
#[derive(Debug)]
pub struct StoreFile {
    path: PathBuf,
    descriptor: &'static str,
    clean: AtomicBool,
}

impl StoreFile {
    /// Opens the store file, stripping a trailer written by this version.
    ///
    /// A file that does not exist yet is created empty and counts as clean.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnexpectedStoreVersion`] if the trailer names
    /// another version, or an I/O error.
    pub fn open(fs: &dyn FileSystem, path: &Path, descriptor: &'static str) -> CoreResult<Self> {
        if !fs.exists(path) {
            fs.open(path)?;
            debug!(path = %path.display(), "created store file");
            return Ok(Self {
                path: path.to_path_buf(),
                descriptor,
                clean: AtomicBool::new(true),
            });
        }

        let mut backend = fs.open(path)?;
        let size = backend.size()?;
        let expected = trailer(descriptor);

        let tail_len = (descriptor.len() + 1 + MAX_VERSION_LEN).min(size as usize);
        let tail = backend.read_at(size - tail_len as u64, tail_len)?;

        let clean = if tail.ends_with(expected.as_bytes()) {
            backend.truncate(size - expected.len() as u64)?;
            backend.sync()?;
            true
        } else if let Some(found) = foreign_version(&tail, descriptor) {
            return Err(CoreError::UnexpectedStoreVersion {
                store: descriptor.to_string(),
                found,
                expected: STORE_VERSION.to_string(),
            });
        } else {
            false
        };

        debug!(path = %path.display(), clean, "opened store file");
        Ok(Self {
            path: path.to_path_buf(),
            descriptor,
            clean: AtomicBool::new(clean),
        })
    }

    /// Returns the path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the file is consistent: closed cleanly before this
    /// open, or recovered since.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.clean.load(Ordering::Acquire)
    }

    /// Marks the file as consistent, after recovery.
    pub fn mark_clean(&self) {
        self.clean.store(true, Ordering::Release);
    }

    /// Appends the trailer.
    ///
    /// The file must have been flushed and unmapped from the page cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer cannot be written.
    pub fn write_trailer(&self, fs: &dyn FileSystem) -> CoreResult<()> {
        let mut backend = fs.open(&self.path)?;
        backend.append(trailer(self.descriptor).as_bytes())?;
        backend.sync()?;
        Ok(())
    }
}

fn trailer(descriptor: &str) -> String {
    format!("{descriptor} {STORE_VERSION}")
}

fn foreign_version(tail: &[u8], descriptor: &str) -> Option<String> {
    let marker = format!("{descriptor} ");
    let start = tail
        .windows(marker.len())
        .rposition(|window| window == marker.as_bytes())?;
    let version = &tail[start + marker.len()..];
    let printable = !version.is_empty()
        && version.len() <= MAX_VERSION_LEN
        && version.iter().all(|b| b.is_ascii_graphic());
    printable.then(|| String::from_utf8_lossy(version).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernstore_storage::EphemeralFileSystem;

    #[test]
    fn new_file_is_clean() {
        let fs = EphemeralFileSystem::new();
        let file = StoreFile::open(&fs, Path::new("/db/nodes"), "NodeStore").unwrap();
        assert!(file.is_clean());
        assert!(fs.exists(Path::new("/db/nodes")));
    }

    #[test]
    fn trailer_round_trip_strips_on_open() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/nodes");
        fs.open(path).unwrap().append(&[1; 18]).unwrap();

        let file = StoreFile::open(&fs, path, "NodeStore").unwrap();
        assert!(!file.is_clean());
        file.write_trailer(&fs).unwrap();

        let reopened = StoreFile::open(&fs, path, "NodeStore").unwrap();
        assert!(reopened.is_clean());
        assert_eq!(fs.file_size(path).unwrap(), 18);

        // Stripped, so a second open without a close is unclean.
        assert!(!StoreFile::open(&fs, path, "NodeStore").unwrap().is_clean());
    }

    #[test]
    fn foreign_trailer_is_rejected() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/nodes");
        let mut backend = fs.open(path).unwrap();
        backend.append(&[0; 9]).unwrap();
        backend.append(b"NodeStore v0.A.0").unwrap();

        match StoreFile::open(&fs, path, "NodeStore") {
            Err(CoreError::UnexpectedStoreVersion { found, .. }) => assert_eq!(found, "v0.A.0"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
