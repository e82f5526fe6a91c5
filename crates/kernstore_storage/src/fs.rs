//! File-system abstraction.
//!
//! Every component that touches store or log files receives a
//! [`FileSystem`] explicitly. Production code uses [`DefaultFileSystem`];
//! tests use [`EphemeralFileSystem`], whose [`snapshot`] produces the image a
//! crashed process would leave behind.
//!
//! [`snapshot`]: EphemeralFileSystem::snapshot

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the advisory lock file inside a store directory.
pub const LOCK_FILE: &str = "store_lock";

/// Operations the storage core needs from a file system.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Opens `path` for reading and writing, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns true if a file or directory exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if `path` is a directory.
    fn is_directory(&self, path: &Path) -> bool;

    /// Creates `path` and all missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    fn mkdirs(&self, path: &Path) -> StorageResult<()>;

    /// Lists the regular files directly inside `dir`, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list_files(&self, dir: &Path) -> StorageResult<Vec<PathBuf>>;

    /// Deletes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no such file.
    fn delete(&self, path: &Path) -> StorageResult<()>;

    /// Returns the size of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no such file.
    fn file_size(&self, path: &Path) -> StorageResult<u64>;

    /// Takes the exclusive lock on a store directory.
    ///
    /// The lock is released when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if the directory is already locked.
    fn lock_exclusive(&self, dir: &Path) -> StorageResult<StoreLock>;
}

/// Guard for an exclusively locked store directory.
#[derive(Debug)]
pub struct StoreLock {
    inner: LockInner,
}

#[derive(Debug)]
enum LockInner {
    File(File),
    Ephemeral {
        held: Arc<Mutex<BTreeSet<PathBuf>>>,
        dir: PathBuf,
    },
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        match &self.inner {
            LockInner::File(file) => {
                let _ = FileExt::unlock(file);
            }
            LockInner::Ephemeral { held, dir } => {
                held.lock().remove(dir);
            }
        }
    }
}

/// File system backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFileSystem;

impl FileSystem for DefaultFileSystem {
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open(path)?))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_directory(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn mkdirs(&self, path: &Path) -> StorageResult<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> StorageResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn delete(&self, path: &Path) -> StorageResult<()> {
        if !path.is_file() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    fn file_size(&self, path: &Path) -> StorageResult<u64> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lock_exclusive(&self, dir: &Path) -> StorageResult<StoreLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.to_path_buf()));
        }

        Ok(StoreLock {
            inner: LockInner::File(file),
        })
    }
}

#[derive(Debug, Default)]
struct EphemeralState {
    files: BTreeMap<PathBuf, InMemoryBackend>,
    dirs: BTreeSet<PathBuf>,
}

/// In-memory file system.
///
/// Clones share state. Nothing is buffered between a write and the backing
/// memory, so [`snapshot`](Self::snapshot) at any point is exactly what a
/// process killed at that point would have left on disk.
#[derive(Debug, Default, Clone)]
pub struct EphemeralFileSystem {
    state: Arc<Mutex<EphemeralState>>,
    locks: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl EphemeralFileSystem {
    /// Creates an empty file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-copies every file into an independent file system.
    ///
    /// Locks are not carried over: the copy behaves like the disk after the
    /// owning process died.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        let state = self.state.lock();
        let files = state
            .files
            .iter()
            .map(|(path, backend)| (path.clone(), InMemoryBackend::with_data(backend.data())))
            .collect();
        Self {
            state: Arc::new(Mutex::new(EphemeralState {
                files,
                dirs: state.dirs.clone(),
            })),
            locks: Arc::default(),
        }
    }

    /// Returns the contents of a file, if present.
    #[must_use]
    pub fn read_file(&self, path: &Path) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).map(InMemoryBackend::data)
    }
}

fn register_parents(dirs: &mut BTreeSet<PathBuf>, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        dirs.insert(ancestor.to_path_buf());
    }
}

impl FileSystem for EphemeralFileSystem {
    fn open(&self, path: &Path) -> StorageResult<Box<dyn StorageBackend>> {
        let mut state = self.state.lock();
        if let Some(parent) = path.parent() {
            register_parents(&mut state.dirs, parent);
        }
        let backend = state.files.entry(path.to_path_buf()).or_default().clone();
        Ok(Box::new(backend))
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn is_directory(&self, path: &Path) -> bool {
        self.state.lock().dirs.contains(path)
    }

    fn mkdirs(&self, path: &Path) -> StorageResult<()> {
        register_parents(&mut self.state.lock().dirs, path);
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> StorageResult<Vec<PathBuf>> {
        let state = self.state.lock();
        if !state.dirs.contains(dir) {
            return Err(StorageError::NotFound(dir.to_path_buf()));
        }
        Ok(state
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn delete(&self, path: &Path) -> StorageResult<()> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn file_size(&self, path: &Path) -> StorageResult<u64> {
        let state = self.state.lock();
        let backend = state
            .files
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;
        backend.size()
    }

    fn lock_exclusive(&self, dir: &Path) -> StorageResult<StoreLock> {
        let mut held = self.locks.lock();
        if !held.insert(dir.to_path_buf()) {
            return Err(StorageError::Locked(dir.to_path_buf()));
        }
        Ok(StoreLock {
            inner: LockInner::Ephemeral {
                held: Arc::clone(&self.locks),
                dir: dir.to_path_buf(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ephemeral_open_creates_shared_file() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/a");
        let mut first = fs.open(path).unwrap();
        first.append(b"xyz").unwrap();

        let second = fs.open(path).unwrap();
        assert_eq!(second.read_at(0, 3).unwrap(), b"xyz");
        assert!(fs.is_directory(Path::new("/db")));
        assert_eq!(fs.file_size(path).unwrap(), 3);
    }

    #[test]
    fn snapshot_is_independent() {
        let fs = EphemeralFileSystem::new();
        let path = Path::new("/db/a");
        fs.open(path).unwrap().append(b"one").unwrap();

        let image = fs.snapshot();
        fs.open(path).unwrap().append(b"two").unwrap();

        assert_eq!(image.read_file(path).unwrap(), b"one");
        assert_eq!(fs.read_file(path).unwrap(), b"onetwo");
    }

    #[test]
    fn ephemeral_list_files_only_direct_children() {
        let fs = EphemeralFileSystem::new();
        fs.open(Path::new("/db/b")).unwrap();
        fs.open(Path::new("/db/a")).unwrap();
        fs.open(Path::new("/db/sub/c")).unwrap();

        let files = fs.list_files(Path::new("/db")).unwrap();
        assert_eq!(files, vec![PathBuf::from("/db/a"), PathBuf::from("/db/b")]);
    }

    #[test]
    fn ephemeral_delete_missing_is_not_found() {
        let fs = EphemeralFileSystem::new();
        assert!(matches!(
            fs.delete(Path::new("/nope")),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn ephemeral_lock_is_exclusive_until_dropped() {
        let fs = EphemeralFileSystem::new();
        let dir = Path::new("/db");
        let guard = fs.lock_exclusive(dir).unwrap();
        assert!(matches!(fs.lock_exclusive(dir), Err(StorageError::Locked(_))));
        drop(guard);
        assert!(fs.lock_exclusive(dir).is_ok());
    }

    #[test]
    fn snapshot_drops_locks() {
        let fs = EphemeralFileSystem::new();
        let dir = Path::new("/db");
        let _guard = fs.lock_exclusive(dir).unwrap();
        assert!(fs.snapshot().lock_exclusive(dir).is_ok());
    }

    #[test]
    fn default_fs_lists_and_deletes() {
        let dir = tempdir().unwrap();
        let fs = DefaultFileSystem;
        fs.open(&dir.path().join("b")).unwrap().append(b"12").unwrap();
        fs.open(&dir.path().join("a")).unwrap();
        fs.mkdirs(&dir.path().join("nested")).unwrap();

        let files = fs.list_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a"), dir.path().join("b")]);
        assert_eq!(fs.file_size(&dir.path().join("b")).unwrap(), 2);

        fs.delete(&dir.path().join("a")).unwrap();
        assert!(!fs.exists(&dir.path().join("a")));
        assert!(matches!(
            fs.file_size(&dir.path().join("a")),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn default_fs_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let fs = DefaultFileSystem;
        let guard = fs.lock_exclusive(dir.path()).unwrap();
        assert!(matches!(
            fs.lock_exclusive(dir.path()),
            Err(StorageError::Locked(_))
        ));
        drop(guard);
        assert!(fs.lock_exclusive(dir.path()).is_ok());
    }
}
