//! Naming and discovery of versioned log files.

use crate::error::CoreResult;
use kernstore_storage::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name prefix; the version follows the final dot.
pub const LOG_FILE_PREFIX: &str = "kernstore.log.";

/// The log files of one store directory.
#[derive(Debug, Clone)]
pub struct LogFiles {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl LogFiles {
    /// Creates a view of the log files in `dir`.
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
        }
    }

    /// Returns the file system.
    #[must_use]
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Returns the directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of `version`.
    #[must_use]
    pub fn version_file(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{LOG_FILE_PREFIX}{version}"))
    }

    /// Parses the version out of a log file name.
    #[must_use]
    pub fn version_of(path: &Path) -> Option<u64> {
        path.file_name()?
            .to_str()?
            .strip_prefix(LOG_FILE_PREFIX)?
            .parse()
            .ok()
    }

    /// Returns all existing versions in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn versions(&self) -> CoreResult<Vec<u64>> {
        if !self.fs.is_directory(&self.dir) {
            return Ok(Vec::new());
        }
        let mut versions: Vec<u64> = self
            .fs
            .list_files(&self.dir)?
            .iter()
            .filter_map(|path| Self::version_of(path))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Returns the highest existing version, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn highest_version(&self) -> CoreResult<Option<u64>> {
        Ok(self.versions()?.last().copied())
    }

    /// Returns the lowest existing version, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn lowest_version(&self) -> CoreResult<Option<u64>> {
        Ok(self.versions()?.first().copied())
    }

    /// Returns true if the file for `version` exists.
    #[must_use]
    pub fn exists(&self, version: u64) -> bool {
        self.fs.exists(&self.version_file(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernstore_storage::EphemeralFileSystem;

    #[test]
    fn versions_are_sorted_numerically() {
        let fs = EphemeralFileSystem::new();
        let files = LogFiles::new(Arc::new(fs.clone()), "/db");
        assert_eq!(files.highest_version().unwrap(), None);

        for version in [10, 2, 0] {
            fs.open(&files.version_file(version)).unwrap();
        }
        fs.open(Path::new("/db/neostore")).unwrap();
        fs.open(Path::new("/db/kernstore.log.tmp")).unwrap();

        assert_eq!(files.versions().unwrap(), vec![0, 2, 10]);
        assert_eq!(files.lowest_version().unwrap(), Some(0));
        assert_eq!(files.highest_version().unwrap(), Some(10));
        assert!(files.exists(2));
        assert!(!files.exists(3));
    }
}
