//! Database configuration.

use crate::error::{CoreError, CoreResult};
use crate::page::ConflictInjector;
use crate::store::META_BLOCK_SIZE;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Provider used when neither `index.<name>` nor `index` is configured.
pub const DEFAULT_INDEX_PROVIDER: &str = "native";

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Size of a page in the page cache.
    pub page_size: usize,

    /// Size after which the transaction log rotates to a new version.
    pub log_rotation_threshold: u64,

    /// Read-ahead buffer size used when scanning log files.
    pub read_ahead_size: usize,

    /// Whether to force the log to disk on every commit.
    pub sync_on_commit: bool,

    /// Master id written into `Start` entries.
    pub master_id: i32,

    /// Local id written into `Start` entries.
    pub local_id: i32,

    /// Default index settings, consulted as `index.<name>` then `index`.
    pub index_defaults: BTreeMap<String, String>,

    /// Hook that forces optimistic page conflicts. Only useful in tests.
    pub conflict_injector: Option<Arc<dyn ConflictInjector>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            page_size: 8192,
            log_rotation_threshold: 25 * 1024 * 1024, // 25 MB
            read_ahead_size: 4096,
            sync_on_commit: true,
            master_id: -1,
            local_id: -1,
            index_defaults: BTreeMap::new(),
            conflict_injector: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the log rotation threshold.
    #[must_use]
    pub const fn log_rotation_threshold(mut self, size: u64) -> Self {
        self.log_rotation_threshold = size;
        self
    }

    /// Sets the read-ahead buffer size.
    #[must_use]
    pub const fn read_ahead_size(mut self, size: usize) -> Self {
        self.read_ahead_size = size;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the master and local ids recorded in `Start` entries.
    #[must_use]
    pub const fn instance_ids(mut self, master_id: i32, local_id: i32) -> Self {
        self.master_id = master_id;
        self.local_id = local_id;
        self
    }

    /// Adds a default index setting.
    #[must_use]
    pub fn index_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.index_defaults.insert(key.into(), value.into());
        self
    }

    /// Installs a conflict injector on the page cache.
    #[must_use]
    pub fn conflict_injector(mut self, injector: Arc<dyn ConflictInjector>) -> Self {
        self.conflict_injector = Some(injector);
        self
    }

    /// Checks that the sizes can back a store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if a page cannot hold the
    /// meta-data block or the read-ahead buffer is empty.
    pub fn validate(&self) -> CoreResult<()> {
        if self.page_size < META_BLOCK_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "page size {} is below the minimum of {META_BLOCK_SIZE}",
                self.page_size
            )));
        }
        if self.read_ahead_size == 0 {
            return Err(CoreError::invalid_argument("read-ahead size must be positive"));
        }
        Ok(())
    }

    /// Returns the default provider for an index called `name`.
    #[must_use]
    pub fn default_index_provider(&self, name: &str) -> &str {
        self.index_defaults
            .get(&format!("index.{name}"))
            .or_else(|| self.index_defaults.get("index"))
            .map_or(DEFAULT_INDEX_PROVIDER, String::as_str)
    }
}
