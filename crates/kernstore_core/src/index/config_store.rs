//! Persistent index configurations.
//!
//! The store is a small JSON document, `index.db`, rewritten in full on
//! every change:
//!
//! ```text
//! { "node": { "<name>": { "<key>": "<value>", ... } }, "relationship": { ... } }
//! ```

use super::{IndexConfig, IndexEntityType};
use crate::error::CoreResult;
use kernstore_storage::FileSystem;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File name of the index configuration store.
pub const INDEX_CONFIG_FILE: &str = "index.db";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct IndexConfigs {
    #[serde(default)]
    node: BTreeMap<String, IndexConfig>,
    #[serde(default)]
    relationship: BTreeMap<String, IndexConfig>,
}

impl IndexConfigs {
    fn of(&self, kind: IndexEntityType) -> &BTreeMap<String, IndexConfig> {
        match kind {
            IndexEntityType::Node => &self.node,
            IndexEntityType::Relationship => &self.relationship,
        }
    }

    fn of_mut(&mut self, kind: IndexEntityType) -> &mut BTreeMap<String, IndexConfig> {
        match kind {
            IndexEntityType::Node => &mut self.node,
            IndexEntityType::Relationship => &mut self.relationship,
        }
    }
}

/// Index configurations keyed by entity kind and name.
pub struct IndexConfigStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    configs: RwLock<IndexConfigs>,
}

impl IndexConfigStore {
    /// Opens the store in `dir`, starting empty if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(fs: Arc<dyn FileSystem>, dir: &Path) -> CoreResult<Self> {
        let path = dir.join(INDEX_CONFIG_FILE);
        let configs = if fs.exists(&path) {
            let backend = fs.open(&path)?;
            let size = backend.size()?;
            if size == 0 {
                IndexConfigs::default()
            } else {
                let bytes = backend.read_at(0, size as usize)?;
                serde_json::from_slice(&bytes)?
            }
        } else {
            IndexConfigs::default()
        };
        debug!(
            path = %path.display(),
            node = configs.node.len(),
            relationship = configs.relationship.len(),
            "opened index config store"
        );
        Ok(Self {
            fs,
            path,
            configs: RwLock::new(configs),
        })
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the configuration of an index, if it exists.
    #[must_use]
    pub fn get(&self, kind: IndexEntityType, name: &str) -> Option<IndexConfig> {
        self.configs.read().of(kind).get(name).cloned()
    }

    /// Returns true if an index with this name exists.
    #[must_use]
    pub fn has(&self, kind: IndexEntityType, name: &str) -> bool {
        self.configs.read().of(kind).contains_key(name)
    }

    /// Stores a configuration and persists the whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written; the in-memory state
    /// is left unchanged.
    pub fn set(&self, kind: IndexEntityType, name: &str, config: IndexConfig) -> CoreResult<()> {
        let mut configs = self.configs.write();
        let mut updated = configs.clone();
        updated.of_mut(kind).insert(name.to_owned(), config);
        self.write(&updated)?;
        *configs = updated;
        Ok(())
    }

    /// Removes an index, returning its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn remove(&self, kind: IndexEntityType, name: &str) -> CoreResult<Option<IndexConfig>> {
        let mut configs = self.configs.write();
        if !configs.of(kind).contains_key(name) {
            return Ok(None);
        }
        let mut updated = configs.clone();
        let removed = updated.of_mut(kind).remove(name);
        self.write(&updated)?;
        *configs = updated;
        Ok(removed)
    }

    /// Returns the names of every index of `kind`, sorted.
    #[must_use]
    pub fn names(&self, kind: IndexEntityType) -> Vec<String> {
        self.configs.read().of(kind).keys().cloned().collect()
    }

    fn write(&self, configs: &IndexConfigs) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(configs)?;
        let mut backend = self.fs.open(&self.path)?;
        backend.truncate(0)?;
        backend.write_at(0, &bytes)?;
        backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for IndexConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let configs = self.configs.read();
        f.debug_struct("IndexConfigStore")
            .field("path", &self.path)
            .field("node", &configs.node.len())
            .field("relationship", &configs.relationship.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernstore_storage::EphemeralFileSystem;

    fn config(pairs: &[(&str, &str)]) -> IndexConfig {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn configs_survive_reopen() {
        let fs = Arc::new(EphemeralFileSystem::new());
        let dir = Path::new("/db");
        {
            let store = IndexConfigStore::open(fs.clone(), dir).unwrap();
            store
                .set(IndexEntityType::Node, "users", config(&[("provider", "native")]))
                .unwrap();
            store
                .set(IndexEntityType::Relationship, "knows", config(&[("type", "exact")]))
                .unwrap();
        }
        let store = IndexConfigStore::open(fs, dir).unwrap();
        assert_eq!(
            store.get(IndexEntityType::Node, "users"),
            Some(config(&[("provider", "native")]))
        );
        assert!(!store.has(IndexEntityType::Node, "knows"));
        assert_eq!(store.names(IndexEntityType::Relationship), vec!["knows"]);
    }

    #[test]
    fn shrinking_rewrite_leaves_no_garbage() {
        let fs = Arc::new(EphemeralFileSystem::new());
        let dir = Path::new("/db");
        let store = IndexConfigStore::open(fs.clone(), dir).unwrap();
        store
            .set(IndexEntityType::Node, "a-rather-long-index-name", IndexConfig::new())
            .unwrap();
        store
            .remove(IndexEntityType::Node, "a-rather-long-index-name")
            .unwrap();
        assert!(IndexConfigStore::open(fs, dir)
            .unwrap()
            .names(IndexEntityType::Node)
            .is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let fs = Arc::new(EphemeralFileSystem::new());
        let mut backend = fs.open(Path::new("/db/index.db")).unwrap();
        backend.append(b"{ not json").unwrap();
        let err = IndexConfigStore::open(fs, Path::new("/db")).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Serialization(_)));
    }
}
