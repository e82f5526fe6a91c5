//! Provider and configuration logic around the [`IndexConfigStore`].

use super::{IndexConfig, IndexConfigStore, IndexEntityType, IndexProviders, PROVIDER_KEY};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Creates an index once its configuration has been settled.
///
/// Runs on a dedicated worker thread, so a failure cannot leave state
/// behind in the caller's transaction.
pub trait IndexCreator: Send + Sync {
    /// Creates the index and records `config` for it.
    ///
    /// # Errors
    ///
    /// Any error fails the creation.
    fn create_index(&self, kind: IndexEntityType, name: &str, config: &IndexConfig) -> CoreResult<()>;
}

/// Creator that only records the configuration.
#[derive(Debug)]
pub struct ConfigStoreIndexCreator {
    store: Arc<IndexConfigStore>,
}

impl ConfigStoreIndexCreator {
    /// Creates a creator writing into `store`.
    #[must_use]
    pub const fn new(store: Arc<IndexConfigStore>) -> Self {
        Self { store }
    }
}

impl IndexCreator for ConfigStoreIndexCreator {
    fn create_index(&self, kind: IndexEntityType, name: &str, config: &IndexConfig) -> CoreResult<()> {
        self.store.set(kind, name, config.clone())
    }
}

/// Named legacy indexes: lookup, create-once and reconfiguration.
pub struct LegacyIndexStore {
    store: Arc<IndexConfigStore>,
    config: Config,
    providers: IndexProviders,
    creator: Arc<dyn IndexCreator>,
    create_lock: Mutex<()>,
}

impl LegacyIndexStore {
    /// Creates the store.
    #[must_use]
    pub fn new(
        store: Arc<IndexConfigStore>,
        config: Config,
        providers: IndexProviders,
        creator: Arc<dyn IndexCreator>,
    ) -> Self {
        Self {
            store,
            config,
            providers,
            creator,
            create_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying configuration store.
    #[must_use]
    pub fn config_store(&self) -> &Arc<IndexConfigStore> {
        &self.store
    }

    /// Returns the configuration of node index `name`, creating the index
    /// if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexConfigMismatch`] if `supplied` conflicts
    /// with the stored configuration, and [`CoreError::TransactionFailure`]
    /// if creation fails.
    pub fn get_or_create_node_index_config(
        &self,
        name: &str,
        supplied: Option<&IndexConfig>,
    ) -> CoreResult<IndexConfig> {
        self.get_or_create(IndexEntityType::Node, name, supplied)
    }

    /// Relationship counterpart of
    /// [`get_or_create_node_index_config`](Self::get_or_create_node_index_config).
    ///
    /// # Errors
    ///
    /// As for node indexes.
    pub fn get_or_create_relationship_index_config(
        &self,
        name: &str,
        supplied: Option<&IndexConfig>,
    ) -> CoreResult<IndexConfig> {
        self.get_or_create(IndexEntityType::Relationship, name, supplied)
    }

    /// Sets one key of a node index, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalIndexConfigKey`] for `provider` and
    /// [`CoreError::IndexNotFound`] for an unknown index.
    pub fn set_node_index_configuration(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> CoreResult<Option<String>> {
        self.set_configuration(IndexEntityType::Node, name, key, value)
    }

    /// Sets one key of a relationship index, returning the previous value.
    ///
    /// # Errors
    ///
    /// As for node indexes.
    pub fn set_relationship_index_configuration(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> CoreResult<Option<String>> {
        self.set_configuration(IndexEntityType::Relationship, name, key, value)
    }

    /// Removes one key of a node index, returning its value.
    ///
    /// # Errors
    ///
    /// As for [`set_node_index_configuration`](Self::set_node_index_configuration).
    pub fn remove_node_index_configuration(&self, name: &str, key: &str) -> CoreResult<Option<String>> {
        self.remove_configuration(IndexEntityType::Node, name, key)
    }

    /// Removes one key of a relationship index, returning its value.
    ///
    /// # Errors
    ///
    /// As for [`set_node_index_configuration`](Self::set_node_index_configuration).
    pub fn remove_relationship_index_configuration(
        &self,
        name: &str,
        key: &str,
    ) -> CoreResult<Option<String>> {
        self.remove_configuration(IndexEntityType::Relationship, name, key)
    }

    /// Returns the configuration of node index `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] if there is no such index.
    pub fn node_index_configuration(&self, name: &str) -> CoreResult<IndexConfig> {
        self.configuration(IndexEntityType::Node, name)
    }

    /// Returns the configuration of relationship index `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] if there is no such index.
    pub fn relationship_index_configuration(&self, name: &str) -> CoreResult<IndexConfig> {
        self.configuration(IndexEntityType::Relationship, name)
    }

    /// Returns the names of all node indexes.
    #[must_use]
    pub fn all_node_index_names(&self) -> Vec<String> {
        self.store.names(IndexEntityType::Node)
    }

    /// Returns the names of all relationship indexes.
    #[must_use]
    pub fn all_relationship_index_names(&self) -> Vec<String> {
        self.store.names(IndexEntityType::Relationship)
    }

    fn get_or_create(
        &self,
        kind: IndexEntityType,
        name: &str,
        supplied: Option<&IndexConfig>,
    ) -> CoreResult<IndexConfig> {
        let (config, needs_creation) = self.find_index_config(kind, name, supplied)?;
        if !needs_creation {
            return Ok(config);
        }

        let _guard = self.create_lock.lock();
        if let Some(existing) = self.store.get(kind, name) {
            // created by someone else since the first check
            let provider = self.providers.lookup(self.provider_of(name, &existing))?;
            self.assert_config_matches(provider.as_ref(), name, &existing, Some(&config))?;
            return Ok(existing);
        }

        self.create_on_worker(kind, name, &config)?;
        info!(kind = kind.name(), name, "created index");
        Ok(config)
    }

    /// Works out the configuration to use and whether the index still has
    /// to be created.
    fn find_index_config(
        &self,
        kind: IndexEntityType,
        name: &str,
        supplied: Option<&IndexConfig>,
    ) -> CoreResult<(IndexConfig, bool)> {
        let stored = self.store.get(kind, name);
        if let (Some(stored), None) = (&stored, supplied) {
            return Ok((self.backfill_provider(kind, name, stored)?, false));
        }

        let mut config = supplied.cloned().unwrap_or_default();
        let provider_name = config
            .get(PROVIDER_KEY)
            .cloned()
            .unwrap_or_else(|| self.config.default_index_provider(name).to_owned());
        let provider = self.providers.lookup(&provider_name)?;
        config = provider.fill_in_defaults(config);
        config
            .entry(PROVIDER_KEY.to_owned())
            .or_insert(provider_name);

        match stored {
            Some(stored) => {
                self.assert_config_matches(provider.as_ref(), name, &stored, supplied)?;
                Ok((self.backfill_provider(kind, name, &stored)?, false))
            }
            None => Ok((config, true)),
        }
    }

    /// Older stores may lack the `provider` key; it is written back on
    /// first use.
    fn backfill_provider(
        &self,
        kind: IndexEntityType,
        name: &str,
        stored: &IndexConfig,
    ) -> CoreResult<IndexConfig> {
        if stored.contains_key(PROVIDER_KEY) {
            return Ok(stored.clone());
        }
        let mut config = stored.clone();
        config.insert(
            PROVIDER_KEY.to_owned(),
            self.config.default_index_provider(name).to_owned(),
        );
        debug!(kind = kind.name(), name, "adding missing index provider");
        self.store.set(kind, name, config.clone())?;
        Ok(config)
    }

    fn provider_of<'c>(&'c self, name: &str, config: &'c IndexConfig) -> &'c str {
        config
            .get(PROVIDER_KEY)
            .map_or_else(|| self.config.default_index_provider(name), String::as_str)
    }

    fn assert_config_matches(
        &self,
        provider: &dyn super::IndexProvider,
        name: &str,
        stored: &IndexConfig,
        supplied: Option<&IndexConfig>,
    ) -> CoreResult<()> {
        match supplied {
            Some(supplied) if !provider.config_matches(stored, supplied) => {
                Err(CoreError::IndexConfigMismatch {
                    index: name.to_owned(),
                    supplied: super::describe(supplied),
                    stored: super::describe(stored),
                })
            }
            _ => Ok(()),
        }
    }

    fn create_on_worker(&self, kind: IndexEntityType, name: &str, config: &IndexConfig) -> CoreResult<()> {
        let failure = |cause: String| {
            CoreError::transaction_failure(format!(
                "index creation failed for {name}, {}: {cause}",
                super::describe(config)
            ))
        };
        let creator = Arc::clone(&self.creator);
        let job_name = name.to_owned();
        let job_config = config.clone();
        let worker = thread::Builder::new()
            .name(format!("index-creator-{name}"))
            .spawn(move || creator.create_index(kind, &job_name, &job_config))
            .map_err(|err| failure(err.to_string()))?;
        match worker.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(failure(err.to_string())),
            Err(_) => Err(failure("index creator panicked".to_owned())),
        }
    }

    fn set_configuration(
        &self,
        kind: IndexEntityType,
        name: &str,
        key: &str,
        value: &str,
    ) -> CoreResult<Option<String>> {
        assert_legal_config_key(key)?;
        let mut config = self.configuration(kind, name)?;
        let previous = config.insert(key.to_owned(), value.to_owned());
        self.store.set(kind, name, config)?;
        Ok(previous)
    }

    fn remove_configuration(
        &self,
        kind: IndexEntityType,
        name: &str,
        key: &str,
    ) -> CoreResult<Option<String>> {
        assert_legal_config_key(key)?;
        let mut config = self.configuration(kind, name)?;
        let removed = config.remove(key);
        if removed.is_some() {
            self.store.set(kind, name, config)?;
        }
        Ok(removed)
    }

    fn configuration(&self, kind: IndexEntityType, name: &str) -> CoreResult<IndexConfig> {
        self.store.get(kind, name).ok_or_else(|| CoreError::IndexNotFound {
            kind: kind.name(),
            name: name.to_owned(),
        })
    }
}

fn assert_legal_config_key(key: &str) -> CoreResult<()> {
    if key == PROVIDER_KEY {
        return Err(CoreError::IllegalIndexConfigKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}

impl std::fmt::Debug for LegacyIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyIndexStore")
            .field("store", &self.store)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}
