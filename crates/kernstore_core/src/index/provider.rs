//! Index providers and their registry.

use super::{IndexConfig, PROVIDER_KEY};
use crate::config::DEFAULT_INDEX_PROVIDER;
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An index implementation, as far as configuration goes.
pub trait IndexProvider: Send + Sync {
    /// Returns the provider name stored under the `provider` key.
    fn name(&self) -> &str;

    /// Completes a supplied configuration with this provider's defaults.
    fn fill_in_defaults(&self, config: IndexConfig) -> IndexConfig;

    /// Returns true if `supplied` describes the index created from `stored`.
    fn config_matches(&self, stored: &IndexConfig, supplied: &IndexConfig) -> bool;
}

/// The built-in provider.
///
/// Knows `type` (`exact` or `fulltext`, default `exact`) and, for
/// `fulltext`, `to_lower_case` (default `true`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeIndexProvider;

impl NativeIndexProvider {
    const KEYS: [&'static str; 2] = ["type", "to_lower_case"];
}

impl IndexProvider for NativeIndexProvider {
    fn name(&self) -> &str {
        DEFAULT_INDEX_PROVIDER
    }

    fn fill_in_defaults(&self, mut config: IndexConfig) -> IndexConfig {
        let kind = config
            .entry("type".to_owned())
            .or_insert_with(|| "exact".to_owned())
            .clone();
        if kind == "fulltext" {
            config
                .entry("to_lower_case".to_owned())
                .or_insert_with(|| "true".to_owned());
        }
        config
    }

    fn config_matches(&self, stored: &IndexConfig, supplied: &IndexConfig) -> bool {
        let stored = self.fill_in_defaults(stored.clone());
        let supplied = self.fill_in_defaults(supplied.clone());
        Self::KEYS
            .iter()
            .chain(std::iter::once(&PROVIDER_KEY))
            .all(|key| match (stored.get(*key), supplied.get(*key)) {
                (Some(a), Some(b)) => a == b,
                // a missing provider is filled in later
                (_, None) if *key == PROVIDER_KEY => true,
                (a, b) => a == b,
            })
    }
}

/// Providers by name.
#[derive(Clone)]
pub struct IndexProviders {
    providers: BTreeMap<String, Arc<dyn IndexProvider>>,
}

impl IndexProviders {
    /// Creates a registry holding only [`NativeIndexProvider`].
    #[must_use]
    pub fn new() -> Self {
        let mut providers = Self {
            providers: BTreeMap::new(),
        };
        providers.register(Arc::new(NativeIndexProvider));
        providers
    }

    /// Adds or replaces a provider.
    pub fn register(&mut self, provider: Arc<dyn IndexProvider>) {
        self.providers.insert(provider.name().to_owned(), provider);
    }

    /// Looks up a provider by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for an unknown name.
    pub fn lookup(&self, name: &str) -> CoreResult<Arc<dyn IndexProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::invalid_argument(format!("no index provider '{name}' found")))
    }
}

impl Default for IndexProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IndexProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}
