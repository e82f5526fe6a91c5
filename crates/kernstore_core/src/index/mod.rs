//! Legacy index configuration.
//!
//! Index implementations live elsewhere; this module only records which
//! named indexes exist, which provider backs each one and with what
//! settings. Creating an index is guarded so that concurrent callers
//! create it at most once.

mod config_store;
mod legacy;
mod provider;

pub use config_store::{IndexConfigStore, INDEX_CONFIG_FILE};
pub use legacy::{ConfigStoreIndexCreator, IndexCreator, LegacyIndexStore};
pub use provider::{IndexProvider, IndexProviders, NativeIndexProvider};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value settings of one index.
pub type IndexConfig = BTreeMap<String, String>;

/// Configuration key naming the provider. It cannot be changed after
/// creation.
pub const PROVIDER_KEY: &str = "provider";

/// Kind of entity an index covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexEntityType {
    /// Node index.
    Node,
    /// Relationship index.
    Relationship,
}

impl IndexEntityType {
    /// Returns `node` or `relationship`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Relationship => "relationship",
        }
    }
}

/// Renders a configuration as `{key=value, ...}`.
pub(crate) fn describe(config: &IndexConfig) -> String {
    let pairs: Vec<String> = config.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", pairs.join(", "))
}
