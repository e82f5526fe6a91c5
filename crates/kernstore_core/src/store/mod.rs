//! Record stores.
//!
//! A store directory holds one file per record type plus the meta-data
//! store:
//!
//! ```text
//! <store dir>/
//! ├─ neostore                      # meta-data fields
//! ├─ neostore.nodestore.db         # nodes
//! ├─ neostore.relationshipstore.db # relationships
//! └─ neostore.propertystore.db     # property chains
//! ```

mod adjacency;
mod file;
pub mod format;
mod id;
mod meta;
mod record_store;
mod sequence;

pub use adjacency::NodeRelationships;
pub use file::StoreFile;
pub use format::{
    MetaDataFormat, NodeFormat, NodeRecord, PropertyFormat, PropertyRecord, RecordFormat,
    RelationshipFormat, RelationshipRecord, NO_ID,
};
pub use id::IdGenerator;
pub use meta::{MetaDataStore, Position, FIELD_COUNT, FIELD_NOT_INITIALIZED, META_BLOCK_SIZE};
pub use record_store::RecordStore;
pub use sequence::OutOfOrderSequence;

use crate::error::{CoreError, CoreResult};
use crate::page::PageCache;
use crate::types::{NodeId, PropertyId};
use std::path::{Path, PathBuf};
use tracing::info;

/// Format version written by this kernel.
pub const STORE_VERSION: &str = "v0.K.1";

/// Version string reported for an encoded value of `-1`.
pub const UNKNOWN_VERSION: &str = "Unknown";

/// Name of the meta-data store file.
pub const META_DATA_FILE: &str = "neostore";
/// Name of the node store file.
pub const NODE_STORE_FILE: &str = "neostore.nodestore.db";
/// Name of the relationship store file.
pub const RELATIONSHIP_STORE_FILE: &str = "neostore.relationshipstore.db";
/// Name of the property store file.
pub const PROPERTY_STORE_FILE: &str = "neostore.propertystore.db";

/// Packs a store version string into one `i64`.
///
/// The low byte holds the length, each following byte one character.
/// Strings must be 1 to 7 characters, each in the single-byte (Latin-1)
/// range. [`UNKNOWN_VERSION`] encodes as `-1`.
///
/// # Errors
///
/// Returns an error for empty, too long or multi-byte strings.
pub fn version_string_to_long(version: &str) -> CoreResult<i64> {
    if version == UNKNOWN_VERSION {
        return Ok(-1);
    }
    let chars: Vec<char> = version.chars().collect();
    if chars.is_empty() || chars.len() > 7 {
        return Err(CoreError::invalid_argument(format!(
            "the given string {version} is not of proper size for a store version string"
        )));
    }
    let mut packed = chars.len() as u64;
    for (index, ch) in chars.iter().enumerate() {
        let byte = u8::try_from(u32::from(*ch)).map_err(|_| {
            CoreError::invalid_argument(format!(
                "store version strings should be encodable as Latin-1, {version} is not"
            ))
        })?;
        packed |= u64::from(byte) << (8 * (index + 1));
    }
    Ok(packed as i64)
}

/// Unpacks a value produced by [`version_string_to_long`].
///
/// # Errors
///
/// Returns an error if the length byte is out of range.
pub fn version_long_to_string(packed: i64) -> CoreResult<String> {
    if packed == -1 {
        return Ok(UNKNOWN_VERSION.to_string());
    }
    let packed = packed as u64;
    let len = (packed & 0xff) as usize;
    if len == 0 || len > 7 {
        return Err(CoreError::invalid_argument(format!(
            "the read version string length {len} is not proper"
        )));
    }
    Ok((1..=len)
        .map(|index| char::from(((packed >> (8 * index)) & 0xff) as u8))
        .collect())
}

/// All record stores of one store directory.
#[derive(Debug)]
pub struct NeoStores {
    dir: PathBuf,
    /// Whole-graph fields.
    pub meta: MetaDataStore,
    /// Nodes.
    pub nodes: RecordStore<NodeFormat>,
    /// Relationships.
    pub relationships: RecordStore<RelationshipFormat>,
    /// Properties.
    pub properties: RecordStore<PropertyFormat>,
    adjacency: NodeRelationships,
}

impl NeoStores {
    /// Opens every store in `dir`, creating missing files.
    ///
    /// # Errors
    ///
    /// Returns the first store open error.
    pub fn open(cache: &PageCache, dir: &Path) -> CoreResult<Self> {
        cache.file_system().mkdirs(dir)?;
        let relationships = RecordStore::open(cache, &dir.join(RELATIONSHIP_STORE_FILE))?;
        let adjacency = NodeRelationships::build(&relationships)?;
        let stores = Self {
            dir: dir.to_path_buf(),
            meta: MetaDataStore::open(cache, &dir.join(META_DATA_FILE))?,
            nodes: RecordStore::open(cache, &dir.join(NODE_STORE_FILE))?,
            relationships,
            properties: RecordStore::open(cache, &dir.join(PROPERTY_STORE_FILE))?,
            adjacency,
        };
        info!(
            dir = %dir.display(),
            clean = stores.is_clean(),
            last_tx = %stores.meta.last_committed_transaction_id(),
            "opened stores"
        );
        Ok(stores)
    }

    /// Returns true if a meta-data store exists in `dir`.
    #[must_use]
    pub fn exists(fs: &dyn kernstore_storage::FileSystem, dir: &Path) -> bool {
        fs.exists(&dir.join(META_DATA_FILE))
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns true only if every store was closed cleanly or recovered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.meta.is_clean()
            && self.nodes.is_clean()
            && self.relationships.is_clean()
            && self.properties.is_clean()
    }

    /// Marks every store consistent after recovery.
    pub fn mark_clean(&self) {
        self.meta.mark_clean();
        self.nodes.mark_clean();
        self.relationships.mark_clean();
        self.properties.mark_clean();
    }

    /// Rebuilds the id generators of the record stores and the per-node
    /// relationship lists.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn rebuild_ids(&self) -> CoreResult<()> {
        self.nodes.rebuild_ids()?;
        self.relationships.rebuild_ids()?;
        self.properties.rebuild_ids()?;
        self.adjacency.rebuild(&self.relationships)
    }

    /// Writes a relationship record and files it under its endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the previous image cannot be read or the record
    /// cannot be written.
    pub fn update_relationship(&self, record: &RelationshipRecord) -> CoreResult<()> {
        let previous = self.relationships.get_record(record.id)?;
        self.relationships.update_record(record)?;
        self.adjacency.replace(&previous, record);
        Ok(())
    }

    /// Returns every in-use relationship with `node` as an endpoint, in id
    /// order. Only the node's own records are read.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn relationships_of(&self, node: NodeId) -> CoreResult<Vec<RelationshipRecord>> {
        let mut found = Vec::new();
        for id in self.adjacency.relationship_ids(node) {
            if let Some(record) = self.relationships.get_in_use(id)? {
                if record.touches(node) {
                    found.push(record);
                }
            }
        }
        Ok(found)
    }

    /// Reads the property chain starting at `head`.
    ///
    /// # Errors
    ///
    /// Returns an error if a record in the chain is not in use or the chain
    /// loops.
    pub fn property_chain(&self, head: Option<PropertyId>) -> CoreResult<Vec<PropertyRecord>> {
        let mut chain = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        let mut next = head;
        while let Some(id) = next {
            if !seen.insert(id) {
                return Err(CoreError::invalid_record(format!(
                    "property chain loops back to record {id}"
                )));
            }
            let record = self.properties.get_in_use(id)?.ok_or_else(|| {
                CoreError::invalid_record(format!("property chain points at unused record {id}"))
            })?;
            next = record.next_prop;
            chain.push(record);
        }
        Ok(chain)
    }

    /// Flushes every store, the meta-data store last.
    ///
    /// # Errors
    ///
    /// Returns the first flush error.
    pub fn flush(&self) -> CoreResult<()> {
        self.nodes.flush()?;
        self.relationships.flush()?;
        self.properties.flush()?;
        self.meta.flush()
    }

    /// Closes every store, writing clean-shutdown trailers.
    ///
    /// # Errors
    ///
    /// Returns the first close error.
    pub fn close(&self, cache: &PageCache) -> CoreResult<()> {
        self.nodes.close(cache)?;
        self.relationships.close(cache)?;
        self.properties.close(cache)?;
        self.meta.close(cache)
    }
}
