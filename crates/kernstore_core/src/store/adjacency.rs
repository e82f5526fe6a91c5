//! Relationship ids per node, kept beside the relationship store.

use super::format::RelationshipRecord;
use super::record_store::RecordStore;
use super::RelationshipFormat;
use crate::error::CoreResult;
use crate::types::{NodeId, RelationshipId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

type ByNode = BTreeMap<NodeId, BTreeSet<RelationshipId>>;

/// In-use relationship ids of every node, in id order.
///
/// Built with one scan when the stores open and kept current by every
/// relationship write that goes through [`super::NeoStores`]. A loop is
/// listed once under its node.
#[derive(Debug, Default)]
pub struct NodeRelationships {
    by_node: RwLock<ByNode>,
}

impl NodeRelationships {
    /// Builds the lists from the in-use records of `store`.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn build(store: &RecordStore<RelationshipFormat>) -> CoreResult<Self> {
        let lists = Self::default();
        lists.rebuild(store)?;
        Ok(lists)
    }

    /// Replaces the lists with the in-use records of `store`.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn rebuild(&self, store: &RecordStore<RelationshipFormat>) -> CoreResult<()> {
        let mut by_node = ByNode::new();
        store.scan(|record| {
            link(&mut by_node, &record);
            Ok(true)
        })?;
        *self.by_node.write() = by_node;
        Ok(())
    }

    /// Moves a relationship from its `previous` image to its `current` one.
    pub fn replace(&self, previous: &RelationshipRecord, current: &RelationshipRecord) {
        let mut by_node = self.by_node.write();
        if previous.in_use {
            unlink(&mut by_node, previous);
        }
        if current.in_use {
            link(&mut by_node, current);
        }
    }

    /// Returns the ids listed under `node`.
    #[must_use]
    pub fn relationship_ids(&self, node: NodeId) -> Vec<RelationshipId> {
        self.by_node
            .read()
            .get(&node)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn link(by_node: &mut ByNode, record: &RelationshipRecord) {
    by_node.entry(record.start_node).or_default().insert(record.id);
    by_node.entry(record.end_node).or_default().insert(record.id);
}

fn unlink(by_node: &mut ByNode, record: &RelationshipRecord) {
    for node in [record.start_node, record.end_node] {
        if let Some(ids) = by_node.get_mut(&node) {
            ids.remove(&record.id);
            if ids.is_empty() {
                by_node.remove(&node);
            }
        }
    }
}
