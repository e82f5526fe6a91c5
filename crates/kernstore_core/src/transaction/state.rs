//! Pending changes of one kernel transaction.

use super::relationship_changes::{DiffStrategy, RelationshipChangesForNode};
use crate::error::{CoreError, CoreResult};
use crate::store::{NeoStores, RelationshipRecord};
use crate::types::{
    NodeId, PropertyKeyId, RelationshipDirection, RelationshipId, RelationshipTypeId,
};
use std::collections::{BTreeMap, BTreeSet};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// Property writes keyed by property key. `None` removes the key.
pub type PropertyChanges = BTreeMap<PropertyKeyId, Option<i64>>;

/// Everything a transaction changed, before it is turned into commands.
///
/// Nodes and relationships created and deleted inside the same
/// transaction stay in both sets, so their ids can be released at the end
/// without ever reaching a store.
#[derive(Debug)]
pub struct TxState {
    state: TransactionState,
    created_nodes: BTreeSet<NodeId>,
    deleted_nodes: BTreeSet<NodeId>,
    created_relationships: BTreeMap<RelationshipId, RelationshipRecord>,
    deleted_relationships: BTreeMap<RelationshipId, RelationshipRecord>,
    node_properties: BTreeMap<NodeId, PropertyChanges>,
    graph_properties: PropertyChanges,
    added: BTreeMap<NodeId, RelationshipChangesForNode>,
    removed: BTreeMap<NodeId, RelationshipChangesForNode>,
    constraint_introduced: bool,
}

impl Default for TxState {
    fn default() -> Self {
        Self::new()
    }
}

fn track(
    overlays: &mut BTreeMap<NodeId, RelationshipChangesForNode>,
    strategy: DiffStrategy,
    record: &RelationshipRecord,
) {
    for (node, direction) in endpoints(record) {
        overlays
            .entry(node)
            .or_insert_with(|| RelationshipChangesForNode::new(strategy))
            .add_relationship(record.id, record.type_id, direction);
    }
}

fn untrack(overlays: &mut BTreeMap<NodeId, RelationshipChangesForNode>, record: &RelationshipRecord) {
    for (node, direction) in endpoints(record) {
        if let Some(changes) = overlays.get_mut(&node) {
            changes.remove_relationship(record.id, record.type_id, direction);
            if changes.is_empty() {
                overlays.remove(&node);
            }
        }
    }
}

fn endpoints(record: &RelationshipRecord) -> Vec<(NodeId, RelationshipDirection)> {
    if record.start_node == record.end_node {
        vec![(record.start_node, RelationshipDirection::Both)]
    } else {
        vec![
            (record.start_node, RelationshipDirection::Outgoing),
            (record.end_node, RelationshipDirection::Incoming),
        ]
    }
}

fn matches(
    record: &RelationshipRecord,
    node: NodeId,
    direction: RelationshipDirection,
    types: Option<&[RelationshipTypeId]>,
) -> bool {
    let own = RelationshipDirection::of(node, record.start_node, record.end_node);
    let direction_ok = direction == RelationshipDirection::Both
        || own == RelationshipDirection::Both
        || own == direction;
    direction_ok && types.map_or(true, |types| types.contains(&record.type_id))
}

impl TxState {
    /// Creates an empty, active state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: TransactionState::Active,
            created_nodes: BTreeSet::new(),
            deleted_nodes: BTreeSet::new(),
            created_relationships: BTreeMap::new(),
            deleted_relationships: BTreeMap::new(),
            node_properties: BTreeMap::new(),
            graph_properties: BTreeMap::new(),
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
            constraint_introduced: false,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// Fails unless the transaction is still active.
    ///
    /// # Errors
    ///
    /// Returns an invalid operation error after commit or rollback.
    pub fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::RolledBack => Err(CoreError::invalid_operation(
                "transaction already rolled back",
            )),
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.state = TransactionState::RolledBack;
    }

    /// Returns true if nothing would be written on commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_relationships.is_empty()
            && self.node_properties.is_empty()
            && self.graph_properties.is_empty()
            && !self.constraint_introduced
    }

    /// Records a new node.
    pub fn node_created(&mut self, id: NodeId) {
        self.created_nodes.insert(id);
    }

    /// Records a node deletion and drops its pending property writes.
    pub fn node_deleted(&mut self, id: NodeId) {
        self.deleted_nodes.insert(id);
        self.node_properties.remove(&id);
    }

    /// Records a new relationship.
    pub fn relationship_created(&mut self, record: RelationshipRecord) {
        track(&mut self.added, DiffStrategy::Add, &record);
        self.created_relationships.insert(record.id, record);
    }

    /// Records a relationship deletion.
    ///
    /// A relationship created by this transaction is only taken out of the
    /// additive overlay. Returns true in that case.
    pub fn relationship_deleted(&mut self, record: RelationshipRecord) -> bool {
        if self.created_relationships.contains_key(&record.id) {
            untrack(&mut self.added, &record);
            self.deleted_relationships.insert(record.id, record);
            return true;
        }
        track(&mut self.removed, DiffStrategy::Remove, &record);
        self.deleted_relationships.insert(record.id, record);
        false
    }

    /// Records a node property write.
    pub fn set_node_property(&mut self, node: NodeId, key: PropertyKeyId, value: Option<i64>) {
        self.node_properties.entry(node).or_default().insert(key, value);
    }

    /// Records a graph property write.
    pub fn set_graph_property(&mut self, key: PropertyKeyId, value: Option<i64>) {
        self.graph_properties.insert(key, value);
    }

    /// Marks the transaction as introducing a schema constraint.
    pub fn constraint_introduced(&mut self) {
        self.constraint_introduced = true;
    }

    /// Returns true if the transaction introduces a constraint.
    #[must_use]
    pub const fn introduces_constraint(&self) -> bool {
        self.constraint_introduced
    }

    /// Returns true if `id` was created by this transaction.
    #[must_use]
    pub fn is_node_created(&self, id: NodeId) -> bool {
        self.created_nodes.contains(&id)
    }

    /// Returns true if `id` was deleted by this transaction.
    #[must_use]
    pub fn is_node_deleted(&self, id: NodeId) -> bool {
        self.deleted_nodes.contains(&id)
    }

    /// Returns the relationship if this transaction created it.
    #[must_use]
    pub fn created_relationship(&self, id: RelationshipId) -> Option<&RelationshipRecord> {
        self.created_relationships.get(&id)
    }

    /// Returns true if `id` was deleted by this transaction.
    #[must_use]
    pub fn is_relationship_deleted(&self, id: RelationshipId) -> bool {
        self.deleted_relationships.contains_key(&id)
    }

    /// Returns the pending write of a node property, if any.
    #[must_use]
    pub fn node_property(&self, node: NodeId, key: PropertyKeyId) -> Option<Option<i64>> {
        self.node_properties.get(&node)?.get(&key).copied()
    }

    /// Returns the pending write of a graph property, if any.
    #[must_use]
    pub fn graph_property(&self, key: PropertyKeyId) -> Option<Option<i64>> {
        self.graph_properties.get(&key).copied()
    }

    /// Returns the additive overlay of `node`.
    #[must_use]
    pub fn added_relationships(&self, node: NodeId) -> Option<&RelationshipChangesForNode> {
        self.added.get(&node)
    }

    /// Returns the subtractive overlay of `node`.
    #[must_use]
    pub fn removed_relationships(&self, node: NodeId) -> Option<&RelationshipChangesForNode> {
        self.removed.get(&node)
    }

    /// Nodes created and not deleted again.
    pub fn created_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.created_nodes
            .iter()
            .copied()
            .filter(|id| !self.deleted_nodes.contains(id))
    }

    /// Committed nodes deleted by this transaction.
    pub fn deleted_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.deleted_nodes
            .iter()
            .copied()
            .filter(|id| !self.created_nodes.contains(id))
    }

    /// Relationships created and not deleted again.
    pub fn created_relationships(&self) -> impl Iterator<Item = &RelationshipRecord> + '_ {
        self.created_relationships
            .values()
            .filter(|record| !self.deleted_relationships.contains_key(&record.id))
    }

    /// Committed relationships deleted by this transaction.
    pub fn deleted_relationships(&self) -> impl Iterator<Item = &RelationshipRecord> + '_ {
        self.deleted_relationships
            .values()
            .filter(|record| !self.created_relationships.contains_key(&record.id))
    }

    /// Node property writes of nodes that are not deleted.
    pub fn node_property_changes(&self) -> impl Iterator<Item = (NodeId, &PropertyChanges)> + '_ {
        self.node_properties
            .iter()
            .filter(|(node, _)| !self.deleted_nodes.contains(node))
            .map(|(node, changes)| (*node, changes))
    }

    /// Graph property writes.
    #[must_use]
    pub const fn graph_property_changes(&self) -> &PropertyChanges {
        &self.graph_properties
    }

    /// Node ids allocated by this transaction.
    pub fn allocated_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.created_nodes.iter().copied()
    }

    /// Relationship ids allocated by this transaction.
    pub fn allocated_relationship_ids(&self) -> impl Iterator<Item = RelationshipId> + '_ {
        self.created_relationships.keys().copied()
    }

    /// Node ids allocated and deleted again, never written to a store.
    pub fn discarded_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.created_nodes.intersection(&self.deleted_nodes).copied()
    }

    /// Relationship ids allocated and deleted again.
    pub fn discarded_relationship_ids(&self) -> impl Iterator<Item = RelationshipId> + '_ {
        self.created_relationships
            .keys()
            .copied()
            .filter(|id| self.deleted_relationships.contains_key(id))
    }

    fn committed_relationships(
        &self,
        stores: &NeoStores,
        node: NodeId,
    ) -> CoreResult<Vec<RelationshipRecord>> {
        if self.created_nodes.contains(&node) {
            return Ok(Vec::new());
        }
        stores.relationships_of(node)
    }

    /// Relationship ids of `node` as this transaction sees them: committed
    /// ones not deleted here, then the ones created here.
    ///
    /// # Errors
    ///
    /// Returns an error if the relationship store cannot be read.
    pub fn visible_relationships(
        &self,
        stores: &NeoStores,
        node: NodeId,
        direction: RelationshipDirection,
        types: Option<&[RelationshipTypeId]>,
    ) -> CoreResult<Vec<RelationshipId>> {
        let removed = self.removed.get(&node);
        let base = self
            .committed_relationships(stores, node)?
            .into_iter()
            .filter(|record| matches(record, node, direction, types))
            .filter(|record| removed.map_or(true, |removed| !removed.contains(record.id)))
            .map(|record| record.id);
        let Some(added) = self.added.get(&node) else {
            return Ok(base.collect());
        };
        Ok(match types {
            Some(types) => added
                .augment_relationships_of_types(direction, types, base)?
                .collect(),
            None => added.augment_relationships(direction, base)?.collect(),
        })
    }

    /// Degree of `node` as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns an error if the relationship store cannot be read.
    pub fn visible_degree(
        &self,
        stores: &NeoStores,
        node: NodeId,
        direction: RelationshipDirection,
        type_id: Option<RelationshipTypeId>,
    ) -> CoreResult<u64> {
        let types = type_id.map(|type_id| [type_id]);
        let types = types.as_ref().map(|types| &types[..]);
        let mut degree = self
            .committed_relationships(stores, node)?
            .iter()
            .filter(|record| matches(record, node, direction, types))
            .count() as u64;
        for overlay in [self.removed.get(&node), self.added.get(&node)]
            .into_iter()
            .flatten()
        {
            degree = match type_id {
                Some(type_id) => overlay.augment_degree_of_type(direction, type_id, degree),
                None => overlay.augment_degree(direction, degree),
            };
        }
        Ok(degree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageCache;
    use kernstore_storage::EphemeralFileSystem;
    use std::path::Path;
    use std::sync::Arc;
    use RelationshipDirection::{Both, Incoming, Outgoing};

    fn stores() -> (PageCache, NeoStores) {
        let cache = PageCache::new(Arc::new(EphemeralFileSystem::new()), 8192);
        let stores = NeoStores::open(&cache, Path::new("/db")).unwrap();
        (cache, stores)
    }

    #[test]
    fn cannot_write_after_commit_or_rollback() {
        let mut state = TxState::new();
        assert!(state.ensure_active().is_ok());
        state.mark_committed();
        assert!(state.ensure_active().is_err());
        let mut state = TxState::new();
        state.mark_rolled_back();
        assert!(matches!(
            state.ensure_active(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn created_then_deleted_relationship_leaves_no_trace() {
        let mut state = TxState::new();
        let record = RelationshipRecord::new(4, 1, 2, 0);
        state.relationship_created(record);
        assert_eq!(state.added_relationships(1).map(|c| c.strategy()), Some(DiffStrategy::Add));
        assert!(state.relationship_deleted(record));
        assert!(state.added_relationships(1).is_none());
        assert!(state.added_relationships(2).is_none());
        assert_eq!(state.created_relationships().count(), 0);
        assert_eq!(state.deleted_relationships().count(), 0);
        assert_eq!(state.discarded_relationship_ids().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn deleting_a_node_drops_its_property_writes() {
        let mut state = TxState::new();
        state.set_node_property(3, 1, Some(10));
        state.node_deleted(3);
        assert_eq!(state.node_property(3, 1), None);
        assert_eq!(state.node_property_changes().count(), 0);
        assert!(!state.is_empty());
    }

    #[test]
    fn degree_and_relationships_combine_store_and_overlays() {
        let (_cache, stores) = stores();
        for id in 0..3 {
            stores.nodes.update_record(&crate::store::NodeRecord::new(id)).unwrap();
        }
        stores.update_relationship(&RelationshipRecord::new(0, 0, 1, 5)).unwrap();
        stores.update_relationship(&RelationshipRecord::new(1, 2, 0, 5)).unwrap();
        stores.update_relationship(&RelationshipRecord::new(2, 0, 0, 6)).unwrap();

        let mut state = TxState::new();
        assert_eq!(state.visible_degree(&stores, 0, Both, None).unwrap(), 3);
        assert_eq!(state.visible_degree(&stores, 0, Outgoing, None).unwrap(), 2);

        state.relationship_deleted(RelationshipRecord::new(0, 0, 1, 5));
        state.relationship_created(RelationshipRecord::new(3, 0, 2, 7));
        state.relationship_created(RelationshipRecord::new(4, 0, 0, 5));

        assert_eq!(state.visible_degree(&stores, 0, Outgoing, None).unwrap(), 3);
        assert_eq!(state.visible_degree(&stores, 0, Incoming, None).unwrap(), 3);
        assert_eq!(state.visible_degree(&stores, 0, Both, Some(5)).unwrap(), 2);
        assert_eq!(state.visible_degree(&stores, 1, Both, None).unwrap(), 0);

        assert_eq!(
            state.visible_relationships(&stores, 0, Outgoing, None).unwrap(),
            vec![2, 3, 4]
        );
        assert_eq!(
            state.visible_relationships(&stores, 0, Incoming, Some(&[5])).unwrap(),
            vec![1, 4]
        );
    }

    #[test]
    fn new_node_has_no_committed_relationships() {
        let (_cache, stores) = stores();
        stores.update_relationship(&RelationshipRecord::new(0, 9, 8, 1)).unwrap();
        let mut state = TxState::new();
        state.node_created(9);
        assert_eq!(state.visible_degree(&stores, 9, Both, None).unwrap(), 0);
    }
}
