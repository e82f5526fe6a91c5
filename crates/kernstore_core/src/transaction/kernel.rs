//! Kernel transactions.

use super::commit::CommitProcess;
use super::prepare::prepare;
use super::state::{TransactionState, TxState};
use crate::error::{CoreError, CoreResult};
use crate::store::{NeoStores, RelationshipRecord};
use crate::types::{
    NodeId, PropertyId, PropertyKeyId, RelationshipDirection, RelationshipId, RelationshipTypeId,
    TransactionId,
};
use tracing::trace;

/// A unit of work against the graph.
///
/// Writes are kept in a [`TxState`] until [`commit`](Self::commit); reads
/// made through the transaction see them. Dropping an uncommitted
/// transaction rolls it back. Nothing reaches the log before commit.
#[derive(Debug)]
pub struct KernelTransaction<'db> {
    stores: &'db NeoStores,
    commit_process: &'db CommitProcess,
    state: TxState,
    last_committed_when_started: TransactionId,
}

impl<'db> KernelTransaction<'db> {
    pub(crate) fn new(stores: &'db NeoStores, commit_process: &'db CommitProcess) -> Self {
        Self {
            stores,
            commit_process,
            state: TxState::new(),
            last_committed_when_started: stores.meta.last_committed_transaction_id(),
        }
    }

    /// Returns the pending changes.
    #[must_use]
    pub const fn state(&self) -> &TxState {
        &self.state
    }

    /// Returns the last committed id when the transaction began.
    #[must_use]
    pub const fn last_committed_when_started(&self) -> TransactionId {
        self.last_committed_when_started
    }

    fn ensure_node(&self, id: NodeId) -> CoreResult<()> {
        if self.node_exists(id)? {
            Ok(())
        } else {
            Err(CoreError::EntityNotFound { kind: "node", id })
        }
    }

    /// Creates a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is no longer active.
    pub fn create_node(&mut self) -> CoreResult<NodeId> {
        self.state.ensure_active()?;
        let id = self.stores.nodes.next_id();
        self.state.node_created(id);
        Ok(id)
    }

    /// Deletes a node. Its relationships must be deleted in the same
    /// transaction, which is checked on commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn delete_node(&mut self, id: NodeId) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.ensure_node(id)?;
        self.state.node_deleted(id);
        Ok(())
    }

    /// Creates a relationship of `type_id` from `start` to `end`.
    ///
    /// # Errors
    ///
    /// Returns an error if either node does not exist.
    pub fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        type_id: RelationshipTypeId,
    ) -> CoreResult<RelationshipId> {
        self.state.ensure_active()?;
        self.ensure_node(start)?;
        self.ensure_node(end)?;
        let id = self.stores.relationships.next_id();
        self.state
            .relationship_created(RelationshipRecord::new(id, start, end, type_id));
        Ok(id)
    }

    /// Deletes a relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if the relationship does not exist.
    pub fn delete_relationship(&mut self, id: RelationshipId) -> CoreResult<()> {
        self.state.ensure_active()?;
        let record = self.relationship(id)?.ok_or(CoreError::EntityNotFound {
            kind: "relationship",
            id,
        })?;
        if self.state.relationship_deleted(record) {
            trace!(id, "deleted relationship created in this transaction");
        }
        Ok(())
    }

    /// Sets a node property.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn set_node_property(&mut self, node: NodeId, key: PropertyKeyId, value: i64) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.ensure_node(node)?;
        self.state.set_node_property(node, key, Some(value));
        Ok(())
    }

    /// Removes a node property and returns its previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn remove_node_property(&mut self, node: NodeId, key: PropertyKeyId) -> CoreResult<Option<i64>> {
        self.state.ensure_active()?;
        let previous = self.node_property(node, key)?;
        self.state.set_node_property(node, key, None);
        Ok(previous)
    }

    /// Sets a graph property.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is no longer active.
    pub fn set_graph_property(&mut self, key: PropertyKeyId, value: i64) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.state.set_graph_property(key, Some(value));
        Ok(())
    }

    /// Removes a graph property and returns its previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the property chain cannot be read.
    pub fn remove_graph_property(&mut self, key: PropertyKeyId) -> CoreResult<Option<i64>> {
        self.state.ensure_active()?;
        let previous = self.graph_property(key)?;
        self.state.set_graph_property(key, None);
        Ok(previous)
    }

    /// Marks this transaction as introducing a schema constraint.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is no longer active.
    pub fn introduce_constraint(&mut self) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.state.constraint_introduced();
        Ok(())
    }

    /// Returns true if the node exists as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns an error if the node store cannot be read.
    pub fn node_exists(&self, id: NodeId) -> CoreResult<bool> {
        if self.state.is_node_deleted(id) {
            return Ok(false);
        }
        if self.state.is_node_created(id) {
            return Ok(true);
        }
        Ok(self.stores.nodes.get_in_use(id)?.is_some())
    }

    /// Returns the relationship as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns an error if the relationship store cannot be read.
    pub fn relationship(&self, id: RelationshipId) -> CoreResult<Option<RelationshipRecord>> {
        if self.state.is_relationship_deleted(id) {
            return Ok(None);
        }
        if let Some(record) = self.state.created_relationship(id) {
            return Ok(Some(*record));
        }
        self.stores.relationships.get_in_use(id)
    }

    fn committed_property(&self, head: Option<PropertyId>, key: PropertyKeyId) -> CoreResult<Option<i64>> {
        Ok(self
            .stores
            .property_chain(head)?
            .into_iter()
            .find(|record| record.key == key)
            .map(|record| record.value))
    }

    /// Returns a node property as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn node_property(&self, node: NodeId, key: PropertyKeyId) -> CoreResult<Option<i64>> {
        self.ensure_node(node)?;
        if let Some(change) = self.state.node_property(node, key) {
            return Ok(change);
        }
        if self.state.is_node_created(node) {
            return Ok(None);
        }
        let head = self
            .stores
            .nodes
            .get_in_use(node)?
            .and_then(|record| record.next_prop);
        self.committed_property(head, key)
    }

    /// Returns a graph property as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns an error if the property chain cannot be read.
    pub fn graph_property(&self, key: PropertyKeyId) -> CoreResult<Option<i64>> {
        if let Some(change) = self.state.graph_property(key) {
            return Ok(change);
        }
        self.committed_property(self.stores.meta.graph_next_prop()?, key)
    }

    /// Returns the relationships of `node` in `direction`, optionally only
    /// of the given types. Committed relationships come first.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn node_relationships(
        &self,
        node: NodeId,
        direction: RelationshipDirection,
        types: Option<&[RelationshipTypeId]>,
    ) -> CoreResult<Vec<RelationshipId>> {
        self.ensure_node(node)?;
        self.state
            .visible_relationships(self.stores, node, direction, types)
    }

    /// Returns the number of relationships of `node` in `direction`,
    /// optionally of one type. Loops count in every direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    pub fn node_degree(
        &self,
        node: NodeId,
        direction: RelationshipDirection,
        type_id: Option<RelationshipTypeId>,
    ) -> CoreResult<u64> {
        self.ensure_node(node)?;
        self.state.visible_degree(self.stores, node, direction, type_id)
    }

    fn release_ids(&self, all: bool) {
        if all {
            for id in self.state.allocated_node_ids() {
                self.stores.nodes.free_id(id);
            }
            for id in self.state.allocated_relationship_ids() {
                self.stores.relationships.free_id(id);
            }
        } else {
            for id in self.state.discarded_node_ids() {
                self.stores.nodes.free_id(id);
            }
            for id in self.state.discarded_relationship_ids() {
                self.stores.relationships.free_id(id);
            }
        }
    }

    /// Commits the transaction. Returns `None` for a transaction without
    /// changes, which is not logged.
    ///
    /// On failure the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// Returns an invalid record error if validation fails, and a
    /// transaction failure if the commit could not be logged or applied.
    pub fn commit(mut self) -> CoreResult<Option<TransactionId>> {
        self.state.ensure_active()?;
        let state = &self.state;
        let result = self.commit_process.commit(
            self.stores,
            self.last_committed_when_started,
            |stores| prepare(stores, state),
        );
        match result {
            Ok(tx_id) => {
                self.release_ids(false);
                self.state.mark_committed();
                Ok(tx_id)
            }
            Err(err) => {
                // Records may already be applied when the commit itself failed.
                let applied = matches!(err, CoreError::TransactionFailure { .. });
                self.release_ids(!applied);
                self.state.mark_rolled_back();
                Err(err)
            }
        }
    }

    /// Discards every change.
    pub fn rollback(mut self) {
        self.roll_back();
    }

    fn roll_back(&mut self) {
        if self.state.state() == TransactionState::Active {
            self.release_ids(true);
            self.state.mark_rolled_back();
            trace!("rolled back transaction");
        }
    }
}

impl Drop for KernelTransaction<'_> {
    fn drop(&mut self) {
        self.roll_back();
    }
}
