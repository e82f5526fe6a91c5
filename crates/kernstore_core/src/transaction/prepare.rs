//! Turning transaction state into store commands.

use super::state::{PropertyChanges, TxState};
use crate::command::Command;
use crate::error::{CoreError, CoreResult};
use crate::store::{NeoStores, NodeRecord, PropertyRecord, RelationshipRecord};
use crate::types::{NodeId, PropertyId, RelationshipDirection, RelationshipId};
use std::collections::BTreeMap;
use tracing::trace;

/// After-images of every record a transaction touches.
struct RecordChanges<'a> {
    stores: &'a NeoStores,
    nodes: BTreeMap<NodeId, NodeRecord>,
    relationships: BTreeMap<RelationshipId, RelationshipRecord>,
    properties: BTreeMap<PropertyId, PropertyRecord>,
    graph_head: Option<Option<PropertyId>>,
    allocated: Vec<PropertyId>,
}

impl<'a> RecordChanges<'a> {
    fn new(stores: &'a NeoStores) -> Self {
        Self {
            stores,
            nodes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            properties: BTreeMap::new(),
            graph_head: None,
            allocated: Vec::new(),
        }
    }

    fn node(&self, id: NodeId, created: bool) -> CoreResult<NodeRecord> {
        if let Some(record) = self.nodes.get(&id) {
            return Ok(*record);
        }
        if created {
            return Ok(NodeRecord::new(id));
        }
        self.stores
            .nodes
            .get_in_use(id)?
            .ok_or(CoreError::EntityNotFound { kind: "node", id })
    }

    fn release_chain(&mut self, head: Option<PropertyId>) -> CoreResult<()> {
        for mut record in self.stores.property_chain(head)? {
            record.in_use = false;
            record.next_prop = None;
            self.properties.insert(record.id, record);
        }
        Ok(())
    }

    /// Applies `changes` to the chain at `head` and returns the new head.
    ///
    /// New keys are prepended; removed records are unlinked and marked
    /// unused. Only records whose image changes are recorded.
    fn rewrite_chain(
        &mut self,
        head: Option<PropertyId>,
        changes: &PropertyChanges,
    ) -> CoreResult<Option<PropertyId>> {
        let original = self.stores.property_chain(head)?;
        let mut chain = original.clone();
        for (&key, &change) in changes {
            let existing = chain.iter().position(|record| record.key == key);
            match (existing, change) {
                (Some(index), Some(value)) => chain[index].value = value,
                (None, Some(value)) => {
                    let id = self.stores.properties.next_id();
                    self.allocated.push(id);
                    chain.insert(
                        0,
                        PropertyRecord {
                            id,
                            in_use: true,
                            key,
                            value,
                            next_prop: None,
                        },
                    );
                }
                (Some(index), None) => {
                    let mut record = chain.remove(index);
                    record.in_use = false;
                    record.next_prop = None;
                    self.properties.insert(record.id, record);
                }
                (None, None) => {}
            }
        }

        let next_ids: Vec<_> = chain.iter().skip(1).map(|record| Some(record.id)).collect();
        for (record, next) in chain.iter_mut().zip(next_ids.into_iter().chain([None])) {
            record.next_prop = next;
        }
        for record in &chain {
            if !original.contains(record) {
                self.properties.insert(record.id, *record);
            }
        }
        Ok(chain.first().map(|record| record.id))
    }

    fn into_commands(self, constraint_introduced: bool) -> Vec<Command> {
        let mut commands: Vec<Command> = self.nodes.into_values().map(Command::Node).collect();
        commands.extend(self.relationships.into_values().map(Command::Relationship));
        commands.extend(self.properties.into_values().map(Command::Property));
        if let Some(head) = self.graph_head {
            commands.push(Command::GraphNextProperty(head));
        }
        if constraint_introduced {
            commands.push(Command::ConstraintIntroduced);
        }
        commands
    }
}

fn validate(stores: &NeoStores, state: &TxState) -> CoreResult<()> {
    for node in state.deleted_nodes().chain(state.discarded_node_ids()) {
        let remaining = state.visible_degree(stores, node, RelationshipDirection::Both, None)?;
        if remaining > 0 {
            return Err(CoreError::invalid_record(format!(
                "node {node} is deleted but still has {remaining} relationships"
            )));
        }
    }
    for record in state.created_relationships() {
        for node in [record.start_node, record.end_node] {
            if state.is_node_deleted(node) {
                return Err(CoreError::invalid_record(format!(
                    "relationship {} references deleted node {node}",
                    record.id
                )));
            }
        }
    }
    Ok(())
}

fn collect(changes: &mut RecordChanges<'_>, state: &TxState) -> CoreResult<()> {
    for id in state.created_nodes() {
        changes.nodes.insert(id, NodeRecord::new(id));
    }
    for id in state.deleted_nodes() {
        let record = changes.node(id, false)?;
        changes.release_chain(record.next_prop)?;
        changes.nodes.insert(
            id,
            NodeRecord {
                id,
                in_use: false,
                next_prop: None,
            },
        );
    }
    for record in state.created_relationships() {
        changes.relationships.insert(record.id, *record);
    }
    for record in state.deleted_relationships() {
        let mut record = *record;
        record.in_use = false;
        changes.relationships.insert(record.id, record);
    }
    for (node, properties) in state.node_property_changes() {
        let mut record = changes.node(node, state.is_node_created(node))?;
        let head = changes.rewrite_chain(record.next_prop, properties)?;
        if head != record.next_prop || !changes.nodes.contains_key(&node) {
            record.next_prop = head;
            changes.nodes.insert(node, record);
        }
    }
    if !state.graph_property_changes().is_empty() {
        let current = changes.stores.meta.graph_next_prop()?;
        let head = changes.rewrite_chain(current, state.graph_property_changes())?;
        if head != current {
            changes.graph_head = Some(head);
        }
    }
    Ok(())
}

/// Validates `state` against the committed stores and produces the
/// commands that apply it.
///
/// Commands come out ordered nodes, relationships, properties, graph
/// property head, constraint marker; each carries the full after-image of
/// its record. Property ids allocated here are released again if
/// preparing fails.
///
/// # Errors
///
/// Returns an invalid record error if a deleted node keeps relationships
/// or a new relationship points at a deleted node, and read errors from
/// the stores.
pub fn prepare(stores: &NeoStores, state: &TxState) -> CoreResult<Vec<Command>> {
    validate(stores, state)?;
    let mut changes = RecordChanges::new(stores);
    match collect(&mut changes, state) {
        Ok(()) => {
            let commands = changes.into_commands(state.introduces_constraint());
            trace!(commands = commands.len(), "prepared transaction");
            Ok(commands)
        }
        Err(err) => {
            for id in changes.allocated {
                stores.properties.free_id(id);
            }
            Err(err)
        }
    }
}
