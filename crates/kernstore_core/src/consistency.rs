//! Full consistency check of a set of record stores.

use crate::error::{CoreError, CoreResult};
use crate::store::NeoStores;
use crate::types::{NodeId, PropertyId, RelationshipId};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Owner of a property chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOwner {
    /// A node.
    Node(NodeId),
    /// The graph itself.
    Graph,
}

impl fmt::Display for ChainOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Graph => f.write_str("graph"),
        }
    }
}

/// One problem found by the checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// A relationship endpoint is not an in-use node.
    DanglingRelationship {
        /// Relationship id.
        relationship: RelationshipId,
        /// The missing node.
        node: NodeId,
    },
    /// A property chain loops or reaches an unused record.
    BrokenPropertyChain {
        /// Chain owner.
        owner: ChainOwner,
        /// What went wrong.
        reason: String,
    },
    /// A property record is linked from two chains.
    SharedPropertyRecord {
        /// The shared record.
        property: PropertyId,
        /// First owner seen.
        first: ChainOwner,
        /// Second owner.
        second: ChainOwner,
    },
    /// Some committed transaction was never closed.
    TransactionsInFlight,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingRelationship { relationship, node } => {
                write!(f, "relationship {relationship} references missing node {node}")
            }
            Self::BrokenPropertyChain { owner, reason } => {
                write!(f, "property chain of {owner}: {reason}")
            }
            Self::SharedPropertyRecord {
                property,
                first,
                second,
            } => write!(f, "property {property} is linked from {first} and {second}"),
            Self::TransactionsInFlight => {
                f.write_str("closed transaction id is behind the committing one")
            }
        }
    }
}

/// Result of a consistency check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// In-use nodes checked.
    pub nodes: u64,
    /// In-use relationships checked.
    pub relationships: u64,
    /// Property records reached through chains.
    pub properties: u64,
    /// Problems found.
    pub inconsistencies: Vec<Inconsistency>,
}

impl ConsistencyReport {
    /// Returns true if nothing was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }
}

/// Walks every store and cross-checks references.
#[derive(Debug)]
pub struct ConsistencyChecker<'a> {
    stores: &'a NeoStores,
}

impl<'a> ConsistencyChecker<'a> {
    /// Creates a checker over `stores`.
    #[must_use]
    pub const fn new(stores: &'a NeoStores) -> Self {
        Self { stores }
    }

    /// Runs the full check.
    ///
    /// # Errors
    ///
    /// Returns an error only if a store cannot be read; problems in the
    /// data end up in the report.
    pub fn check(&self) -> CoreResult<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        let mut owners = BTreeMap::new();

        let mut heads = Vec::new();
        self.stores.nodes.scan(|node| {
            report.nodes += 1;
            heads.push((ChainOwner::Node(node.id), node.next_prop));
            Ok(true)
        })?;
        heads.push((ChainOwner::Graph, self.stores.meta.graph_next_prop()?));
        for (owner, head) in heads {
            self.check_chain(owner, head, &mut owners, &mut report)?;
        }

        self.stores.relationships.scan(|relationship| {
            report.relationships += 1;
            for node in [relationship.start_node, relationship.end_node] {
                if self.stores.nodes.get_in_use(node)?.is_none() {
                    report.inconsistencies.push(Inconsistency::DanglingRelationship {
                        relationship: relationship.id,
                        node,
                    });
                }
            }
            Ok(true)
        })?;

        if !self
            .stores
            .meta
            .closed_transaction_id_is_on_par_with_committing_transaction_id()
        {
            report.inconsistencies.push(Inconsistency::TransactionsInFlight);
        }

        for inconsistency in &report.inconsistencies {
            warn!(%inconsistency, "inconsistency found");
        }
        info!(
            nodes = report.nodes,
            relationships = report.relationships,
            properties = report.properties,
            inconsistencies = report.inconsistencies.len(),
            "consistency check finished"
        );
        Ok(report)
    }

    fn check_chain(
        &self,
        owner: ChainOwner,
        head: Option<PropertyId>,
        owners: &mut BTreeMap<PropertyId, ChainOwner>,
        report: &mut ConsistencyReport,
    ) -> CoreResult<()> {
        let chain = match self.stores.property_chain(head) {
            Ok(chain) => chain,
            Err(CoreError::InvalidRecord { message }) => {
                report.inconsistencies.push(Inconsistency::BrokenPropertyChain {
                    owner,
                    reason: message,
                });
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        for record in chain {
            report.properties += 1;
            if let Some(first) = owners.insert(record.id, owner) {
                report.inconsistencies.push(Inconsistency::SharedPropertyRecord {
                    property: record.id,
                    first,
                    second: owner,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageCache;
    use crate::store::{NodeRecord, PropertyRecord, RelationshipRecord};
    use kernstore_storage::EphemeralFileSystem;
    use std::path::Path;
    use std::sync::Arc;

    fn stores() -> (PageCache, NeoStores) {
        let cache = PageCache::new(Arc::new(EphemeralFileSystem::new()), 8192);
        let stores = NeoStores::open(&cache, Path::new("/db")).unwrap();
        (cache, stores)
    }

    fn property(id: u64, next_prop: Option<u64>) -> PropertyRecord {
        PropertyRecord {
            id,
            in_use: true,
            key: 1,
            value: 0,
            next_prop,
        }
    }

    #[test]
    fn empty_store_is_consistent() {
        let (_cache, stores) = stores();
        let report = ConsistencyChecker::new(&stores).check().unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.nodes, 0);
    }

    #[test]
    fn finds_dangling_relationships() {
        let (_cache, stores) = stores();
        stores.nodes.update_record(&NodeRecord::new(0)).unwrap();
        stores
            .relationships
            .update_record(&RelationshipRecord::new(0, 0, 5, 1))
            .unwrap();
        let report = ConsistencyChecker::new(&stores).check().unwrap();
        assert_eq!(
            report.inconsistencies,
            vec![Inconsistency::DanglingRelationship {
                relationship: 0,
                node: 5
            }]
        );
    }

    #[test]
    fn finds_broken_and_shared_chains() {
        let (_cache, stores) = stores();
        stores.properties.update_record(&property(0, Some(1))).unwrap();
        stores.properties.update_record(&property(1, Some(0))).unwrap();
        stores.properties.update_record(&property(2, None)).unwrap();
        let mut looping = NodeRecord::new(0);
        looping.next_prop = Some(0);
        let mut sharing = NodeRecord::new(1);
        sharing.next_prop = Some(2);
        stores.nodes.update_record(&looping).unwrap();
        stores.nodes.update_record(&sharing).unwrap();
        stores.meta.set_graph_next_prop(Some(2)).unwrap();

        let report = ConsistencyChecker::new(&stores).check().unwrap();
        assert_eq!(report.inconsistencies.len(), 2);
        assert!(matches!(
            report.inconsistencies[0],
            Inconsistency::BrokenPropertyChain {
                owner: ChainOwner::Node(0),
                ..
            }
        ));
        assert_eq!(
            report.inconsistencies[1].to_string(),
            "property 2 is linked from node 1 and graph"
        );
    }
}
