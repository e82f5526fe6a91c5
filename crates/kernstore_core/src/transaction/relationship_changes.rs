//! Per-node overlay of relationships added or removed by a transaction.

use crate::error::{CoreError, CoreResult};
use crate::types::{RelationshipDirection, RelationshipId, RelationshipTypeId};
use std::collections::{BTreeMap, BTreeSet};
use std::iter::Chain;
use std::vec;

/// How an overlay combines with the committed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStrategy {
    /// The overlay holds relationships created by the transaction.
    Add,
    /// The overlay holds committed relationships deleted by the transaction.
    Remove,
}

impl DiffStrategy {
    fn augment_degree(self, degree: u64, delta: u64) -> u64 {
        match self {
            Self::Add => degree.saturating_add(delta),
            Self::Remove => degree.saturating_sub(delta),
        }
    }
}

type TypedIds = BTreeMap<RelationshipTypeId, BTreeSet<RelationshipId>>;

/// Relationship ids of one node, grouped by direction and type.
///
/// Loops (start equals end) are kept apart and count towards every
/// direction. Types whose set becomes empty are dropped, but every type
/// ever added or removed stays in [`types_changed`](Self::types_changed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipChangesForNode {
    strategy: DiffStrategy,
    outgoing: TypedIds,
    incoming: TypedIds,
    loops: TypedIds,
    types_changed: BTreeSet<RelationshipTypeId>,
    total_outgoing: u64,
    total_incoming: u64,
    total_loops: u64,
}

impl RelationshipChangesForNode {
    /// Creates an empty overlay.
    #[must_use]
    pub const fn new(strategy: DiffStrategy) -> Self {
        Self {
            strategy,
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            loops: BTreeMap::new(),
            types_changed: BTreeSet::new(),
            total_outgoing: 0,
            total_incoming: 0,
            total_loops: 0,
        }
    }

    /// Returns the strategy.
    #[must_use]
    pub const fn strategy(&self) -> DiffStrategy {
        self.strategy
    }

    fn bucket_mut(&mut self, direction: RelationshipDirection) -> (&mut TypedIds, &mut u64) {
        match direction {
            RelationshipDirection::Outgoing => (&mut self.outgoing, &mut self.total_outgoing),
            RelationshipDirection::Incoming => (&mut self.incoming, &mut self.total_incoming),
            RelationshipDirection::Both => (&mut self.loops, &mut self.total_loops),
        }
    }

    fn buckets(&self, direction: RelationshipDirection) -> [Option<&TypedIds>; 2] {
        match direction {
            RelationshipDirection::Outgoing => [Some(&self.outgoing), None],
            RelationshipDirection::Incoming => [Some(&self.incoming), None],
            RelationshipDirection::Both => [Some(&self.outgoing), Some(&self.incoming)],
        }
    }

    /// Records a relationship. `Both` marks a loop.
    pub fn add_relationship(
        &mut self,
        id: RelationshipId,
        type_id: RelationshipTypeId,
        direction: RelationshipDirection,
    ) {
        self.types_changed.insert(type_id);
        let (ids, total) = self.bucket_mut(direction);
        if ids.entry(type_id).or_default().insert(id) {
            *total += 1;
        }
    }

    /// Forgets a relationship. Returns true if it was present.
    pub fn remove_relationship(
        &mut self,
        id: RelationshipId,
        type_id: RelationshipTypeId,
        direction: RelationshipDirection,
    ) -> bool {
        self.types_changed.insert(type_id);
        let (ids, total) = self.bucket_mut(direction);
        let Some(set) = ids.get_mut(&type_id) else {
            return false;
        };
        if !set.remove(&id) {
            return false;
        }
        if set.is_empty() {
            ids.remove(&type_id);
        }
        *total -= 1;
        true
    }

    /// Ids per bucket, loops last. With a type filter, sets follow the
    /// order of `types`; a repeated type is listed once.
    fn collect_ids(&self, direction: RelationshipDirection, types: Option<&[RelationshipTypeId]>) -> Vec<RelationshipId> {
        let [first, second] = self.buckets(direction);
        let buckets = [first, second, Some(&self.loops)].into_iter().flatten();
        let Some(types) = types else {
            return buckets.flat_map(BTreeMap::values).flatten().copied().collect();
        };
        let mut seen = BTreeSet::new();
        let types: Vec<_> = types.iter().copied().filter(|type_id| seen.insert(*type_id)).collect();
        buckets
            .flat_map(|ids| types.iter().filter_map(move |type_id| ids.get(type_id)))
            .flatten()
            .copied()
            .collect()
    }

    fn changes_in(ids: &TypedIds, type_id: RelationshipTypeId) -> impl Iterator<Item = RelationshipId> + '_ {
        ids.get(&type_id).into_iter().flatten().copied()
    }

    /// Returns the outgoing ids of one type, excluding loops.
    pub fn outgoing_changes(&self, type_id: RelationshipTypeId) -> impl Iterator<Item = RelationshipId> + '_ {
        Self::changes_in(&self.outgoing, type_id)
    }

    /// Returns the incoming ids of one type, excluding loops.
    pub fn incoming_changes(&self, type_id: RelationshipTypeId) -> impl Iterator<Item = RelationshipId> + '_ {
        Self::changes_in(&self.incoming, type_id)
    }

    /// Returns the loop ids of one type.
    pub fn loop_changes(&self, type_id: RelationshipTypeId) -> impl Iterator<Item = RelationshipId> + '_ {
        Self::changes_in(&self.loops, type_id)
    }

    /// Appends the overlay's ids in `direction` after `base`.
    ///
    /// # Errors
    ///
    /// Returns an error for a [`DiffStrategy::Remove`] overlay: removals are
    /// applied by filtering the base with [`contains`](Self::contains).
    pub fn augment_relationships<I>(
        &self,
        direction: RelationshipDirection,
        base: I,
    ) -> CoreResult<Chain<I, vec::IntoIter<RelationshipId>>>
    where
        I: Iterator<Item = RelationshipId>,
    {
        self.augment(direction, None, base)
    }

    /// Like [`augment_relationships`](Self::augment_relationships), limited
    /// to the given types and listing them in the order given.
    ///
    /// # Errors
    ///
    /// Same as [`augment_relationships`](Self::augment_relationships).
    pub fn augment_relationships_of_types<I>(
        &self,
        direction: RelationshipDirection,
        types: &[RelationshipTypeId],
        base: I,
    ) -> CoreResult<Chain<I, vec::IntoIter<RelationshipId>>>
    where
        I: Iterator<Item = RelationshipId>,
    {
        self.augment(direction, Some(types), base)
    }

    fn augment<I>(
        &self,
        direction: RelationshipDirection,
        types: Option<&[RelationshipTypeId]>,
        base: I,
    ) -> CoreResult<Chain<I, vec::IntoIter<RelationshipId>>>
    where
        I: Iterator<Item = RelationshipId>,
    {
        match self.strategy {
            DiffStrategy::Add => Ok(base.chain(self.collect_ids(direction, types))),
            DiffStrategy::Remove => Err(CoreError::invalid_operation(
                "removed relationships are filtered from the base, not appended",
            )),
        }
    }

    fn total(&self, direction: RelationshipDirection) -> u64 {
        let directed = match direction {
            RelationshipDirection::Outgoing => self.total_outgoing,
            RelationshipDirection::Incoming => self.total_incoming,
            RelationshipDirection::Both => self.total_outgoing + self.total_incoming,
        };
        directed + self.total_loops
    }

    /// Adjusts a committed degree by the overlay's count in `direction`.
    #[must_use]
    pub fn augment_degree(&self, direction: RelationshipDirection, degree: u64) -> u64 {
        self.strategy.augment_degree(degree, self.total(direction))
    }

    /// Adjusts a committed degree of one type by the overlay's count.
    #[must_use]
    pub fn augment_degree_of_type(
        &self,
        direction: RelationshipDirection,
        type_id: RelationshipTypeId,
        degree: u64,
    ) -> u64 {
        let count = self.collect_ids(direction, Some(&[type_id])).len() as u64;
        self.strategy.augment_degree(degree, count)
    }

    /// Returns every type with at least one id, in any direction.
    #[must_use]
    pub fn relationship_types(&self) -> BTreeSet<RelationshipTypeId> {
        self.outgoing
            .keys()
            .chain(self.incoming.keys())
            .chain(self.loops.keys())
            .copied()
            .collect()
    }

    /// Returns every type passed to an add or remove, including types whose
    /// ids are all gone again.
    #[must_use]
    pub const fn types_changed(&self) -> &BTreeSet<RelationshipTypeId> {
        &self.types_changed
    }

    /// Returns true if `id` is in the overlay.
    #[must_use]
    pub fn contains(&self, id: RelationshipId) -> bool {
        [&self.outgoing, &self.incoming, &self.loops]
            .into_iter()
            .flat_map(BTreeMap::values)
            .any(|set| set.contains(&id))
    }

    /// Returns true if the overlay holds no ids.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_outgoing == 0 && self.total_incoming == 0 && self.total_loops == 0
    }

    /// Removes every id.
    pub fn clear(&mut self) {
        *self = Self::new(self.strategy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use RelationshipDirection::{Both, Incoming, Outgoing};

    fn added() -> RelationshipChangesForNode {
        let mut changes = RelationshipChangesForNode::new(DiffStrategy::Add);
        changes.add_relationship(1, 7, Outgoing);
        changes.add_relationship(2, 8, Outgoing);
        changes.add_relationship(3, 7, Incoming);
        changes.add_relationship(4, 9, Both);
        changes
    }

    #[test]
    fn loops_count_in_every_direction() {
        let changes = added();
        assert_eq!(changes.augment_degree(Outgoing, 10), 13);
        assert_eq!(changes.augment_degree(Incoming, 10), 12);
        assert_eq!(changes.augment_degree(Both, 10), 14);
        assert_eq!(changes.augment_degree_of_type(Incoming, 9, 0), 1);
        assert_eq!(changes.augment_degree_of_type(Outgoing, 7, 0), 1);
    }

    #[test]
    fn added_ids_follow_the_base() {
        let changes = added();
        let ids: Vec<_> = changes
            .augment_relationships(Outgoing, [100, 101].into_iter())
            .unwrap()
            .collect();
        assert_eq!(ids, vec![100, 101, 1, 2, 4]);

        let ids: Vec<_> = changes
            .augment_relationships_of_types(Both, &[7], std::iter::empty())
            .unwrap()
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn type_filter_follows_the_requested_order() {
        let mut changes = RelationshipChangesForNode::new(DiffStrategy::Add);
        changes.add_relationship(10, 1, Outgoing);
        changes.add_relationship(20, 2, Outgoing);
        changes.add_relationship(30, 3, Outgoing);
        changes.add_relationship(40, 1, Both);
        changes.add_relationship(50, 3, Both);
        let ids: Vec<_> = changes
            .augment_relationships_of_types(Outgoing, &[3, 1, 3], [7].into_iter())
            .unwrap()
            .collect();
        assert_eq!(ids, vec![7, 30, 10, 50, 40]);
    }

    #[test]
    fn per_direction_changes_of_one_type() {
        let changes = added();
        assert_eq!(changes.outgoing_changes(7).collect::<Vec<_>>(), vec![1]);
        assert_eq!(changes.incoming_changes(7).collect::<Vec<_>>(), vec![3]);
        assert_eq!(changes.loop_changes(9).collect::<Vec<_>>(), vec![4]);
        assert_eq!(changes.loop_changes(7).count(), 0);
        assert_eq!(changes.outgoing_changes(42).count(), 0);
    }

    #[test]
    fn types_changed_outlives_emptied_sets() {
        let mut changes = added();
        assert!(changes.remove_relationship(2, 8, Outgoing));
        assert!(!changes.remove_relationship(99, 11, Incoming));
        assert_eq!(changes.relationship_types(), BTreeSet::from([7, 9]));
        assert_eq!(changes.types_changed(), &BTreeSet::from([7, 8, 9, 11]));
        changes.clear();
        assert!(changes.types_changed().is_empty());
    }

    #[test]
    fn removal_overlay_only_adjusts_counts() {
        let mut changes = RelationshipChangesForNode::new(DiffStrategy::Remove);
        changes.add_relationship(5, 1, Incoming);
        assert_eq!(changes.augment_degree(Incoming, 3), 2);
        assert_eq!(changes.augment_degree(Outgoing, 3), 3);
        assert_eq!(changes.augment_degree(Both, 0), 0);
        assert!(changes.contains(5));
        assert!(changes
            .augment_relationships(Incoming, std::iter::empty())
            .is_err());
    }

    #[test]
    fn emptied_type_is_dropped() {
        let mut changes = added();
        assert!(changes.remove_relationship(2, 8, Outgoing));
        assert!(!changes.remove_relationship(2, 8, Outgoing));
        assert!(!changes.remove_relationship(1, 7, Incoming));
        assert_eq!(changes.relationship_types(), BTreeSet::from([7, 9]));
        changes.clear();
        assert!(changes.is_empty());
        assert!(changes.relationship_types().is_empty());
    }

    fn direction() -> impl Strategy<Value = RelationshipDirection> {
        prop_oneof![Just(Outgoing), Just(Incoming), Just(Both)]
    }

    proptest! {
        #[test]
        fn degree_moves_by_the_overlay_total(
            rels in prop::collection::btree_map(0u64..1000, (0u32..4, direction()), 0..40),
            base in 0u64..1000,
            query in direction(),
        ) {
            let mut add = RelationshipChangesForNode::new(DiffStrategy::Add);
            let mut remove = RelationshipChangesForNode::new(DiffStrategy::Remove);
            for (id, (type_id, dir)) in &rels {
                add.add_relationship(*id, *type_id, *dir);
                remove.add_relationship(*id, *type_id, *dir);
            }
            let total = rels
                .values()
                .filter(|(_, dir)| *dir == Both || query == Both || *dir == query)
                .count() as u64;
            prop_assert_eq!(add.augment_degree(query, base), base + total);
            prop_assert_eq!(remove.augment_degree(query, base), base.saturating_sub(total));
            let listed = add.augment_relationships(query, std::iter::empty()).unwrap().count();
            prop_assert_eq!(listed as u64, total);
        }

        #[test]
        fn add_then_remove_restores_the_overlay(
            rels in prop::collection::btree_map(0u64..1000, (0u32..4, direction()), 0..20),
            id in 1000u64..2000,
            type_id in 0u32..8,
            dir in direction(),
        ) {
            let mut changes = RelationshipChangesForNode::new(DiffStrategy::Add);
            for (rel, (t, d)) in &rels {
                changes.add_relationship(*rel, *t, *d);
            }
            let view = |changes: &RelationshipChangesForNode| {
                let ids: Vec<_> = [Outgoing, Incoming, Both]
                    .into_iter()
                    .map(|dir| changes.augment_relationships(dir, std::iter::empty()).unwrap().collect::<Vec<_>>())
                    .collect();
                (ids, changes.relationship_types(), changes.augment_degree(Both, 0))
            };
            let before = view(&changes);
            changes.add_relationship(id, type_id, dir);
            prop_assert!(changes.remove_relationship(id, type_id, dir));
            prop_assert_eq!(view(&changes), before);
            prop_assert!(changes.types_changed().contains(&type_id));
        }
    }
}
