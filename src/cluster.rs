//! # Cluster Aggregate
//!
//! A cluster owns its records in four per-kind collections, each indexed by
//! the kind's identity key so an incoming record can be matched in O(1).

use crate::large_clusters::LargeClusterSet;
use crate::model::{
    ClusterId, Clusterable, ClusterableRecord, Commitment, EquivalenceRule, Holding, Item, Ocn,
    RecordRef, Tuple,
};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Result of inserting a record by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
    Unchanged,
}

/// Arena of records of one kind, indexed by identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    from = "Vec<T>",
    into = "Vec<T>",
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct RecordSet<T: Clusterable> {
    entries: Vec<T>,
    by_key: HashMap<T::Key, usize>,
}

impl<T: Clusterable> RecordSet<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.by_key.get(key).map(|&index| &self.entries[index])
    }

    pub fn contains_key(&self, key: &T::Key) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn find<P>(&self, predicate: P) -> Option<&T>
    where
        P: FnMut(&&T) -> bool,
    {
        self.entries.iter().find(predicate)
    }

    /// Insert a new record or overwrite the one with the same key in place.
    pub fn upsert(&mut self, record: T) -> Upsert {
        let key = record.key();
        match self.by_key.get(&key) {
            Some(&index) if self.entries[index] == record => Upsert::Unchanged,
            Some(&index) => {
                self.entries[index] = record;
                Upsert::Updated
            }
            None => {
                self.by_key.insert(key, self.entries.len());
                self.entries.push(record);
                Upsert::Added
            }
        }
    }

    /// Replace the record stored under `key`, re-indexing if the key moved.
    pub fn replace(&mut self, key: &T::Key, record: T) -> Option<T> {
        let index = self.by_key.remove(key)?;
        let previous = std::mem::replace(&mut self.entries[index], record);
        self.by_key.insert(self.entries[index].key(), index);
        Some(previous)
    }

    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        let index = self.by_key.remove(key)?;
        let removed = self.entries.swap_remove(index);
        if let Some(moved) = self.entries.get(index) {
            self.by_key.insert(moved.key(), index);
        }
        Some(removed)
    }

    pub fn remove_where<P>(&mut self, predicate: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let index = self.entries.iter().position(predicate)?;
        let key = self.entries[index].key();
        self.remove(&key)
    }

    pub fn into_vec(self) -> Vec<T> {
        self.entries
    }
}

impl<T: Clusterable> Default for RecordSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clusterable> From<Vec<T>> for RecordSet<T> {
    fn from(records: Vec<T>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.upsert(record);
        }
        set
    }
}

impl<T: Clusterable> From<RecordSet<T>> for Vec<T> {
    fn from(set: RecordSet<T>) -> Self {
        set.entries
    }
}

impl<T: Clusterable> PartialEq for RecordSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

/// A maintained partition cell: OCNs known to belong together plus the
/// records attached to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub ocns: Tuple,
    pub items: RecordSet<Item>,
    pub holdings: RecordSet<Holding>,
    pub rules: RecordSet<EquivalenceRule>,
    pub commitments: RecordSet<Commitment>,
    pub last_modified: OffsetDateTime,
}

impl Cluster {
    pub fn new(id: ClusterId, ocns: Tuple) -> Self {
        Self {
            id,
            ocns,
            items: RecordSet::new(),
            holdings: RecordSet::new(),
            rules: RecordSet::new(),
            commitments: RecordSet::new(),
            last_modified: OffsetDateTime::now_utc(),
        }
    }

    /// Number of attached records of every kind.
    pub fn record_count(&self) -> usize {
        self.items.len() + self.holdings.len() + self.rules.len() + self.commitments.len()
    }

    pub fn has_records(&self) -> bool {
        self.record_count() > 0
    }

    /// Mark a size-affecting change.
    pub fn touch(&mut self) {
        self.last_modified = OffsetDateTime::now_utc();
    }

    pub fn is_large(&self, large: &LargeClusterSet) -> bool {
        large.intersects(&self.ocns)
    }

    /// OCN tuples of every attached record.
    pub fn tuples(&self) -> impl Iterator<Item = Tuple> + '_ {
        self.items
            .iter()
            .map(Clusterable::ocns)
            .chain(self.holdings.iter().map(Clusterable::ocns))
            .chain(self.rules.iter().map(Clusterable::ocns))
            .chain(self.commitments.iter().map(Clusterable::ocns))
    }

    /// Union of every attached record's tuple.
    pub fn record_ocns(&self) -> Tuple {
        self.tuples().flatten().collect()
    }

    /// Reset `ocns` to the union of the records' tuples. Returns whether it changed.
    pub fn recompute_ocns(&mut self) -> bool {
        let closure = self.record_ocns();
        if closure == self.ocns {
            return false;
        }
        self.ocns = closure;
        true
    }

    /// Whether the cluster currently owns the record behind `record`.
    pub fn contains(&self, record: &RecordRef) -> bool {
        match record {
            RecordRef::Item(item_id) => self.items.contains_key(item_id),
            RecordRef::Holding(uuid) => self.holdings.find(|h| h.uuid == *uuid).is_some(),
            RecordRef::EquivalenceRule(variant, canonical) => {
                self.rules.contains_key(&(*variant, *canonical))
            }
            RecordRef::Commitment(id) => self.commitments.contains_key(id),
        }
    }

    pub fn remove_record(&mut self, record: &RecordRef) -> Option<ClusterableRecord> {
        match record {
            RecordRef::Item(item_id) => self.items.remove(item_id).map(Into::into),
            RecordRef::Holding(uuid) => self
                .holdings
                .remove_where(|h| h.uuid == *uuid)
                .map(Into::into),
            RecordRef::EquivalenceRule(variant, canonical) => self
                .rules
                .remove(&(*variant, *canonical))
                .map(Into::into),
            RecordRef::Commitment(id) => self.commitments.remove(id).map(Into::into),
        }
    }

    /// Attach a record without identity merging rules beyond key equality.
    pub fn insert_record(&mut self, record: ClusterableRecord) -> Upsert {
        match record {
            ClusterableRecord::Item(item) => self.items.upsert(item),
            ClusterableRecord::Holding(holding) => self.holdings.upsert(holding),
            ClusterableRecord::EquivalenceRule(rule) => self.rules.upsert(rule),
            ClusterableRecord::Commitment(commitment) => self.commitments.upsert(commitment),
        }
    }

    /// Keys the store indexes this cluster's records under.
    pub fn record_refs(&self) -> impl Iterator<Item = RecordRef> + '_ {
        self.items
            .iter()
            .map(Clusterable::record_ref)
            .chain(self.holdings.iter().map(Clusterable::record_ref))
            .chain(self.rules.iter().map(Clusterable::record_ref))
            .chain(self.commitments.iter().map(Clusterable::record_ref))
    }

    /// Remove every record, leaving the cluster empty.
    pub fn drain_records(&mut self) -> Vec<ClusterableRecord> {
        let mut records = Vec::with_capacity(self.record_count());
        records.extend(std::mem::take(&mut self.items).into_vec().into_iter().map(Into::into));
        records.extend(std::mem::take(&mut self.holdings).into_vec().into_iter().map(Into::into));
        records.extend(std::mem::take(&mut self.rules).into_vec().into_iter().map(Into::into));
        records.extend(
            std::mem::take(&mut self.commitments)
                .into_vec()
                .into_iter()
                .map(Into::into),
        );
        records
    }

    /// Move every record and OCN of `other` into this cluster.
    ///
    /// Returns the number of records whose identity already existed here; the
    /// incoming copy overwrites those.
    pub fn absorb(&mut self, mut other: Cluster) -> usize {
        let mut collisions = 0;
        self.ocns.append(&mut other.ocns);
        for record in other.drain_records() {
            if self.insert_record(record) != Upsert::Added {
                collisions += 1;
            }
        }
        collisions
    }

    pub fn contains_ocn(&self, ocn: Ocn) -> bool {
        self.ocns.contains(&ocn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tuple_of;
    use time::macros::date;

    fn item(id: &str, ocns: &[u64]) -> Item {
        Item::new(id, tuple_of(ocns.iter().copied()))
    }

    #[test]
    fn test_record_set_upsert_tracks_identity() {
        let mut set = RecordSet::new();
        assert_eq!(set.upsert(item("a", &[1])), Upsert::Added);
        assert_eq!(set.upsert(item("a", &[1])), Upsert::Unchanged);
        assert_eq!(set.upsert(item("a", &[1, 2])), Upsert::Updated);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&"a".to_string()).map(|i| i.ocns.len()), Some(2));
    }

    #[test]
    fn test_record_set_remove_keeps_index_consistent() {
        let mut set: RecordSet<Item> = vec![item("a", &[1]), item("b", &[2]), item("c", &[3])].into();
        assert!(set.remove(&"a".to_string()).is_some());
        assert_eq!(set.len(), 2);
        assert!(set.get(&"c".to_string()).is_some());
        assert!(set.get(&"b".to_string()).is_some());
        assert!(set.remove(&"a".to_string()).is_none());
    }

    #[test]
    fn test_record_set_replace_reindexes() {
        let mut set: RecordSet<EquivalenceRule> =
            vec![EquivalenceRule::new(Ocn(1), Ocn(2))].into();
        set.replace(&(Ocn(1), Ocn(2)), EquivalenceRule::new(Ocn(1), Ocn(3)));
        assert!(!set.contains_key(&(Ocn(1), Ocn(2))));
        assert!(set.contains_key(&(Ocn(1), Ocn(3))));
    }

    #[test]
    fn test_recompute_ocns_is_union_of_tuples() {
        let mut cluster = Cluster::new(ClusterId(1), tuple_of([1u64, 2, 3, 9]));
        cluster.items.upsert(item("a", &[1, 2]));
        cluster
            .holdings
            .upsert(Holding::new(Ocn(3), "umich", "x", date!(2024 - 01 - 01)));
        assert!(cluster.recompute_ocns());
        assert_eq!(cluster.ocns, tuple_of([1u64, 2, 3]));
        assert!(!cluster.recompute_ocns());
    }

    #[test]
    fn test_absorb_moves_records_and_ocns() {
        let mut target = Cluster::new(ClusterId(1), tuple_of([1u64]));
        target.items.upsert(item("a", &[1]));
        let mut other = Cluster::new(ClusterId(2), tuple_of([2u64]));
        other.items.upsert(item("b", &[2]));
        other.rules.upsert(EquivalenceRule::new(Ocn(2), Ocn(5)));

        assert_eq!(target.absorb(other), 0);
        assert_eq!(target.record_count(), 3);
        assert_eq!(target.ocns, tuple_of([1u64, 2]));
    }

    #[test]
    fn test_remove_record_by_ref() {
        let mut cluster = Cluster::new(ClusterId(1), tuple_of([4u64]));
        let holding = Holding::new(Ocn(4), "umich", "x", date!(2024 - 01 - 01));
        let reference = holding.record_ref();
        cluster.holdings.upsert(holding);
        assert!(cluster.contains(&reference));
        assert!(cluster.remove_record(&reference).is_some());
        assert!(!cluster.has_records());
    }

    #[test]
    fn test_cluster_bincode_round_trip_rebuilds_index() {
        let mut cluster = Cluster::new(ClusterId(3), tuple_of([1u64, 2]));
        cluster.items.upsert(item("a", &[1, 2]));
        let bytes = bincode::serialize(&cluster).unwrap();
        let decoded: Cluster = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, cluster);
        assert!(decoded.items.contains_key(&"a".to_string()));
    }
}
