//! # Reclustering
//!
//! Decides whether a cluster still holds together after records left it, and
//! deletes or splits it when it does not.

use crate::cluster::Cluster;
use crate::error::{ClusterError, Result};
use crate::graph::OcnGraph;
use crate::large_clusters::LargeClusterSet;
use crate::model::{ClusterId, Ocn, Tuple};
use crate::resolver::resolve_in;
use crate::store::ClusterTxn;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info};

/// Which check proved the cluster still connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectedBy {
    /// At most one OCN.
    SingleOcn,
    /// Two OCNs joined by the cluster's only equivalence rule.
    SingleRule,
    /// An equivalence rule covers exactly the removed tuple.
    RuleRestoresBridge,
    /// An item's tuple covers the removed tuple.
    ItemRestoresBridge,
    /// Full graph traversal found one component.
    Traversal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclusterOutcome {
    /// The cluster had no records left and was removed.
    Deleted,
    Connected(ConnectedBy),
    /// The cluster was replaced by these clusters, one per component.
    Split(Vec<ClusterId>),
}

impl ReclusterOutcome {
    pub fn is_split(&self) -> bool {
        matches!(self, ReclusterOutcome::Split(_))
    }
}

/// Re-evaluate the connectivity of cluster `id` inside `txn`.
///
/// `removed` is the tuple of the record that just left the cluster, or empty
/// when no single removal prompted the check. A disconnected large cluster is
/// never split; the call fails with [`ClusterError::LargeClusterSplit`] and the
/// caller's transaction must be discarded.
pub fn recluster_in<T>(
    txn: &mut T,
    large: &LargeClusterSet,
    id: ClusterId,
    removed: &Tuple,
) -> Result<ReclusterOutcome>
where
    T: ClusterTxn + ?Sized,
{
    let Some(mut cluster) = txn.get(id)? else {
        return Err(ClusterError::InconsistentState(format!(
            "cluster {id} vanished before reclustering"
        )));
    };

    if !cluster.has_records() {
        txn.delete(id)?;
        debug!(cluster = %id, "deleted empty cluster");
        return Ok(ReclusterOutcome::Deleted);
    }

    if !removed.is_empty() {
        let remaining = cluster.record_ocns();
        if removed.iter().any(|ocn| !remaining.contains(ocn)) {
            cluster.ocns = remaining;
            txn.put(cluster.clone())?;
        }
    }

    if let Some(reason) = connected_without_traversal(&cluster, removed) {
        return Ok(ReclusterOutcome::Connected(reason));
    }

    let mut graph = OcnGraph::from_cluster(&cluster);
    let components = graph.components().to_vec();
    if components.len() <= 1 {
        return Ok(ReclusterOutcome::Connected(ConnectedBy::Traversal));
    }

    if cluster.is_large(large) {
        error!(
            cluster = %id,
            components = components.len(),
            ocns = cluster.ocns.len(),
            "large cluster is disconnected; refusing to split"
        );
        return Err(ClusterError::LargeClusterSplit {
            cluster: id,
            components: components.len(),
        });
    }

    split_in(txn, cluster, components).map(ReclusterOutcome::Split)
}

fn connected_without_traversal(cluster: &Cluster, removed: &Tuple) -> Option<ConnectedBy> {
    if cluster.ocns.len() <= 1 {
        return Some(ConnectedBy::SingleOcn);
    }
    if cluster.ocns.len() == 2 && cluster.rules.len() == 1 {
        let joins_both = cluster.rules.iter().all(|rule| {
            rule.variant != rule.canonical
                && cluster.ocns.contains(&rule.variant)
                && cluster.ocns.contains(&rule.canonical)
        });
        if joins_both {
            return Some(ConnectedBy::SingleRule);
        }
    }
    if removed.is_empty() {
        return None;
    }
    if cluster
        .rules
        .iter()
        .any(|rule| Tuple::from([rule.variant, rule.canonical]) == *removed)
    {
        return Some(ConnectedBy::RuleRestoresBridge);
    }
    if cluster.items.iter().any(|item| item.ocns.is_superset(removed)) {
        return Some(ConnectedBy::ItemRestoresBridge);
    }
    None
}

/// Replace `original` with one cluster per component, moving each record to
/// the component its tuple lies in.
fn split_in<T>(
    txn: &mut T,
    mut original: Cluster,
    components: Vec<Tuple>,
) -> Result<Vec<ClusterId>>
where
    T: ClusterTxn + ?Sized,
{
    let source = original.id;
    txn.delete(source)?;

    let mut owner: FxHashMap<Ocn, usize> = FxHashMap::default();
    let mut targets: Vec<Cluster> = Vec::with_capacity(components.len());
    for (index, component) in components.iter().enumerate() {
        let Some(target) = resolve_in(txn, component)? else {
            return Err(ClusterError::InconsistentState(format!(
                "cluster {source} produced an empty component"
            )));
        };
        if targets.iter().any(|existing| existing.id == target.id) {
            return Err(ClusterError::InconsistentState(format!(
                "components of cluster {source} resolved to the same cluster {}",
                target.id
            )));
        }
        owner.extend(component.iter().map(|&ocn| (ocn, index)));
        targets.push(target);
    }

    let moved = original.record_count();
    for record in original.drain_records() {
        // Components come from the records' own tuples, so one OCN decides.
        let index = record
            .ocns()
            .first()
            .and_then(|ocn| owner.get(ocn))
            .copied()
            .unwrap_or(0);
        targets[index].insert_record(record);
    }

    let mut ids = Vec::with_capacity(targets.len());
    for mut target in targets {
        target.recompute_ocns();
        target.touch();
        ids.push(target.id);
        txn.put(target)?;
    }

    info!(
        cluster = %source,
        into = ?ids,
        records = moved,
        "split disconnected cluster"
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{tuple_of, EquivalenceRule, Holding, Item};
    use crate::store::{ClusterStore, MemoryStore};
    use time::macros::date;

    fn seed(store: &MemoryStore, build: impl FnOnce(&mut Cluster)) -> ClusterId {
        let mut txn = store.begin().unwrap();
        let id = txn.allocate_id().unwrap();
        let mut cluster = Cluster::new(id, Tuple::new());
        build(&mut cluster);
        cluster.recompute_ocns();
        txn.put(cluster).unwrap();
        txn.commit().unwrap();
        id
    }

    fn recluster(
        store: &MemoryStore,
        large: &LargeClusterSet,
        id: ClusterId,
        removed: &[u64],
    ) -> Result<ReclusterOutcome> {
        let mut txn = store.begin()?;
        let outcome = recluster_in(&mut txn, large, id, &tuple_of(removed.iter().copied()))?;
        txn.commit()?;
        Ok(outcome)
    }

    #[test]
    fn test_empty_cluster_is_deleted() {
        let store = MemoryStore::new();
        let id = seed(&store, |_| {});
        let outcome = recluster(&store, &LargeClusterSet::default(), id, &[1]).unwrap();
        assert_eq!(outcome, ReclusterOutcome::Deleted);
        assert_eq!(store.cluster_count(), 0);
    }

    #[test]
    fn test_single_rule_cluster_skips_traversal() {
        let store = MemoryStore::new();
        let id = seed(&store, |c| {
            c.rules.upsert(EquivalenceRule::new(Ocn(1), Ocn(2)));
            c.holdings
                .upsert(Holding::new(Ocn(2), "umich", "h1", date!(2024 - 01 - 01)));
        });
        let outcome = recluster(&store, &LargeClusterSet::default(), id, &[1]).unwrap();
        assert_eq!(outcome, ReclusterOutcome::Connected(ConnectedBy::SingleRule));
    }

    #[test]
    fn test_item_covering_removed_tuple_skips_traversal() {
        let store = MemoryStore::new();
        let id = seed(&store, |c| {
            c.items.upsert(Item::new("wide", tuple_of([1u64, 2, 3])));
            c.items.upsert(Item::new("narrow", tuple_of([3u64, 4])));
        });
        let outcome = recluster(&store, &LargeClusterSet::default(), id, &[1, 2]).unwrap();
        assert_eq!(
            outcome,
            ReclusterOutcome::Connected(ConnectedBy::ItemRestoresBridge)
        );
    }

    #[test]
    fn test_disconnected_cluster_splits_without_losing_records() {
        let store = MemoryStore::new();
        let id = seed(&store, |c| {
            c.items.upsert(Item::new("left", tuple_of([1u64])));
            c.items.upsert(Item::new("right", tuple_of([2u64, 3])));
            c.holdings
                .upsert(Holding::new(Ocn(3), "umich", "h1", date!(2024 - 01 - 01)));
        });

        let outcome = recluster(&store, &LargeClusterSet::default(), id, &[1, 2]).unwrap();
        let ReclusterOutcome::Split(ids) = outcome else {
            panic!("expected split, got {outcome:?}");
        };
        assert_eq!(ids.len(), 2);
        assert!(store.snapshot(id).unwrap().is_none());

        let left = store.snapshot_for_ocn(Ocn(1)).unwrap().unwrap();
        let right = store.snapshot_for_ocn(Ocn(3)).unwrap().unwrap();
        assert_eq!(left.ocns, tuple_of([1u64]));
        assert_eq!(right.ocns, tuple_of([2u64, 3]));
        assert_eq!(left.record_count() + right.record_count(), 3);
        assert_eq!(right.holdings.len(), 1);
    }

    #[test]
    fn test_large_cluster_is_never_split() {
        let store = MemoryStore::new();
        let id = seed(&store, |c| {
            c.items.upsert(Item::new("left", tuple_of([1u64])));
            c.items.upsert(Item::new("right", tuple_of([2u64])));
        });
        let before = store.snapshot(id).unwrap().unwrap();
        let large = LargeClusterSet::new([Ocn(2)]);

        let err = recluster(&store, &large, id, &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            ClusterError::LargeClusterSplit { components: 2, .. }
        ));
        assert_eq!(store.snapshot(id).unwrap().unwrap(), before);
    }

    #[test]
    fn test_removed_ocn_leaves_closure() {
        let store = MemoryStore::new();
        let id = seed(&store, |c| {
            c.items.upsert(Item::new("a", tuple_of([1u64, 2])));
        });
        {
            let mut txn = store.begin().unwrap();
            let mut cluster = txn.get(id).unwrap().unwrap();
            cluster.ocns.insert(Ocn(9));
            txn.put(cluster).unwrap();
            txn.commit().unwrap();
        }
        recluster(&store, &LargeClusterSet::default(), id, &[9]).unwrap();
        assert!(store.snapshot_for_ocn(Ocn(9)).unwrap().is_none());
        assert_eq!(
            store.snapshot(id).unwrap().unwrap().ocns,
            tuple_of([1u64, 2])
        );
    }
}
