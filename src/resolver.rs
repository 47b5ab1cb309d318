//! # Cluster Resolver
//!
//! Get-or-create-or-merge: given the OCNs of a record, make sure exactly one
//! cluster covers all of them inside the caller's transaction.
//!
//! Callers may rely on the OCNs being co-located once the transaction
//! commits, but not on which cluster id survives a merge under concurrency.

use crate::cluster::Cluster;
use crate::error::{ClusterError, Result};
use crate::model::{ClusterId, RecordRef, Tuple};
use crate::store::ClusterTxn;
use tracing::{debug, info, warn};

/// Return the single cluster covering `ocns`, creating or merging clusters as
/// needed. An empty tuple resolves to nothing.
///
/// The returned cluster has already been written to `txn`.
pub fn resolve_in<T>(txn: &mut T, ocns: &Tuple) -> Result<Option<Cluster>>
where
    T: ClusterTxn + ?Sized,
{
    if ocns.is_empty() {
        return Ok(None);
    }

    let mut found = txn.clusters_with_any(ocns)?;
    let cluster = match found.len() {
        0 => {
            let id = txn.allocate_id()?;
            let cluster = Cluster::new(id, ocns.clone());
            debug!(cluster = %id, ocns = ocns.len(), "created cluster");
            txn.put(cluster.clone())?;
            cluster
        }
        1 => {
            let mut cluster = found.swap_remove(0);
            if !cluster.ocns.is_superset(ocns) {
                cluster.ocns.extend(ocns.iter().copied());
                txn.put(cluster.clone())?;
            }
            cluster
        }
        _ => merge_in(txn, found, ocns)?,
    };
    Ok(Some(cluster))
}

/// Fold every cluster in `found` into the one with the smallest id.
fn merge_in<T>(txn: &mut T, found: Vec<Cluster>, requested: &Tuple) -> Result<Cluster>
where
    T: ClusterTxn + ?Sized,
{
    let mut found = found.into_iter();
    let Some(mut target) = found.next() else {
        return Err(ClusterError::InconsistentState(
            "merge requested without candidate clusters".to_string(),
        ));
    };

    let mut absorbed: Vec<ClusterId> = Vec::new();
    for other in found {
        let id = other.id;
        let collisions = target.absorb(other);
        if collisions > 0 {
            warn!(
                cluster = %target.id,
                absorbed = %id,
                collisions,
                "records present in both merged clusters"
            );
        }
        txn.delete(id)?;
        absorbed.push(id);
    }
    target.ocns.extend(requested.iter().copied());
    target.touch();
    txn.put(target.clone())?;

    info!(
        cluster = %target.id,
        absorbed = ?absorbed,
        ocns = target.ocns.len(),
        records = target.record_count(),
        "merged clusters"
    );
    Ok(target)
}

/// Cluster for an item that carries no OCNs.
///
/// Such an item cannot share a cluster with anything else, so it reuses the
/// OCN-less cluster already holding the same item id, or gets a new one.
pub fn resolve_itemless_in<T>(txn: &mut T, item_id: &str) -> Result<Cluster>
where
    T: ClusterTxn + ?Sized,
{
    let record = RecordRef::Item(item_id.to_string());
    if let Some(cluster) = txn.cluster_with_record(&record)? {
        if cluster.ocns.is_empty() {
            return Ok(cluster);
        }
    }

    let id = txn.allocate_id()?;
    let cluster = Cluster::new(id, Tuple::new());
    debug!(cluster = %id, item = item_id, "created cluster for item without OCNs");
    txn.put(cluster.clone())?;
    Ok(cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{tuple_of, Item, Ocn};
    use crate::store::{ClusterStore, MemoryStore};

    fn commit_cluster(store: &MemoryStore, ocns: &[u64], item: Option<&str>) -> ClusterId {
        let mut txn = store.begin().unwrap();
        let tuple = tuple_of(ocns.iter().copied());
        let mut cluster = resolve_in(&mut txn, &tuple).unwrap().unwrap();
        if let Some(item_id) = item {
            cluster.items.upsert(Item::new(item_id, tuple));
            txn.put(cluster.clone()).unwrap();
        }
        txn.commit().unwrap();
        cluster.id
    }

    #[test]
    fn test_empty_tuple_resolves_to_nothing() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        assert!(resolve_in(&mut txn, &Tuple::new()).unwrap().is_none());
        txn.commit().unwrap();
        assert_eq!(store.cluster_count(), 0);
    }

    #[test]
    fn test_creates_cluster_with_requested_ocns() {
        let store = MemoryStore::new();
        commit_cluster(&store, &[5, 6], None);
        let cluster = store.snapshot_for_ocn(Ocn(5)).unwrap().unwrap();
        assert_eq!(cluster.ocns, tuple_of([5u64, 6]));
    }

    #[test]
    fn test_extends_single_overlapping_cluster() {
        let store = MemoryStore::new();
        let id = commit_cluster(&store, &[1, 2], None);
        let again = commit_cluster(&store, &[2, 3], None);
        assert_eq!(again, id);
        assert_eq!(
            store.snapshot(id).unwrap().unwrap().ocns,
            tuple_of([1u64, 2, 3])
        );
    }

    #[test]
    fn test_resolving_twice_is_stable() {
        let store = MemoryStore::new();
        commit_cluster(&store, &[8, 9], None);
        let before = store.snapshot_for_ocn(Ocn(8)).unwrap().unwrap();
        commit_cluster(&store, &[8, 9], None);
        let after = store.snapshot_for_ocn(Ocn(8)).unwrap().unwrap();
        assert_eq!(before.ocns, after.ocns);
        assert_eq!(store.metrics().commits, 1);
    }

    #[test]
    fn test_merges_many_clusters_into_smallest_id() {
        let store = MemoryStore::new();
        let first = commit_cluster(&store, &[1], Some("a"));
        commit_cluster(&store, &[2], Some("b"));
        commit_cluster(&store, &[3], Some("c"));

        let merged = commit_cluster(&store, &[3, 1, 2, 4], None);
        assert_eq!(merged, first);

        let clusters = store.snapshot_all().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].ocns, tuple_of([1u64, 2, 3, 4]));
        assert_eq!(clusters[0].items.len(), 3);
    }

    #[test]
    fn test_itemless_reuses_cluster_holding_same_item() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        let mut cluster = resolve_itemless_in(&mut txn, "naked").unwrap();
        cluster.items.upsert(Item::new("naked", Tuple::new()));
        txn.put(cluster.clone()).unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin().unwrap();
        assert_eq!(resolve_itemless_in(&mut txn, "naked").unwrap().id, cluster.id);
        assert_ne!(resolve_itemless_in(&mut txn, "other").unwrap().id, cluster.id);
    }
}
