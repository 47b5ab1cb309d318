use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::macros::date;

use crate::cluster::Cluster;
use crate::graph::OcnGraph;
use crate::large_clusters::LargeClusterSet;
use crate::model::{
    tuple_of, Clusterable, ClusterableRecord, Commitment, EquivalenceRule, Holding, Item, Ocn,
    RecordRef, Tuple,
};
use hashbrown::HashMap;

pub fn item(id: &str, ocns: &[u64]) -> Item {
    Item::new(id, tuple_of(ocns.iter().copied()))
}

pub fn holding(ocn: u64, organization: &str, local_id: &str) -> Holding {
    Holding::new(Ocn(ocn), organization, local_id, date!(2024 - 01 - 15))
}

pub fn rule(variant: u64, canonical: u64) -> EquivalenceRule {
    EquivalenceRule::new(Ocn(variant), Ocn(canonical))
}

pub fn commitment(ocn: u64, organization: &str) -> Commitment {
    Commitment::new(Ocn(ocn), organization, "local", date!(2023 - 06 - 30))
}

/// Everything wrong with a set of committed clusters, as human-readable lines.
///
/// Checks that OCNs and records each live in exactly one cluster, that every
/// cluster's `ocns` is the union of its records' tuples, that no cluster is
/// empty, and that every cluster outside `large` is connected.
pub fn partition_violations(clusters: &[Cluster], large: &LargeClusterSet) -> Vec<String> {
    let mut violations = Vec::new();
    let mut ocn_owner: HashMap<Ocn, usize> = HashMap::new();
    let mut record_owner: HashMap<RecordRef, usize> = HashMap::new();

    for cluster in clusters {
        let id = cluster.id.0 as usize;
        if !cluster.has_records() {
            violations.push(format!("{} has no records", cluster.id));
        }
        let closure = cluster.record_ocns();
        if closure != cluster.ocns {
            violations.push(format!(
                "{} ocns {:?} differ from record closure {:?}",
                cluster.id, cluster.ocns, closure
            ));
        }
        for &ocn in &cluster.ocns {
            if let Some(other) = ocn_owner.insert(ocn, id) {
                violations.push(format!("{ocn} is in C{other} and {}", cluster.id));
            }
        }
        for record in cluster.record_refs() {
            if let Some(other) = record_owner.insert(record.clone(), id) {
                violations.push(format!("{record} is in C{other} and {}", cluster.id));
            }
        }
        if !cluster.is_large(large) && !OcnGraph::from_cluster(cluster).is_connected() {
            violations.push(format!("{} is disconnected", cluster.id));
        }
    }
    violations
}

/// Every record currently attached to any of `clusters`.
pub fn all_records(clusters: &[Cluster]) -> Vec<ClusterableRecord> {
    let mut records: Vec<ClusterableRecord> = Vec::new();
    for cluster in clusters {
        records.extend(cluster.items.iter().cloned().map(Into::into));
        records.extend(cluster.holdings.iter().cloned().map(Into::into));
        records.extend(cluster.rules.iter().copied().map(Into::into));
        records.extend(cluster.commitments.iter().cloned().map(Into::into));
    }
    records
}

/// Random items over a small OCN space so that tuples overlap often.
pub fn generate_items(count: usize, ocn_space: u64, max_tuple: usize, seed: u64) -> Vec<Item> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|index| {
            let len = rng.random_range(1..=max_tuple.max(1));
            let ocns: Tuple = (0..len)
                .map(|_| Ocn(rng.random_range(1..=ocn_space.max(1))))
                .collect();
            Item::new(format!("item-{index}"), ocns)
        })
        .collect()
}

/// Random equivalence rules over the same OCN space as [`generate_items`].
pub fn generate_rules(count: usize, ocn_space: u64, seed: u64) -> Vec<EquivalenceRule> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let variant = rng.random_range(1..=ocn_space.max(1));
            let canonical = rng.random_range(1..=ocn_space.max(1));
            rule(variant, canonical)
        })
        .collect()
}

/// Expected partition of `records` computed from scratch, as sorted OCN sets.
pub fn expected_partition<'a, T>(records: impl IntoIterator<Item = &'a T>) -> Vec<Tuple>
where
    T: Clusterable + 'a,
{
    let mut graph = OcnGraph::new();
    for record in records {
        graph.add_tuple(&record.ocns());
    }
    graph.components().to_vec()
}
