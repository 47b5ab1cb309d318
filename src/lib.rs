//! # OCN Clusters
//!
//! Incremental clustering of work-level catalog identifiers (OCNs).
//!
//! Records of four kinds (items, holdings, equivalence rules, commitments)
//! declare which OCNs co-occur. The engine keeps the OCNs partitioned into
//! disjoint clusters under concurrent writers: it merges clusters when a new
//! record bridges them and splits a cluster when a removal disconnects it.
//! Every mutation runs as one optimistic store transaction that is re-run from
//! scratch when it loses a race.

pub mod attach;
pub mod cluster;
pub mod config;
pub mod dsu;
pub mod error;
pub mod graph;
pub mod large_clusters;
pub mod model;
pub mod persistence;
pub mod recluster;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod test_support;

// Re-export main types for convenience
pub use attach::{AttachOutcome, DetachOutcome};
pub use cluster::Cluster;
pub use config::{ConfigError, EngineConfig};
pub use error::{ClusterError, ErrorCode, Result};
pub use large_clusters::LargeClusterSet;
pub use model::{
    tuple_of, ClusterId, Clusterable, ClusterableRecord, Commitment, EquivalenceRule, Holding,
    Item, Ocn, RecordKind, RecordRef, Tuple,
};
pub use persistence::PersistentStore;
pub use recluster::{ConnectedBy, ReclusterOutcome};
pub use retry::RetryPolicy;
pub use store::{ClusterStore, ClusterTxn, MemoryStore, StoreMetrics};

use retry::in_transaction;
use tracing::instrument;

/// Main API for cluster maintenance.
///
/// Mutating calls each run in their own retried transaction. Read calls return
/// committed snapshots and never change clustering.
pub struct ClusterEngine<S: ClusterStore = MemoryStore> {
    store: S,
    large: LargeClusterSet,
    retry: RetryPolicy,
}

impl ClusterEngine<MemoryStore> {
    /// In-memory engine with default retry policy and no large clusters.
    pub fn new() -> Self {
        Self::with_store(
            MemoryStore::new(),
            LargeClusterSet::default(),
            RetryPolicy::default(),
        )
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::with_store(
            MemoryStore::new(),
            config.large_cluster_set()?,
            config.retry,
        ))
    }
}

impl Default for ClusterEngine<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterEngine<PersistentStore> {
    /// Open the RocksDB-backed engine under `storage.data_dir`.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let Some(data_dir) = &config.storage.data_dir else {
            return Err(ConfigError::new("storage.data_dir is required for persistence").into());
        };
        let store = PersistentStore::open_with_options(data_dir, (&config.storage).into())?;
        Ok(Self::with_store(
            store,
            config.large_cluster_set()?,
            config.retry,
        ))
    }
}

impl<S: ClusterStore> ClusterEngine<S> {
    pub fn with_store(store: S, large: LargeClusterSet, retry: RetryPolicy) -> Self {
        Self {
            store,
            large,
            retry,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shared handle to the large-cluster OCNs; `replace` on it takes effect
    /// for the next operation.
    pub fn large_clusters(&self) -> &LargeClusterSet {
        &self.large
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Make sure `ocns` share one cluster and return it. Empty input resolves
    /// to `None`.
    ///
    /// This is a read-modify-write; reporting code should use
    /// [`ClusterEngine::cluster_for_ocn`] instead.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve(&self, ocns: &Tuple) -> Result<Option<Cluster>> {
        in_transaction(&self.store, &self.retry, "resolve", |txn| {
            resolver::resolve_in(txn, ocns)
        })
    }

    /// Attach a batch of same-kind records that share one OCN tuple.
    pub fn attach<I, R>(&self, batch: I) -> Result<AttachOutcome>
    where
        I: IntoIterator<Item = R>,
        R: Into<ClusterableRecord>,
    {
        let batch: Vec<ClusterableRecord> = batch.into_iter().map(Into::into).collect();
        if batch.is_empty() {
            return Ok(AttachOutcome::default());
        }
        in_transaction(&self.store, &self.retry, "attach", |txn| {
            attach::attach_in(txn, &self.large, &batch)
        })
    }

    /// Remove one record from its cluster.
    #[instrument(skip(self), level = "debug")]
    pub fn detach(&self, record: &RecordRef) -> Result<DetachOutcome> {
        in_transaction(&self.store, &self.retry, "detach", |txn| {
            attach::detach_in(txn, &self.large, record)
        })
    }

    /// Re-check connectivity of cluster `id` after `removed` left it.
    #[instrument(skip(self), level = "debug")]
    pub fn recluster(&self, id: ClusterId, removed: &Tuple) -> Result<ReclusterOutcome> {
        in_transaction(&self.store, &self.retry, "recluster", |txn| {
            recluster::recluster_in(txn, &self.large, id, removed)
        })
    }

    pub fn cluster(&self, id: ClusterId) -> Result<Option<Cluster>> {
        self.store.snapshot(id)
    }

    pub fn cluster_for_ocn(&self, ocn: Ocn) -> Result<Option<Cluster>> {
        self.store.snapshot_for_ocn(ocn)
    }

    pub fn cluster_for_record(&self, record: &RecordRef) -> Result<Option<Cluster>> {
        self.store.snapshot_for_record(record)
    }

    /// Every committed cluster, ordered by id.
    pub fn clusters(&self) -> Result<Vec<Cluster>> {
        self.store.snapshot_all()
    }

    pub fn cluster_count(&self) -> usize {
        self.store.cluster_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_round_trip() {
        let engine = ClusterEngine::new();
        let outcome = engine
            .attach([Item::new("i1", tuple_of([5u64, 6]))])
            .unwrap();
        assert_eq!(outcome.added, 1);

        let cluster = engine.cluster_for_ocn(Ocn(6)).unwrap().unwrap();
        assert_eq!(Some(cluster.id), outcome.cluster);
        assert_eq!(engine.cluster_count(), 1);

        engine.detach(&RecordRef::Item("i1".into())).unwrap();
        assert_eq!(engine.cluster_count(), 0);
    }

    #[test]
    fn test_open_requires_data_dir() {
        let err = ClusterEngine::<PersistentStore>::open(&EngineConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::Config);
    }

    #[test]
    fn test_from_config_loads_large_clusters() {
        let mut config = EngineConfig::default();
        config.large_clusters.ocns = vec![42];
        config.retry = RetryPolicy::new(2);
        let engine = ClusterEngine::from_config(&config).unwrap();
        assert!(engine.large_clusters().contains(Ocn(42)));
        assert_eq!(engine.retry_policy().max_retries, 2);
    }
}
