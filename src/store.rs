//! # Store Module
//!
//! The transactional boundary the engine runs against, plus an in-process
//! optimistic implementation.
//!
//! Transactions are explicit handles. Every read a transaction makes is
//! recorded (cluster versions and OCN / record index slots) and validated at
//! commit; a writer whose reads were invalidated by a concurrent commit gets
//! [`ClusterError::WriteConflict`]. The OCN index is unique across clusters and
//! a commit that would place one OCN in two clusters gets
//! [`ClusterError::DuplicateOcn`].

use crate::cluster::Cluster;
use crate::error::{ClusterError, Result};
use crate::model::{ClusterId, Ocn, RecordRef, Tuple};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One open transaction against a [`ClusterStore`].
///
/// Clusters are returned as working copies; changes become visible to the
/// rest of the transaction once `put`, and to everyone else on `commit`.
/// Dropping a transaction without committing discards it.
pub trait ClusterTxn {
    fn get(&mut self, id: ClusterId) -> Result<Option<Cluster>>;

    /// Clusters whose OCNs intersect `ocns`, ordered by id.
    fn clusters_with_any(&mut self, ocns: &Tuple) -> Result<Vec<Cluster>>;

    /// The cluster currently holding `record`, if any.
    fn cluster_with_record(&mut self, record: &RecordRef) -> Result<Option<Cluster>>;

    fn allocate_id(&mut self) -> Result<ClusterId>;

    fn put(&mut self, cluster: Cluster) -> Result<()>;

    fn delete(&mut self, id: ClusterId) -> Result<()>;

    fn commit(self) -> Result<()>
    where
        Self: Sized;
}

/// Shared store of clusters.
///
/// The `snapshot_*` reads see committed state only and never open a
/// transaction; they are meant for reporting and must not feed a write.
pub trait ClusterStore: Send + Sync {
    type Txn: ClusterTxn;

    fn begin(&self) -> Result<Self::Txn>;

    fn snapshot(&self, id: ClusterId) -> Result<Option<Cluster>>;

    fn snapshot_for_ocn(&self, ocn: Ocn) -> Result<Option<Cluster>>;

    fn snapshot_for_record(&self, record: &RecordRef) -> Result<Option<Cluster>>;

    fn snapshot_all(&self) -> Result<Vec<Cluster>>;

    fn cluster_count(&self) -> usize;
}

/// A committed change handed to a [`CommitJournal`].
#[derive(Debug, Clone, Copy)]
pub enum ClusterChange<'a> {
    Put(&'a Cluster),
    Delete(ClusterId),
}

/// Durable sink for committed change sets. Called under the commit lock after
/// validation; an error aborts the commit before it becomes visible.
pub trait CommitJournal: Send + Sync {
    fn record(&self, seq: u64, changes: &[ClusterChange<'_>]) -> anyhow::Result<()>;
}

/// Counters for store activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub commits: u64,
    pub conflicts: u64,
    pub clusters: usize,
}

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    cluster: Cluster,
}

#[derive(Debug, Default)]
struct StoreState {
    clusters: HashMap<ClusterId, Versioned>,
    ocn_index: HashMap<Ocn, ClusterId>,
    record_index: HashMap<RecordRef, ClusterId>,
    commit_seq: u64,
}

impl StoreState {
    fn version_of(&self, id: ClusterId) -> u64 {
        self.clusters.get(&id).map_or(0, |doc| doc.version)
    }

    fn slot_owner(&self, slot: &IndexSlot) -> Option<ClusterId> {
        match slot {
            IndexSlot::Ocn(ocn) => self.ocn_index.get(ocn).copied(),
            IndexSlot::Record(record) => self.record_index.get(record).copied(),
        }
    }

    fn index(&mut self, cluster: &Cluster) {
        for &ocn in &cluster.ocns {
            self.ocn_index.insert(ocn, cluster.id);
        }
        for record in cluster.record_refs() {
            self.record_index.insert(record, cluster.id);
        }
    }

    fn unindex(&mut self, cluster: &Cluster) {
        for ocn in &cluster.ocns {
            if self.ocn_index.get(ocn) == Some(&cluster.id) {
                self.ocn_index.remove(ocn);
            }
        }
        for record in cluster.record_refs() {
            if self.record_index.get(&record) == Some(&cluster.id) {
                self.record_index.remove(&record);
            }
        }
    }
}

struct StoreCore {
    state: RwLock<StoreState>,
    next_id: AtomicU64,
    journal: Option<Box<dyn CommitJournal>>,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl StoreCore {
    fn conflict(&self, reason: String) -> ClusterError {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        ClusterError::WriteConflict(reason)
    }
}

/// In-process optimistic cluster store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    core: Arc<StoreCore>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_parts(Vec::new(), 0, None)
    }

    /// Rebuild a store from committed clusters, journaling future commits.
    pub(crate) fn from_parts(
        clusters: Vec<Cluster>,
        commit_seq: u64,
        journal: Option<Box<dyn CommitJournal>>,
    ) -> Self {
        let mut state = StoreState {
            commit_seq,
            ..StoreState::default()
        };
        let mut next_id = 1;
        let version = commit_seq.max(1);
        for cluster in clusters {
            next_id = next_id.max(cluster.id.0 + 1);
            state.index(&cluster);
            state
                .clusters
                .insert(cluster.id, Versioned { version, cluster });
        }
        Self {
            core: Arc::new(StoreCore {
                state: RwLock::new(state),
                next_id: AtomicU64::new(next_id),
                journal,
                commits: AtomicU64::new(0),
                conflicts: AtomicU64::new(0),
            }),
        }
    }

    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            commits: self.core.commits.load(Ordering::Relaxed),
            conflicts: self.core.conflicts.load(Ordering::Relaxed),
            clusters: self.core.state.read().clusters.len(),
        }
    }

    pub(crate) fn commit_seq(&self) -> u64 {
        self.core.state.read().commit_seq
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStore for MemoryStore {
    type Txn = MemoryTxn;

    fn begin(&self) -> Result<MemoryTxn> {
        Ok(MemoryTxn {
            core: Arc::clone(&self.core),
            reads: HashMap::new(),
            index_reads: HashMap::new(),
            writes: BTreeMap::new(),
        })
    }

    fn snapshot(&self, id: ClusterId) -> Result<Option<Cluster>> {
        let state = self.core.state.read();
        Ok(state.clusters.get(&id).map(|doc| doc.cluster.clone()))
    }

    fn snapshot_for_ocn(&self, ocn: Ocn) -> Result<Option<Cluster>> {
        let state = self.core.state.read();
        Ok(state
            .ocn_index
            .get(&ocn)
            .and_then(|id| state.clusters.get(id))
            .map(|doc| doc.cluster.clone()))
    }

    fn snapshot_for_record(&self, record: &RecordRef) -> Result<Option<Cluster>> {
        let state = self.core.state.read();
        Ok(state
            .record_index
            .get(record)
            .and_then(|id| state.clusters.get(id))
            .map(|doc| doc.cluster.clone()))
    }

    fn snapshot_all(&self) -> Result<Vec<Cluster>> {
        let state = self.core.state.read();
        let mut clusters: Vec<Cluster> = state
            .clusters
            .values()
            .map(|doc| doc.cluster.clone())
            .collect();
        clusters.sort_by_key(|cluster| cluster.id);
        Ok(clusters)
    }

    fn cluster_count(&self) -> usize {
        self.core.state.read().clusters.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexSlot {
    Ocn(Ocn),
    Record(RecordRef),
}

/// Transaction handle for [`MemoryStore`].
pub struct MemoryTxn {
    core: Arc<StoreCore>,
    /// Version of every cluster this transaction observed (0 = absent).
    reads: HashMap<ClusterId, u64>,
    /// Owner of every index slot this transaction observed.
    index_reads: HashMap<IndexSlot, Option<ClusterId>>,
    /// Pending documents; `None` deletes.
    writes: BTreeMap<ClusterId, Option<Cluster>>,
}

impl MemoryTxn {
    fn observe_version(&mut self, id: ClusterId, version: u64) -> Result<()> {
        let recorded = *self.reads.entry(id).or_insert(version);
        if recorded != version {
            return Err(self
                .core
                .conflict(format!("cluster {id} changed during transaction")));
        }
        Ok(())
    }

    fn observe_slot(&mut self, slot: IndexSlot) -> Result<Option<ClusterId>> {
        let owner = self.core.state.read().slot_owner(&slot);
        let recorded = *self.index_reads.entry(slot).or_insert(owner);
        if recorded != owner {
            return Err(self
                .core
                .conflict("index entry changed during transaction".to_string()));
        }
        Ok(owner)
    }

    /// Record the committed version of a cluster this transaction is about to
    /// overwrite without having read it.
    fn observe_for_write(&mut self, id: ClusterId) -> Result<()> {
        if self.reads.contains_key(&id) || self.writes.contains_key(&id) {
            return Ok(());
        }
        let version = self.core.state.read().version_of(id);
        self.observe_version(id, version)
    }

    fn validate(&self, state: &StoreState) -> Result<()> {
        for (&id, &version) in &self.reads {
            if state.version_of(id) != version {
                return Err(self
                    .core
                    .conflict(format!("cluster {id} was modified by a concurrent writer")));
            }
        }
        for (slot, owner) in &self.index_reads {
            if state.slot_owner(slot) != *owner {
                let reason = match slot {
                    IndexSlot::Ocn(ocn) => format!("owner of {ocn} changed"),
                    IndexSlot::Record(record) => format!("owner of {record} changed"),
                };
                return Err(self.core.conflict(reason));
            }
        }
        Ok(())
    }

    fn check_unique_ocns(&self, state: &StoreState) -> Result<()> {
        let mut claimed: HashMap<Ocn, ClusterId> = HashMap::new();
        for (&id, doc) in &self.writes {
            let Some(cluster) = doc else { continue };
            for &ocn in &cluster.ocns {
                if let Some(existing) = claimed.insert(ocn, id) {
                    return Err(ClusterError::DuplicateOcn { ocn, existing });
                }
                if let Some(&owner) = state.ocn_index.get(&ocn) {
                    if owner != id && !self.writes.contains_key(&owner) {
                        return Err(ClusterError::DuplicateOcn {
                            ocn,
                            existing: owner,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl ClusterTxn for MemoryTxn {
    fn get(&mut self, id: ClusterId) -> Result<Option<Cluster>> {
        if let Some(pending) = self.writes.get(&id) {
            return Ok(pending.clone());
        }
        let (version, cluster) = {
            let state = self.core.state.read();
            match state.clusters.get(&id) {
                Some(doc) => (doc.version, Some(doc.cluster.clone())),
                None => (0, None),
            }
        };
        self.observe_version(id, version)?;
        Ok(cluster)
    }

    fn clusters_with_any(&mut self, ocns: &Tuple) -> Result<Vec<Cluster>> {
        let mut candidates = BTreeSet::new();
        for &ocn in ocns {
            candidates.extend(self.observe_slot(IndexSlot::Ocn(ocn))?);
        }
        for (&id, pending) in &self.writes {
            if matches!(pending, Some(cluster) if !cluster.ocns.is_disjoint(ocns)) {
                candidates.insert(id);
            }
        }

        let mut found = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(cluster) = self.get(id)? {
                if !cluster.ocns.is_disjoint(ocns) {
                    found.push(cluster);
                }
            }
        }
        Ok(found)
    }

    fn cluster_with_record(&mut self, record: &RecordRef) -> Result<Option<Cluster>> {
        let mut candidates = BTreeSet::new();
        candidates.extend(self.observe_slot(IndexSlot::Record(record.clone()))?);
        for (&id, pending) in &self.writes {
            if matches!(pending, Some(cluster) if cluster.contains(record)) {
                candidates.insert(id);
            }
        }

        for id in candidates {
            if let Some(cluster) = self.get(id)? {
                if cluster.contains(record) {
                    return Ok(Some(cluster));
                }
            }
        }
        Ok(None)
    }

    fn allocate_id(&mut self) -> Result<ClusterId> {
        Ok(ClusterId(self.core.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn put(&mut self, cluster: Cluster) -> Result<()> {
        self.observe_for_write(cluster.id)?;
        self.writes.insert(cluster.id, Some(cluster));
        Ok(())
    }

    fn delete(&mut self, id: ClusterId) -> Result<()> {
        self.observe_for_write(id)?;
        self.writes.insert(id, None);
        Ok(())
    }

    fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }

        let mut state = self.core.state.write();
        self.validate(&state)?;
        self.check_unique_ocns(&state)?;

        let seq = state.commit_seq + 1;
        if let Some(journal) = &self.core.journal {
            let changes: Vec<ClusterChange<'_>> = self
                .writes
                .iter()
                .map(|(&id, pending)| match pending {
                    Some(cluster) => ClusterChange::Put(cluster),
                    None => ClusterChange::Delete(id),
                })
                .collect();
            journal.record(seq, &changes)?;
        }

        state.commit_seq = seq;
        let written = self.writes.len();
        for (id, pending) in self.writes {
            if let Some(previous) = state.clusters.remove(&id) {
                state.unindex(&previous.cluster);
            }
            if let Some(cluster) = pending {
                state.index(&cluster);
                state.clusters.insert(
                    id,
                    Versioned {
                        version: seq,
                        cluster,
                    },
                );
            }
        }
        self.core.commits.fetch_add(1, Ordering::Relaxed);
        debug!(seq, clusters = written, "commit applied");
        Ok(())
    }
}
