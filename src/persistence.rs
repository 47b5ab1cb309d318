//! RocksDB-backed cluster store.
//!
//! Concurrency control stays in memory; every committed change set is written
//! to RocksDB as one atomic batch before it becomes visible, and the whole
//! cluster table is loaded back on open.

use crate::cluster::Cluster;
use crate::config::StorageConfig;
use crate::model::{ClusterId, Ocn, RecordRef};
use crate::store::{ClusterChange, ClusterStore, CommitJournal, MemoryStore, MemoryTxn};
use anyhow::{anyhow, bail, Context, Result};
use rocksdb::{
    checkpoint::Checkpoint, ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options,
    WriteBatch, WriteOptions, DB,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const CF_CLUSTERS: &str = "clusters";
const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";
const KEY_COMMIT_SEQ: &[u8] = b"commit_seq";

const STORAGE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PersistentOpenOptions {
    pub repair: bool,
    pub sync_writes: bool,
}

impl Default for PersistentOpenOptions {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for PersistentOpenOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            repair: config.repair,
            sync_writes: config.sync_writes,
        }
    }
}

pub struct PersistentStore {
    inner: MemoryStore,
    db: ClusterDb,
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let db = ClusterDb::open(path, options.repair)?;
        let clusters = db.load_clusters()?;
        let commit_seq = db.metadata::<u64>(KEY_COMMIT_SEQ)?.unwrap_or(0);
        info!(
            path = %path.display(),
            clusters = clusters.len(),
            commit_seq,
            "opened cluster store"
        );

        let journal = RocksJournal {
            db: db.clone(),
            sync_writes: options.sync_writes,
        };
        let inner = MemoryStore::from_parts(clusters, commit_seq, Some(Box::new(journal)));
        Ok(Self { inner, db })
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Sequence number of the last durable commit.
    pub fn commit_seq(&self) -> u64 {
        self.inner.commit_seq()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.raw.flush_cf(self.db.family(CF_CLUSTERS)?)?;
        self.db.raw.flush_cf(self.db.family(CF_METADATA)?)?;
        Ok(())
    }

    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        Checkpoint::new(self.db.raw.as_ref())?
            .create_checkpoint(path)
            .with_context(|| format!("checkpointing cluster store to {}", path.display()))?;
        info!(
            path = %path.display(),
            commit_seq = self.commit_seq(),
            "checkpointed cluster store"
        );
        Ok(())
    }
}

impl ClusterStore for PersistentStore {
    type Txn = MemoryTxn;

    fn begin(&self) -> crate::error::Result<MemoryTxn> {
        self.inner.begin()
    }

    fn snapshot(&self, id: ClusterId) -> crate::error::Result<Option<Cluster>> {
        self.inner.snapshot(id)
    }

    fn snapshot_for_ocn(&self, ocn: Ocn) -> crate::error::Result<Option<Cluster>> {
        self.inner.snapshot_for_ocn(ocn)
    }

    fn snapshot_for_record(&self, record: &RecordRef) -> crate::error::Result<Option<Cluster>> {
        self.inner.snapshot_for_record(record)
    }

    fn snapshot_all(&self) -> crate::error::Result<Vec<Cluster>> {
        self.inner.snapshot_all()
    }

    fn cluster_count(&self) -> usize {
        self.inner.cluster_count()
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = %err, "flushing cluster store on close failed");
        }
    }
}

/// Handle over the cluster and metadata column families, shared by the
/// store and its journal.
#[derive(Clone)]
struct ClusterDb {
    raw: Arc<DB>,
}

impl ClusterDb {
    fn open(path: &Path, repair: bool) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        options.set_paranoid_checks(true);
        if repair {
            DB::repair(&options, path)
                .with_context(|| format!("repairing cluster store at {}", path.display()))?;
        }

        let families = [CF_CLUSTERS, CF_METADATA]
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let raw = DB::open_cf_descriptors(&options, path, families)
            .with_context(|| format!("opening cluster store at {}", path.display()))?;
        let db = Self { raw: Arc::new(raw) };
        db.check_manifest()?;
        Ok(db)
    }

    fn family(&self, name: &str) -> Result<&ColumnFamily> {
        self.raw
            .cf_handle(name)
            .with_context(|| format!("missing column family {name}"))
    }

    fn metadata<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        let Some(bytes) = self.raw.get_cf(self.family(CF_METADATA)?, key)? else {
            return Ok(None);
        };
        let value = bincode::deserialize(&bytes)
            .with_context(|| format!("decoding metadata {}", String::from_utf8_lossy(key)))?;
        Ok(Some(value))
    }

    /// Stamp a fresh store with the current format, or refuse one written in
    /// another format.
    fn check_manifest(&self) -> Result<()> {
        match self.metadata::<StorageManifest>(KEY_MANIFEST)? {
            Some(manifest) if manifest.format_version == STORAGE_FORMAT_VERSION => Ok(()),
            Some(manifest) => bail!(
                "cluster store format {} (written by {}) is not readable by format {}",
                manifest.format_version,
                manifest.app_version,
                STORAGE_FORMAT_VERSION
            ),
            None => {
                let manifest = StorageManifest {
                    format_version: STORAGE_FORMAT_VERSION,
                    app_version: env!("CARGO_PKG_VERSION").to_string(),
                };
                self.raw.put_cf(
                    self.family(CF_METADATA)?,
                    KEY_MANIFEST,
                    bincode::serialize(&manifest)?,
                )?;
                Ok(())
            }
        }
    }

    /// Every stored cluster, checked against the id its key was written under.
    fn load_clusters(&self) -> Result<Vec<Cluster>> {
        let mut clusters = Vec::new();
        for entry in self
            .raw
            .iterator_cf(self.family(CF_CLUSTERS)?, IteratorMode::Start)
        {
            let (key, value) = entry?;
            let id = cluster_id_from_key(&key)?;
            let cluster: Cluster = bincode::deserialize(&value)
                .with_context(|| format!("decoding cluster {id}"))?;
            if cluster.id != id {
                bail!("cluster stored under {id} claims id {}", cluster.id);
            }
            clusters.push(cluster);
        }
        Ok(clusters)
    }
}

struct RocksJournal {
    db: ClusterDb,
    sync_writes: bool,
}

impl CommitJournal for RocksJournal {
    fn record(&self, seq: u64, changes: &[ClusterChange<'_>]) -> Result<()> {
        let clusters_cf = self.db.family(CF_CLUSTERS)?;
        let mut batch = WriteBatch::default();
        for change in changes {
            match change {
                ClusterChange::Put(cluster) => {
                    let bytes = bincode::serialize(cluster)
                        .with_context(|| format!("encoding cluster {}", cluster.id))?;
                    batch.put_cf(clusters_cf, cluster_key(cluster.id), bytes);
                }
                ClusterChange::Delete(id) => batch.delete_cf(clusters_cf, cluster_key(*id)),
            }
        }
        batch.put_cf(
            self.db.family(CF_METADATA)?,
            KEY_COMMIT_SEQ,
            bincode::serialize(&seq)?,
        );

        let mut write_options = WriteOptions::default();
        write_options.set_sync(self.sync_writes);
        self.db
            .raw
            .write_opt(batch, &write_options)
            .with_context(|| format!("writing commit {seq}"))?;
        Ok(())
    }
}

fn cluster_key(id: ClusterId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn cluster_id_from_key(key: &[u8]) -> Result<ClusterId> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| anyhow!("malformed cluster key of {} bytes", key.len()))?;
    Ok(ClusterId(u64::from_be_bytes(bytes)))
}
