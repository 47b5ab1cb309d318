//! # Record Attachment
//!
//! Adds batches of same-kind records to the cluster spanning their OCNs and
//! removes single records, reclustering whenever connectivity may have
//! changed. Every function here runs inside the caller's transaction.

use crate::cluster::{Cluster, Upsert};
use crate::error::{ClusterError, Result};
use crate::large_clusters::LargeClusterSet;
use crate::model::{ClusterId, ClusterableRecord, Holding, RecordKind, RecordRef, Tuple};
use crate::recluster::{recluster_in, ReclusterOutcome};
use crate::resolver::{resolve_in, resolve_itemless_in};
use crate::store::ClusterTxn;
use hashbrown::HashSet;
use tracing::debug;

/// What an attach did to the cluster it resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOutcome {
    /// Cluster the batch was attached to; `None` for an empty batch.
    pub cluster: Option<ClusterId>,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Items or commitments moved here from another cluster.
    pub relocated: usize,
    pub recluster: Option<ReclusterOutcome>,
}

impl AttachOutcome {
    fn record(&mut self, change: Upsert) {
        match change {
            Upsert::Added => self.added += 1,
            Upsert::Updated => self.updated += 1,
            Upsert::Unchanged => self.unchanged += 1,
        }
    }

    pub fn changed(&self) -> bool {
        self.added > 0 || self.updated > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachOutcome {
    pub cluster: ClusterId,
    pub removed: ClusterableRecord,
    pub recluster: ReclusterOutcome,
}

/// Attach a batch of records of one kind sharing one OCN tuple.
pub fn attach_in<T>(
    txn: &mut T,
    large: &LargeClusterSet,
    batch: &[ClusterableRecord],
) -> Result<AttachOutcome>
where
    T: ClusterTxn + ?Sized,
{
    let Some((kind, ocns)) = validate_batch(batch)? else {
        return Ok(AttachOutcome::default());
    };

    let mut cluster = match (resolve_in(txn, &ocns)?, &batch[0]) {
        (Some(cluster), _) => cluster,
        (None, ClusterableRecord::Item(item)) => resolve_itemless_in(txn, &item.item_id)?,
        (None, _) => {
            return Err(ClusterError::invalid_batch(kind, "record carries no OCN"));
        }
    };

    let mut outcome = AttachOutcome {
        cluster: Some(cluster.id),
        ..AttachOutcome::default()
    };
    if matches!(kind, RecordKind::Item | RecordKind::Commitment) {
        outcome.relocated = relocate_in(txn, large, batch, cluster.id)?;
    }

    let large_cluster = cluster.is_large(large);
    for record in batch {
        let change = match record {
            ClusterableRecord::Item(item) => cluster.items.upsert(item.clone()),
            ClusterableRecord::Holding(holding) => {
                merge_holding_in(txn, &mut cluster, holding, large_cluster)?
            }
            ClusterableRecord::EquivalenceRule(rule) => cluster.rules.upsert(*rule),
            ClusterableRecord::Commitment(commitment) => {
                cluster.commitments.upsert(commitment.clone())
            }
        };
        outcome.record(change);
    }

    if !outcome.changed() {
        return Ok(outcome);
    }
    if outcome.added > 0 {
        cluster.touch();
    }
    cluster.recompute_ocns();
    let id = cluster.id;
    txn.put(cluster)?;
    debug!(
        cluster = %id,
        kind = %kind,
        added = outcome.added,
        updated = outcome.updated,
        "attached batch"
    );

    if kind.reclusters_on_attach() {
        outcome.recluster = Some(recluster_in(txn, large, id, &Tuple::new())?);
    }
    Ok(outcome)
}

/// Remove one record from whichever cluster holds it.
pub fn detach_in<T>(
    txn: &mut T,
    large: &LargeClusterSet,
    record: &RecordRef,
) -> Result<DetachOutcome>
where
    T: ClusterTxn + ?Sized,
{
    let Some(mut cluster) = txn.cluster_with_record(record)? else {
        return Err(ClusterError::NotFound(record.clone()));
    };
    let Some(removed) = cluster.remove_record(record) else {
        return Err(ClusterError::InconsistentState(format!(
            "{record} left cluster {} during detach",
            cluster.id
        )));
    };
    cluster.touch();
    let id = cluster.id;
    txn.put(cluster)?;

    let recluster = recluster_in(txn, large, id, &removed.ocns())?;
    debug!(cluster = %id, record = %record, outcome = ?recluster, "detached record");
    Ok(DetachOutcome {
        cluster: id,
        removed,
        recluster,
    })
}

/// Check the batch preconditions and return its kind and shared tuple.
fn validate_batch(batch: &[ClusterableRecord]) -> Result<Option<(RecordKind, Tuple)>> {
    let Some(first) = batch.first() else {
        return Ok(None);
    };
    let kind = first.kind();
    let ocns = first.ocns();

    for record in &batch[1..] {
        if record.kind() != kind {
            return Err(ClusterError::invalid_batch(
                kind,
                format!("batch mixes {kind} and {} records", record.kind()),
            ));
        }
        if record.ocns() != ocns {
            return Err(ClusterError::invalid_batch(
                kind,
                "records in one batch must carry identical OCN tuples",
            ));
        }
    }
    if ocns.is_empty() && batch.len() > 1 {
        return Err(ClusterError::invalid_batch(
            kind,
            "records without OCNs must be attached one at a time",
        ));
    }

    if kind == RecordKind::Commitment {
        let mut seen = HashSet::new();
        for record in batch {
            if let ClusterableRecord::Commitment(commitment) = record {
                if !seen.insert(commitment.id) {
                    return Err(ClusterError::DuplicateIdentity {
                        kind,
                        identity: commitment.id.to_string(),
                    });
                }
            }
        }
    }
    Ok(Some((kind, ocns)))
}

/// Pull items and commitments of the batch out of any other cluster that
/// still holds a stale copy, reclustering what they leave behind.
///
/// Both kinds keep their identity key across OCN changes.
fn relocate_in<T>(
    txn: &mut T,
    large: &LargeClusterSet,
    batch: &[ClusterableRecord],
    target: ClusterId,
) -> Result<usize>
where
    T: ClusterTxn + ?Sized,
{
    let mut relocated = 0;
    for record in batch {
        if !matches!(
            record,
            ClusterableRecord::Item(_) | ClusterableRecord::Commitment(_)
        ) {
            continue;
        }
        let reference = record.record_ref();
        let Some(mut stale) = txn.cluster_with_record(&reference)? else {
            continue;
        };
        if stale.id == target {
            continue;
        }
        let Some(previous) = stale.remove_record(&reference) else {
            continue;
        };

        let source = stale.id;
        stale.touch();
        stale.recompute_ocns();
        txn.put(stale)?;
        let outcome = recluster_in(txn, large, source, &previous.ocns())?;
        debug!(
            record = %reference,
            from = %source,
            to = %target,
            outcome = ?outcome,
            "relocated record"
        );
        relocated += 1;
    }
    Ok(relocated)
}

/// Merge one incoming holding into `cluster`.
///
/// A holding sharing a uuid with a stored one must be identical to it. Large
/// clusters keep one holding per organization and refresh it in place.
fn merge_holding_in<T>(
    txn: &mut T,
    cluster: &mut Cluster,
    incoming: &Holding,
    large_cluster: bool,
) -> Result<Upsert>
where
    T: ClusterTxn + ?Sized,
{
    let local = cluster
        .holdings
        .find(|holding| holding.uuid == incoming.uuid)
        .cloned();
    let (existing, in_cluster) = match local {
        Some(holding) => (Some(holding), true),
        None => {
            let reference = RecordRef::Holding(incoming.uuid);
            let elsewhere = txn.cluster_with_record(&reference)?.and_then(|other| {
                other
                    .holdings
                    .find(|holding| holding.uuid == incoming.uuid)
                    .cloned()
            });
            (elsewhere, false)
        }
    };

    if let Some(existing) = existing {
        if existing == *incoming {
            return Ok(Upsert::Unchanged);
        }
        let refresh = large_cluster && in_cluster && existing.organization == incoming.organization;
        if !refresh {
            return Err(ClusterError::DataIntegrity {
                cluster: cluster.id,
                reason: format!(
                    "holding {} from {} differs from the stored holding with the same uuid",
                    incoming.uuid, incoming.organization
                ),
            });
        }
    }

    if !large_cluster {
        return Ok(cluster.holdings.upsert(incoming.clone()));
    }

    let Some(stored) = cluster
        .holdings
        .find(|holding| holding.organization == incoming.organization)
        .cloned()
    else {
        return Ok(cluster.holdings.upsert(incoming.clone()));
    };
    let mut refreshed = stored.clone();
    refreshed.date_received = incoming.date_received;
    refreshed.uuid = incoming.uuid;
    if refreshed == stored {
        return Ok(Upsert::Unchanged);
    }
    cluster.holdings.replace(&stored.update_key(), refreshed);
    Ok(Upsert::Updated)
}
