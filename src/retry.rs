//! # Transactional Retry
//!
//! Runs a unit of work inside a store transaction and re-runs the whole unit
//! from scratch when the commit loses a race. Only the read-modify-write as a
//! whole can be safely repeated, so the closure is the retry granularity.

use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::ClusterError;
use crate::store::{ClusterStore, ClusterTxn};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::warn;

/// Bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn no_retry() -> Self {
        Self { max_retries: 0 }
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the retry budget is spent. The last error is returned as-is.
    ///
    /// `operation` receives the zero-based attempt number.
    pub fn run<T, E, F, P>(&self, label: &str, is_retryable: P, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        operation = label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "retrying after transient conflict"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Run `work` in a fresh transaction, committing on success and retrying the
/// whole closure on transient conflicts.
///
/// Work that is already inside a transaction must not call this; it takes the
/// caller's `&mut Txn` and runs in the caller's transaction instead.
pub fn in_transaction<S, T, F>(
    store: &S,
    policy: &RetryPolicy,
    label: &str,
    mut work: F,
) -> Result<T, ClusterError>
where
    S: ClusterStore + ?Sized,
    F: FnMut(&mut S::Txn) -> Result<T, ClusterError>,
{
    policy.run(label, ClusterError::is_transient, |_attempt| {
        let mut txn = store.begin()?;
        let value = work(&mut txn)?;
        txn.commit()?;
        Ok(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::model::{tuple_of, ClusterId};
    use crate::store::MemoryStore;
    use std::cell::Cell;

    #[test]
    fn test_run_retries_transient_errors_up_to_budget() {
        let policy = RetryPolicy::new(5);
        let calls = Cell::new(0);
        let result: Result<(), ClusterError> =
            policy.run("always_conflicts", ClusterError::is_transient, |_| {
                calls.set(calls.get() + 1);
                Err(ClusterError::WriteConflict("busy".into()))
            });
        assert!(matches!(result, Err(ClusterError::WriteConflict(_))));
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn test_run_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0);
        let result: Result<(), ClusterError> =
            policy.run("fails_once", ClusterError::is_transient, |_| {
                calls.set(calls.get() + 1);
                Err(ClusterError::LargeClusterSplit {
                    cluster: ClusterId(1),
                    components: 2,
                })
            });
        assert!(matches!(result, Err(ClusterError::LargeClusterSplit { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_run_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3);
        let result = policy.run("flaky", ClusterError::is_transient, |attempt| {
            if attempt < 2 {
                Err(ClusterError::InconsistentState("moved".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_no_retry_policy_runs_once() {
        let calls = Cell::new(0);
        let _ = RetryPolicy::no_retry().run("once", ClusterError::is_transient, |_| {
            calls.set(calls.get() + 1);
            Err::<(), _>(ClusterError::WriteConflict("busy".into()))
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_in_transaction_reruns_whole_block_after_conflict() {
        let store = MemoryStore::new();
        let mut attempts = 0;

        let id = in_transaction(&store, &RetryPolicy::default(), "create", |txn| {
            attempts += 1;
            let owners = txn.clusters_with_any(&tuple_of([1u64]))?;
            if attempts == 1 {
                // A competing writer claims OCN 1 after this attempt read it.
                let mut rival = store.begin()?;
                let id = rival.allocate_id()?;
                rival.put(Cluster::new(id, tuple_of([1u64])))?;
                rival.commit()?;
            }
            match owners.into_iter().next() {
                Some(cluster) => Ok(cluster.id),
                None => {
                    let id = txn.allocate_id()?;
                    txn.put(Cluster::new(id, tuple_of([1u64])))?;
                    Ok(id)
                }
            }
        })
        .unwrap();

        assert_eq!(attempts, 2);
        let committed = store.snapshot_all().unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].id, id);
    }
}
