//! OCNs known to have extreme fan-in.
//!
//! A cluster whose OCNs intersect this set dedupes holdings per organization
//! and is never split automatically. The set is shared and can be swapped at
//! runtime when the operator list is refreshed.

use crate::config::{ConfigError, LARGE_CLUSTER_FILE_COMMENT};
use crate::model::{Ocn, Tuple};
use hashbrown::HashSet;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct LargeClusterSet {
    ocns: Arc<RwLock<HashSet<Ocn>>>,
}

impl LargeClusterSet {
    pub fn new<I: IntoIterator<Item = Ocn>>(ocns: I) -> Self {
        Self {
            ocns: Arc::new(RwLock::new(ocns.into_iter().collect())),
        }
    }

    /// Parse a file with one OCN per line. Blank lines and `#` comments are skipped.
    pub fn read_ocn_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("reading large cluster file {}: {e}", path.display()))
        })?;
        let mut ocns = HashSet::new();
        for (line_number, line) in contents.lines().enumerate() {
            let line = line
                .split(LARGE_CLUSTER_FILE_COMMENT)
                .next()
                .unwrap_or_default()
                .trim();
            if line.is_empty() {
                continue;
            }
            let value: u64 = line.parse().map_err(|_| {
                ConfigError::new(format!(
                    "{}:{}: not an OCN: {line:?}",
                    path.display(),
                    line_number + 1
                ))
            })?;
            ocns.insert(Ocn(value));
        }
        Ok(Self {
            ocns: Arc::new(RwLock::new(ocns)),
        })
    }

    pub fn contains(&self, ocn: Ocn) -> bool {
        self.ocns.read().contains(&ocn)
    }

    pub fn intersects(&self, tuple: &Tuple) -> bool {
        let ocns = self.ocns.read();
        !ocns.is_empty() && tuple.iter().any(|ocn| ocns.contains(ocn))
    }

    pub fn len(&self) -> usize {
        self.ocns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ocns.read().is_empty()
    }

    /// Add every OCN of `other` to this set.
    pub fn extend(&self, other: LargeClusterSet) {
        let incoming: Vec<Ocn> = other.ocns.read().iter().copied().collect();
        self.ocns.write().extend(incoming);
    }

    /// Swap in a refreshed list. Every clone of this handle observes the change.
    pub fn replace<I: IntoIterator<Item = Ocn>>(&self, ocns: I) {
        let refreshed: HashSet<Ocn> = ocns.into_iter().collect();
        info!(count = refreshed.len(), "large cluster set refreshed");
        *self.ocns.write() = refreshed;
    }
}
