//! # Disjoint Set Union over OCNs
//!
//! Union-Find with path halving and union by rank. Used by the identifier
//! graph to partition a cluster's OCNs into connected components.

use crate::model::Ocn;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Disjoint set union keyed by OCN.
#[derive(Debug, Clone, Default)]
pub struct OcnDsu {
    parent: FxHashMap<Ocn, Ocn>,
    rank: FxHashMap<Ocn, u32>,
    set_count: usize,
}

impl OcnDsu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an OCN as its own singleton set. No-op if already present.
    pub fn add(&mut self, ocn: Ocn) {
        if self.parent.contains_key(&ocn) {
            return;
        }
        self.parent.insert(ocn, ocn);
        self.rank.insert(ocn, 0);
        self.set_count += 1;
    }

    pub fn contains(&self, ocn: Ocn) -> bool {
        self.parent.contains_key(&ocn)
    }

    /// Find the root of an OCN, halving the path on the way.
    /// Untracked OCNs are their own root.
    pub fn find(&mut self, ocn: Ocn) -> Ocn {
        let mut current = ocn;
        loop {
            let Some(&parent) = self.parent.get(&current) else {
                return current;
            };
            if parent == current {
                return current;
            }
            let grandparent = self.parent.get(&parent).copied().unwrap_or(parent);
            self.parent.insert(current, grandparent);
            current = grandparent;
        }
    }

    /// Merge the sets containing `a` and `b`. Returns false if already joined.
    pub fn union(&mut self, a: Ocn, b: Ocn) -> bool {
        self.add(a);
        self.add(b);
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }

        let rank_a = self.rank.get(&root_a).copied().unwrap_or(0);
        let rank_b = self.rank.get(&root_b).copied().unwrap_or(0);
        if rank_a < rank_b {
            self.parent.insert(root_a, root_b);
        } else if rank_a > rank_b {
            self.parent.insert(root_b, root_a);
        } else {
            self.parent.insert(root_a, root_b);
            self.rank.insert(root_b, rank_b + 1);
        }
        self.set_count = self.set_count.saturating_sub(1);
        true
    }

    pub fn same_set(&mut self, a: Ocn, b: Ocn) -> bool {
        self.find(a) == self.find(b)
    }

    pub fn set_count(&self) -> usize {
        self.set_count
    }

    /// Group every tracked OCN by root.
    ///
    /// Sets come back ordered by their smallest OCN so callers see a stable
    /// order regardless of hash iteration.
    pub fn sets(&mut self) -> Vec<BTreeSet<Ocn>> {
        let ocns: Vec<Ocn> = self.parent.keys().copied().collect();
        let mut grouped: FxHashMap<Ocn, BTreeSet<Ocn>> = FxHashMap::default();
        for ocn in ocns {
            let root = self.find(ocn);
            grouped.entry(root).or_default().insert(ocn);
        }
        let mut sets: Vec<BTreeSet<Ocn>> = grouped.into_values().collect();
        sets.sort_by_key(|set| set.first().copied());
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsu_creation() {
        let dsu = OcnDsu::new();
        assert_eq!(dsu.set_count(), 0);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut dsu = OcnDsu::new();
        dsu.add(Ocn(1));
        dsu.add(Ocn(1));
        assert_eq!(dsu.set_count(), 1);
        assert_eq!(dsu.find(Ocn(1)), Ocn(1));
    }

    #[test]
    fn test_union_joins_sets() {
        let mut dsu = OcnDsu::new();
        assert!(dsu.union(Ocn(1), Ocn(2)));
        assert!(dsu.union(Ocn(3), Ocn(2)));
        assert!(!dsu.union(Ocn(1), Ocn(3)));
        assert!(dsu.same_set(Ocn(1), Ocn(3)));
        assert_eq!(dsu.set_count(), 1);
    }

    #[test]
    fn test_sets_are_sorted_by_smallest_member() {
        let mut dsu = OcnDsu::new();
        dsu.union(Ocn(9), Ocn(10));
        dsu.add(Ocn(4));
        dsu.union(Ocn(1), Ocn(7));
        let sets = dsu.sets();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0], BTreeSet::from([Ocn(1), Ocn(7)]));
        assert_eq!(sets[1], BTreeSet::from([Ocn(4)]));
        assert_eq!(sets[2], BTreeSet::from([Ocn(9), Ocn(10)]));
    }

    #[test]
    fn test_find_untracked_is_self_root() {
        let mut dsu = OcnDsu::new();
        assert_eq!(dsu.find(Ocn(42)), Ocn(42));
        assert!(!dsu.contains(Ocn(42)));
    }
}
