//! # Identifier Graph
//!
//! Transient undirected graph over the OCNs of one cluster. Every record tuple
//! contributes a clique; connected components tell whether the cluster still
//! holds together after a removal.

use crate::cluster::Cluster;
use crate::dsu::OcnDsu;
use crate::model::{Ocn, Tuple};
use hashbrown::HashSet;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct OcnGraph {
    vertices: BTreeSet<Ocn>,
    edges: HashSet<(Ocn, Ocn)>,
    components: Option<Vec<Tuple>>,
}

impl OcnGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from the tuples of every record still on `cluster`.
    pub fn from_cluster(cluster: &Cluster) -> Self {
        let mut graph = Self::new();
        for tuple in cluster.tuples() {
            graph.add_tuple(&tuple);
        }
        graph
    }

    /// Add each OCN as a vertex and connect every pair within the tuple.
    pub fn add_tuple(&mut self, tuple: &Tuple) {
        self.components = None;
        let ocns: Vec<Ocn> = tuple.iter().copied().collect();
        self.vertices.extend(ocns.iter().copied());
        for (index, &left) in ocns.iter().enumerate() {
            for &right in &ocns[index + 1..] {
                // Tuples iterate in order, so left < right.
                self.edges.insert((left, right));
            }
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Connected components, ordered by smallest member. Computed once per
    /// graph and reused until another tuple is added.
    pub fn components(&mut self) -> &[Tuple] {
        if self.components.is_none() {
            let mut dsu = OcnDsu::new();
            for &vertex in &self.vertices {
                dsu.add(vertex);
            }
            for &(left, right) in &self.edges {
                dsu.union(left, right);
            }
            self.components = Some(dsu.sets());
        }
        self.components.as_deref().unwrap_or_default()
    }

    pub fn is_connected(&mut self) -> bool {
        self.components().len() <= 1
    }
}
