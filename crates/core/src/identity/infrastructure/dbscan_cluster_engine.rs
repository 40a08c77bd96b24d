//! Density-based (DBSCAN) clustering over raw embeddings.
//!
//! Euclidean distance, inclusive `eps`, neighbourhoods counting the point
//! itself. Core points within `eps` of each other share a cluster; a
//! non-core point reachable from a core point joins the cluster of its
//! nearest core neighbour (lowest index on ties). Clusters are numbered in
//! order of their lowest-index core point, which makes the output a pure
//! function of the input order.
use std::collections::HashMap;

use crate::identity::domain::cluster_engine::{ClusterEngine, ClusterParams, RawClusterLabel};
use crate::identity::infrastructure::math;
use crate::shared::embedding::Embedding;

pub struct DbscanClusterEngine;

impl DbscanClusterEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DbscanClusterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterEngine for DbscanClusterEngine {
    fn cluster(&self, embeddings: &[Embedding], params: &ClusterParams) -> Vec<RawClusterLabel> {
        let n = embeddings.len();
        let min_samples = params.min_samples.max(1);
        if n < min_samples {
            return vec![RawClusterLabel::Noise; n];
        }

        let dist = math::distance_matrix(embeddings);
        let within = |i: usize, j: usize| dist[[i, j]] <= params.eps;

        let is_core: Vec<bool> = (0..n)
            .map(|i| (0..n).filter(|&j| within(i, j)).count() >= min_samples)
            .collect();

        let mut parent: Vec<usize> = (0..n).collect();
        for i in 0..n {
            if !is_core[i] {
                continue;
            }
            for j in (i + 1)..n {
                if is_core[j] && within(i, j) {
                    math::union(&mut parent, i, j);
                }
            }
        }

        let mut labels = vec![RawClusterLabel::Noise; n];
        let mut label_of_root: HashMap<usize, usize> = HashMap::new();
        for i in 0..n {
            if !is_core[i] {
                continue;
            }
            let root = math::find(&mut parent, i);
            let next = label_of_root.len();
            let label = *label_of_root.entry(root).or_insert(next);
            labels[i] = RawClusterLabel::Cluster(label);
        }

        for i in 0..n {
            if is_core[i] {
                continue;
            }
            let mut nearest: Option<(usize, f64)> = None;
            for j in 0..n {
                if !is_core[j] || !within(i, j) {
                    continue;
                }
                // Strict comparison keeps the lowest index on equal distances.
                if nearest.map_or(true, |(_, d)| dist[[i, j]] < d) {
                    nearest = Some((j, dist[[i, j]]));
                }
            }
            if let Some((core, _)) = nearest {
                labels[i] = labels[core];
            }
        }

        labels
    }
}
