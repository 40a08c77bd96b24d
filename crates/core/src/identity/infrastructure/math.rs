//! Shared math utilities for the clustering backends.
//!
//! Union-find over observation indices and the dense pairwise distance
//! matrix used by density-based clustering.

use ndarray::Array2;

use crate::shared::embedding::{euclidean_distance, Embedding};

/// Symmetric Euclidean distance matrix with a zero diagonal.
pub fn distance_matrix(embeddings: &[Embedding]) -> Array2<f64> {
    let n = embeddings.len();
    let mut dist = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean_distance(&embeddings[i], &embeddings[j]);
            dist[[i, j]] = d;
            dist[[j, i]] = d;
        }
    }
    dist
}

/// Find root of element `i` with path halving for amortized near-O(1).
pub fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge the sets containing `a` and `b`. The smaller root wins, so a set's
/// root is always its lowest member index.
pub fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra < rb {
        parent[rb] = ra;
    } else if rb < ra {
        parent[ra] = rb;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_matrix_is_symmetric() {
        let e = vec![
            Embedding::new(vec![0.0, 0.0]),
            Embedding::new(vec![3.0, 4.0]),
            Embedding::new(vec![0.0, 1.0]),
        ];
        let d = distance_matrix(&e);
        assert_eq!(d.shape(), &[3, 3]);
        assert_relative_eq!(d[[0, 1]], 5.0);
        assert_relative_eq!(d[[1, 0]], 5.0);
        assert_relative_eq!(d[[0, 2]], 1.0);
        assert_eq!(d[[2, 2]], 0.0);
    }

    #[test]
    fn test_distance_matrix_empty() {
        assert_eq!(distance_matrix(&[]).shape(), &[0, 0]);
    }

    #[test]
    fn test_union_find_transitive() {
        let mut parent = vec![0, 1, 2];
        union(&mut parent, 0, 1);
        union(&mut parent, 1, 2);
        assert_eq!(find(&mut parent, 0), find(&mut parent, 2));
    }

    #[test]
    fn test_union_find_separate() {
        let mut parent = vec![0, 1, 2, 3];
        union(&mut parent, 0, 1);
        union(&mut parent, 2, 3);
        assert_ne!(find(&mut parent, 0), find(&mut parent, 2));
    }

    #[test]
    fn test_root_is_lowest_index() {
        let mut parent = vec![0, 1, 2, 3];
        union(&mut parent, 3, 2);
        union(&mut parent, 2, 1);
        assert_eq!(find(&mut parent, 3), 1);
    }
}
