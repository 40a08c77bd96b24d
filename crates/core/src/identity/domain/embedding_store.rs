use std::sync::Arc;

use thiserror::Error;

use crate::identity::domain::observation::Observation;
use crate::shared::embedding::Embedding;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("malformed embedding: {0}")]
    Malformed(String),
}

/// Append-only, insertion-ordered collection of observations.
///
/// The first accepted embedding fixes the dimension for the lifetime of the
/// store (until [`EmbeddingStore::clear`]).
pub struct EmbeddingStore<R> {
    observations: Vec<Arc<Observation<R>>>,
    dimension: Option<usize>,
}

impl<R> EmbeddingStore<R> {
    pub fn new() -> Self {
        Self {
            observations: Vec::new(),
            dimension: None,
        }
    }

    /// Appends one observation and returns its sequence index.
    ///
    /// A rejected embedding leaves the store unchanged.
    pub fn append(&mut self, embedding: Vec<f32>, capture_ref: R) -> Result<u64, StoreError> {
        if embedding.is_empty() {
            return Err(StoreError::Malformed("empty vector".into()));
        }
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        if let Some(pos) = embedding.iter().position(|x| !x.is_finite()) {
            return Err(StoreError::Malformed(format!(
                "non-finite component at index {pos}"
            )));
        }

        self.dimension.get_or_insert(embedding.len());
        let sequence_index = self.observations.len() as u64;
        self.observations.push(Arc::new(Observation {
            embedding: Embedding::new(embedding),
            capture_ref,
            sequence_index,
        }));
        Ok(sequence_index)
    }

    /// Ordered read-only view of every observation.
    pub fn snapshot(&self) -> Vec<Arc<Observation<R>>> {
        self.observations.clone()
    }

    pub fn embeddings(&self) -> Vec<Embedding> {
        self.observations
            .iter()
            .map(|o| o.embedding.clone())
            .collect()
    }

    pub fn get(&self, sequence_index: u64) -> Option<&Arc<Observation<R>>> {
        self.observations.get(sequence_index as usize)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn clear(&mut self) {
        self.observations.clear();
        self.dimension = None;
    }
}

impl<R> Default for EmbeddingStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_returns_sequential_indices() {
        let mut store = EmbeddingStore::new();
        assert_eq!(store.append(vec![0.0, 1.0], "a").unwrap(), 0);
        assert_eq!(store.append(vec![1.0, 0.0], "b").unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.dimension(), Some(2));
    }

    #[test]
    fn test_dimension_mismatch_is_rejected_without_corruption() {
        let mut store = EmbeddingStore::new();
        store.append(vec![0.0, 1.0], "a").unwrap();
        let err = store.append(vec![0.0, 1.0, 2.0], "b").unwrap_err();
        assert_eq!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.append(vec![2.0, 2.0], "c").unwrap(), 1);
    }

    #[test]
    fn test_empty_and_non_finite_are_malformed() {
        let mut store: EmbeddingStore<()> = EmbeddingStore::new();
        assert!(matches!(
            store.append(vec![], ()),
            Err(StoreError::Malformed(_))
        ));
        assert!(matches!(
            store.append(vec![0.0, f32::NAN], ()),
            Err(StoreError::Malformed(_))
        ));
        assert!(store.is_empty());
        assert_eq!(store.dimension(), None);
    }

    #[test]
    fn test_snapshot_is_ordered_and_detached_from_later_appends() {
        let mut store = EmbeddingStore::new();
        store.append(vec![0.0], 10).unwrap();
        store.append(vec![1.0], 20).unwrap();
        let snap = store.snapshot();
        store.append(vec![2.0], 30).unwrap();

        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].capture_ref, 10);
        assert_eq!(snap[1].sequence_index, 1);
        assert_eq!(store.get(2).unwrap().capture_ref, 30);
    }

    #[test]
    fn test_clear_resets_indices_and_dimension() {
        let mut store = EmbeddingStore::new();
        store.append(vec![0.0, 0.0], ()).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.append(vec![1.0, 2.0, 3.0], ()).unwrap(), 0);
        assert_eq!(store.dimension(), Some(3));
    }
}
