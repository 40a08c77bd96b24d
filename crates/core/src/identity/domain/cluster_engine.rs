use crate::shared::constants::{DEFAULT_EPS, DEFAULT_MIN_SAMPLES};
use crate::shared::embedding::Embedding;

/// Label from a single clustering pass. Numbers are not comparable across passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RawClusterLabel {
    Noise,
    Cluster(usize),
}

impl RawClusterLabel {
    pub fn is_noise(&self) -> bool {
        matches!(self, RawClusterLabel::Noise)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterParams {
    pub eps: f64,
    pub min_samples: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps: DEFAULT_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

/// Domain interface for batch clustering over the whole embedding set.
///
/// Returns one label per input, in input order. Implementations must be
/// deterministic for identical input and parameters.
pub trait ClusterEngine: Send + Sync {
    fn cluster(&self, embeddings: &[Embedding], params: &ClusterParams) -> Vec<RawClusterLabel>;
}
