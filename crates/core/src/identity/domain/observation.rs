use crate::shared::embedding::Embedding;

/// One detected face as seen by the engine.
///
/// `capture_ref` is opaque to the core; it is only handed back to the
/// capture sink when the observation wins a capture.
#[derive(Clone, Debug)]
pub struct Observation<R> {
    pub embedding: Embedding,
    pub capture_ref: R,
    pub sequence_index: u64,
}
