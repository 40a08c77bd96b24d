use chrono::{DateTime, Utc};

/// One face found upstream: its embedding and a handle to the crop.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceSample<R> {
    pub embedding: Vec<f32>,
    pub capture_ref: R,
}

/// Faces extracted from one frame of the camera stream.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFrame<R> {
    pub index: u64,
    /// When the frame was taken; the session clock is used when absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub faces: Vec<FaceSample<R>>,
}

/// Produces frames of face embeddings.
///
/// Detection, alignment and embedding extraction happen upstream; sources
/// only deliver their output in frame order.
pub trait EmbeddingSource<R>: Send {
    /// Returns an iterator over frames in capture order.
    fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<SourceFrame<R>, Box<dyn std::error::Error>>> + '_>;

    /// Releases any resources held by the source.
    fn close(&mut self);
}
