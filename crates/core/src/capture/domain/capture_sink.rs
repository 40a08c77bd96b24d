use chrono::{DateTime, Utc};

use crate::identity::domain::identity::StableId;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// A granted capture: which identity, which crop, and when.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureEvent<R> {
    pub stable_id: StableId,
    pub capture_ref: R,
    pub timestamp: DateTime<Utc>,
}

/// Materializes the artifact for a granted capture (e.g. writes the crop).
///
/// The ledger row is written by the session after the sink succeeds, so a
/// sink never records visits itself.
pub trait CaptureSink<R>: Send + Sync {
    fn capture(&self, event: &CaptureEvent<R>) -> Result<(), SinkError>;

    /// Removes the artifact of one capture whose visit was never recorded.
    /// Default: nothing to remove.
    fn discard(&self, _event: &CaptureEvent<R>) -> Result<(), SinkError> {
        Ok(())
    }

    /// Removes every artifact written so far. Default: nothing to remove.
    fn clear(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
