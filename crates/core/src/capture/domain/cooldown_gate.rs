use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::identity::domain::identity::StableId;

/// Per-identity capture cooldown.
///
/// Holds the last successful capture time of each identity. Entries exist
/// only for identities that have been captured at least once.
#[derive(Debug, Default)]
pub struct CooldownGate {
    last_capture: HashMap<StableId, DateTime<Utc>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `stable_id` was never captured, or at least `cooldown` has
    /// elapsed since its last capture (the boundary is eligible).
    pub fn is_eligible(&self, stable_id: StableId, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let Some(last) = self.last_capture.get(&stable_id) else {
            return true;
        };
        match (now - *last).to_std() {
            Ok(elapsed) => elapsed >= cooldown,
            // `now` before the last capture: clock went backwards.
            Err(_) => false,
        }
    }

    pub fn record_capture(&mut self, stable_id: StableId, now: DateTime<Utc>) {
        self.last_capture.insert(stable_id, now);
    }

    pub fn last_capture(&self, stable_id: StableId) -> Option<DateTime<Utc>> {
        self.last_capture.get(&stable_id).copied()
    }

    pub fn len(&self) -> usize {
        self.last_capture.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_capture.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_capture.clear();
    }
}
