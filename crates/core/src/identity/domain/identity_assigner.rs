use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::identity::domain::cluster_engine::RawClusterLabel;
use crate::identity::domain::identity::{Identity, StableId};
use crate::identity::domain::observation::Observation;
use crate::shared::constants::FIRST_STABLE_ID;
use crate::shared::embedding::{euclidean_distance, mean};

/// Outcome of reconciling one clustering pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassAssignment {
    /// sequence_index → stable id, for every non-noise observation of the pass.
    pub mapping: BTreeMap<u64, StableId>,
    /// Identities issued during this pass, in issue order.
    pub created: Vec<StableId>,
}

/// Maps run-to-run unstable raw cluster labels onto stable identity ids by
/// matching raw-cluster centroids against known identity centroids.
pub struct IdentityAssigner {
    identities: BTreeMap<StableId, Identity>,
    membership: HashMap<u64, StableId>,
    next_id: StableId,
}

impl IdentityAssigner {
    pub fn new() -> Self {
        Self::with_next_id(FIRST_STABLE_ID)
    }

    /// Starts issuing ids at `next_id`, e.g. above labels already present in
    /// a persisted ledger.
    pub fn with_next_id(next_id: StableId) -> Self {
        Self {
            identities: BTreeMap::new(),
            membership: HashMap::new(),
            next_id,
        }
    }

    /// Reconciles a pass's raw labels (one per observation, same order).
    ///
    /// Raw clusters are processed in label order. Each one merges into the
    /// nearest identity whose centroid lies within `eps` (lowest id on ties),
    /// otherwise it founds a new identity. Matching sees the centroids as
    /// they were before the pass, plus the founding centroids of identities
    /// issued earlier in it; members move only once every raw cluster has a
    /// target. Noise observations keep their previous mapping.
    pub fn reconcile<R>(
        &mut self,
        observations: &[Arc<Observation<R>>],
        labels: &[RawClusterLabel],
        eps: f64,
    ) -> PassAssignment {
        debug_assert_eq!(
            observations.len(),
            labels.len(),
            "one raw label per observation"
        );

        let mut groups: BTreeMap<usize, Vec<&Observation<R>>> = BTreeMap::new();
        for (obs, label) in observations.iter().zip(labels) {
            if let RawClusterLabel::Cluster(c) = label {
                groups.entry(*c).or_default().push(obs);
            }
        }

        let mut assignment = PassAssignment::default();
        let mut targets = Vec::with_capacity(groups.len());
        for members in groups.values() {
            let Some(centroid) = mean(members.iter().map(|o| o.embedding.as_slice())) else {
                continue;
            };

            let target = match self.nearest(&centroid, eps) {
                Some(id) => id,
                None => {
                    let id = self.issue(centroid);
                    assignment.created.push(id);
                    id
                }
            };
            targets.push((target, members));
        }

        for (target, members) in targets {
            for obs in members {
                self.move_member(obs, target);
                assignment.mapping.insert(obs.sequence_index, target);
            }
        }

        log::debug!(
            "Reconciled {} raw clusters onto {} identities ({} new)",
            groups.len(),
            self.identities.len(),
            assignment.created.len()
        );
        assignment
    }

    pub fn get(&self, stable_id: StableId) -> Option<&Identity> {
        self.identities.get(&stable_id)
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identity_of(&self, sequence_index: u64) -> Option<StableId> {
        self.membership.get(&sequence_index).copied()
    }

    pub fn next_id(&self) -> StableId {
        self.next_id
    }

    /// Drops every identity and restarts issuance at [`FIRST_STABLE_ID`].
    pub fn reset(&mut self) {
        self.identities.clear();
        self.membership.clear();
        self.next_id = FIRST_STABLE_ID;
    }

    fn nearest(&self, centroid: &[f32], eps: f64) -> Option<StableId> {
        let mut best: Option<(StableId, f64)> = None;
        // BTreeMap iterates ascending, so a strict `<` keeps the lowest id on ties.
        for identity in self.identities.values() {
            let d = euclidean_distance(centroid, &identity.centroid);
            if d <= eps && best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((identity.stable_id, d));
            }
        }
        best.map(|(id, _)| id)
    }

    fn issue(&mut self, centroid: Vec<f32>) -> StableId {
        let id = self.next_id;
        self.next_id += 1;
        self.identities.insert(id, Identity::new(id, centroid));
        id
    }

    fn move_member<R>(&mut self, obs: &Observation<R>, target: StableId) {
        let previous = self.membership.insert(obs.sequence_index, target);
        if previous == Some(target) {
            return;
        }
        if let Some(old) = previous.and_then(|id| self.identities.get_mut(&id)) {
            old.remove_member(&obs.embedding);
        }
        if let Some(identity) = self.identities.get_mut(&target) {
            identity.add_member(&obs.embedding);
        }
    }
}

impl Default for IdentityAssigner {
    fn default() -> Self {
        Self::new()
    }
}
