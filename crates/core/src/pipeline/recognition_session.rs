use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::capture::domain::capture_sink::{CaptureEvent, CaptureSink};
use crate::capture::domain::cooldown_gate::CooldownGate;
use crate::capture::domain::visit_ledger::{
    LedgerStore, PersistenceError, VisitLedger, VisitRecord, VisitSummary,
};
use crate::identity::domain::cluster_engine::ClusterEngine;
use crate::identity::domain::embedding_store::{EmbeddingStore, StoreError};
use crate::identity::domain::identity::StableId;
use crate::identity::domain::identity_assigner::IdentityAssigner;
use crate::pipeline::session_config::{validate_cooldown, ConfigError, SessionConfig};
use crate::shared::constants::FIRST_STABLE_ID;
use crate::shared::embedding::Embedding;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("visit ledger could not be loaded: {0}")]
    Load(#[source] PersistenceError),
    #[error("visit ledger write failed: {0}")]
    Persistence(#[source] PersistenceError),
    #[error("capture sink failed for identity {stable_id}: {reason}")]
    Capture { stable_id: StableId, reason: String },
    #[error("reset failed, previous state kept: {0}")]
    Reset(#[source] PersistenceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no stable ids left above ledger label {0}")]
    IdsExhausted(StableId),
    #[error("session state lock poisoned")]
    Poisoned,
}

/// A capture that was granted and recorded during a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrantedCapture {
    pub stable_id: StableId,
    pub sequence_index: u64,
    pub timestamp: DateTime<Utc>,
}

/// What one cluster/assign/gate pass did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassReport {
    /// Observations clustered (the whole store).
    pub observations: usize,
    /// Observations that landed in a cluster.
    pub clustered: usize,
    pub identities_created: Vec<StableId>,
    pub captures: Vec<GrantedCapture>,
    /// Fresh observations of an identity still in cooldown.
    pub suppressed: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IngestOutcome {
    pub sequence_index: u64,
    /// Present when this append completed a batch.
    pub pass: Option<PassReport>,
}

struct EngineState<R> {
    store: EmbeddingStore<R>,
    assigner: IdentityAssigner,
    gate: CooldownGate,
    cooldown: Duration,
    /// Accepted appends since the last pass.
    pending: usize,
    /// Store length at the end of the last pass; later indices are fresh.
    clustered_len: usize,
}

impl<R> EngineState<R> {
    fn clear(&mut self) {
        self.store.clear();
        self.assigner.reset();
        self.gate.clear();
        self.pending = 0;
        self.clustered_len = 0;
    }
}

/// Owned state of one recognition session.
///
/// Appends and cluster/assign/gate passes share one critical section
/// (`engine`); ledger writes are serialized by a second lock (`ledger`).
/// Locks are always taken engine first, then ledger. Readers of the ledger
/// only take the ledger lock and get an owned snapshot.
pub struct RecognitionSession<R> {
    config: SessionConfig,
    engine: Mutex<EngineState<R>>,
    ledger: Mutex<VisitLedger>,
    clusterer: Box<dyn ClusterEngine>,
    sink: Box<dyn CaptureSink<R>>,
}

impl<R> RecognitionSession<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Builds a session over an already-opened ledger.
    ///
    /// Stable ids are issued above the largest label the ledger holds.
    pub fn new(
        config: SessionConfig,
        clusterer: Box<dyn ClusterEngine>,
        sink: Box<dyn CaptureSink<R>>,
        ledger: VisitLedger,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let next_id = match ledger.max_stable_id() {
            Some(max) => max.checked_add(1).ok_or(SessionError::IdsExhausted(max))?,
            None => FIRST_STABLE_ID,
        };
        Ok(Self {
            engine: Mutex::new(EngineState {
                store: EmbeddingStore::new(),
                assigner: IdentityAssigner::with_next_id(next_id),
                gate: CooldownGate::new(),
                cooldown: config.cooldown(),
                pending: 0,
                clustered_len: 0,
            }),
            ledger: Mutex::new(ledger),
            config,
            clusterer,
            sink,
        })
    }

    pub fn open(
        config: SessionConfig,
        clusterer: Box<dyn ClusterEngine>,
        sink: Box<dyn CaptureSink<R>>,
        store: Box<dyn LedgerStore>,
    ) -> Result<Self, SessionError> {
        let ledger = VisitLedger::open(store).map_err(SessionError::Load)?;
        Self::new(config, clusterer, sink, ledger)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Appends one observation; every `recluster_batch_size` accepted appends
    /// runs a full pass stamped with `now`.
    ///
    /// A rejected embedding does not count towards the batch.
    pub fn ingest(
        &self,
        embedding: Vec<f32>,
        capture_ref: R,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, SessionError> {
        let mut engine = self.lock_engine()?;
        let sequence_index = engine.store.append(embedding, capture_ref)?;
        engine.pending += 1;

        let pass = if engine.pending >= self.config.recluster_batch_size {
            Some(self.run_pass(&mut engine, now)?)
        } else {
            None
        };
        Ok(IngestOutcome {
            sequence_index,
            pass,
        })
    }

    /// Runs a pass over observations appended since the last one, if any.
    pub fn flush(&self, now: DateTime<Utc>) -> Result<Option<PassReport>, SessionError> {
        let mut engine = self.lock_engine()?;
        if engine.pending == 0 {
            return Ok(None);
        }
        self.run_pass(&mut engine, now).map(Some)
    }

    /// Changes the cooldown for future eligibility checks. Recorded capture
    /// times are left as they are.
    pub fn set_cooldown(&self, cooldown: Duration) -> Result<(), SessionError> {
        validate_cooldown(cooldown.as_secs_f64())?;
        self.lock_engine()?.cooldown = cooldown;
        log::info!("Capture cooldown set to {:.1}s", cooldown.as_secs_f64());
        Ok(())
    }

    pub fn cooldown(&self) -> Result<Duration, SessionError> {
        Ok(self.lock_engine()?.cooldown)
    }

    pub fn observation_count(&self) -> Result<usize, SessionError> {
        Ok(self.lock_engine()?.store.len())
    }

    pub fn identity_count(&self) -> Result<usize, SessionError> {
        Ok(self.lock_engine()?.assigner.len())
    }

    /// Identity an observation is currently mapped to, if any.
    pub fn identity_of(&self, sequence_index: u64) -> Result<Option<StableId>, SessionError> {
        Ok(self.lock_engine()?.assigner.identity_of(sequence_index))
    }

    pub fn aggregate(&self) -> Result<BTreeMap<StableId, VisitSummary>, SessionError> {
        Ok(self.lock_ledger()?.aggregate())
    }

    pub fn query(&self, stable_id: StableId) -> Result<Vec<DateTime<Utc>>, SessionError> {
        Ok(self.lock_ledger()?.query(stable_id))
    }

    pub fn records(&self) -> Result<Vec<VisitRecord>, SessionError> {
        Ok(self.lock_ledger()?.records().to_vec())
    }

    /// Clears every piece of session state.
    ///
    /// Holds both locks throughout, so an in-flight ingest finishes against
    /// the old state first. The ledger is truncated before anything in
    /// memory is touched; if that fails the session is unchanged. Artifact
    /// removal happens last and only warns on failure.
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut engine = self.lock_engine()?;
        let mut ledger = self.lock_ledger()?;

        retry_once("ledger reset", || ledger.reset()).map_err(SessionError::Reset)?;
        engine.clear();

        if let Err(e) = self.sink.clear() {
            log::warn!("Session reset, but capture artifacts could not be removed: {e}");
        }
        log::info!("Session reset");
        Ok(())
    }

    fn run_pass(
        &self,
        engine: &mut EngineState<R>,
        now: DateTime<Utc>,
    ) -> Result<PassReport, SessionError> {
        let snapshot = engine.store.snapshot();
        let embeddings: Vec<Embedding> = snapshot.iter().map(|o| o.embedding.clone()).collect();
        let labels = self
            .clusterer
            .cluster(&embeddings, &self.config.cluster_params());
        let assignment = engine
            .assigner
            .reconcile(&snapshot, &labels, self.config.eps);

        let fresh_from = engine.clustered_len as u64;
        engine.pending = 0;
        engine.clustered_len = snapshot.len();

        let mut report = PassReport {
            observations: snapshot.len(),
            clustered: assignment.mapping.len(),
            identities_created: assignment.created,
            ..PassReport::default()
        };

        // Failures are per identity. The others are still captured and the
        // first failure is returned at the end.
        let mut failed: BTreeSet<StableId> = BTreeSet::new();
        let mut first_error: Option<SessionError> = None;

        for (&sequence_index, &stable_id) in assignment.mapping.range(fresh_from..) {
            if failed.contains(&stable_id) {
                continue;
            }
            if !engine.gate.is_eligible(stable_id, now, engine.cooldown) {
                report.suppressed += 1;
                continue;
            }

            let event = CaptureEvent {
                stable_id,
                capture_ref: snapshot[sequence_index as usize].capture_ref.clone(),
                timestamp: now,
            };
            if let Err(e) = self.capture_visit(&event) {
                log::warn!("Capture of identity {stable_id} (observation {sequence_index}) failed: {e}");
                failed.insert(stable_id);
                first_error.get_or_insert(e);
                continue;
            }
            // Only after the ledger accepted the visit.
            engine.gate.record_capture(stable_id, now);

            log::info!("Captured identity {stable_id} (observation {sequence_index})");
            report.captures.push(GrantedCapture {
                stable_id,
                sequence_index,
                timestamp: now,
            });
        }

        log::debug!(
            "Pass over {} observations: {} clustered, {} new identities, {} captures, {} suppressed",
            report.observations,
            report.clustered,
            report.identities_created.len(),
            report.captures.len(),
            report.suppressed
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Materializes the artifact, then writes the ledger row. An artifact
    /// whose row could not be written is discarded again.
    fn capture_visit(&self, event: &CaptureEvent<R>) -> Result<(), SessionError> {
        self.sink
            .capture(event)
            .map_err(|e| SessionError::Capture {
                stable_id: event.stable_id,
                reason: e.to_string(),
            })?;
        if let Err(e) = self.record_visit(event.stable_id, event.timestamp) {
            if let Err(discard) = self.sink.discard(event) {
                log::warn!(
                    "Unrecorded capture of identity {} could not be discarded: {discard}",
                    event.stable_id
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn record_visit(&self, stable_id: StableId, now: DateTime<Utc>) -> Result<(), SessionError> {
        let mut ledger = self.lock_ledger()?;
        retry_once("ledger append", || ledger.record(stable_id, now))
            .map_err(SessionError::Persistence)
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, EngineState<R>>, SessionError> {
        self.engine.lock().map_err(|_| SessionError::Poisoned)
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, VisitLedger>, SessionError> {
        self.ledger.lock().map_err(|_| SessionError::Poisoned)
    }
}

/// Truncates a ledger store and removes its capture artifacts without
/// loading the ledger first, so it also recovers a ledger that no longer
/// parses. Artifact removal only warns on failure.
pub fn reset_storage<R>(
    store: &mut dyn LedgerStore,
    sink: &dyn CaptureSink<R>,
) -> Result<(), SessionError> {
    retry_once("ledger reset", || store.truncate()).map_err(SessionError::Reset)?;
    if let Err(e) = sink.clear() {
        log::warn!("Ledger truncated, but capture artifacts could not be removed: {e}");
    }
    log::info!("Stored visits reset");
    Ok(())
}

/// Runs `op`, and once more with the same inputs if it fails.
fn retry_once<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, PersistenceError>,
) -> Result<T, PersistenceError> {
    op().or_else(|first| {
        log::warn!("{what} failed, retrying once: {first}");
        op()
    })
}
