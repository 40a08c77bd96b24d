use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::identity::domain::identity::StableId;
use crate::pipeline::embedding_source::{EmbeddingSource, SourceFrame};
use crate::pipeline::recognition_session::{PassReport, RecognitionSession, SessionError};
use crate::pipeline::session_logger::SessionLogger;
use crate::shared::clock::Clock;

const DEFAULT_CHANNEL_CAPACITY: usize = 8;

type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Totals of one ingestion run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestSummary {
    pub frames: usize,
    pub observations: usize,
    pub rejected: usize,
    pub passes: usize,
    pub captures: usize,
    pub suppressed: usize,
    pub identities_created: Vec<StableId>,
    /// The run stopped before the source was exhausted.
    pub cancelled: bool,
}

impl IngestSummary {
    fn record_pass(&mut self, report: &PassReport) {
        self.passes += 1;
        self.captures += report.captures.len();
        self.suppressed += report.suppressed;
        self.identities_created
            .extend_from_slice(&report.identities_created);
    }
}

/// Feeds a source of face embeddings into a recognition session.
///
/// Layout: `source thread → bounded channel → main [ingest/pass]`
///
/// Embeddings the store rejects are logged and skipped. Any other session
/// error stops the run. Cancellation (flag or progress callback) is a
/// graceful stop: the frames already read are flushed through a final pass.
/// This is a single-use struct: `execute` consumes the source.
pub struct IngestUseCase<R> {
    session: Arc<RecognitionSession<R>>,
    source: Option<Box<dyn EmbeddingSource<R>>>,
    clock: Box<dyn Clock>,
    logger: Box<dyn SessionLogger>,
    on_progress: Option<Box<dyn Fn(usize) -> bool + Send>>,
    cancelled: Arc<AtomicBool>,
    channel_capacity: usize,
}

impl<R> IngestUseCase<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new(
        session: Arc<RecognitionSession<R>>,
        source: Box<dyn EmbeddingSource<R>>,
        clock: Box<dyn Clock>,
        logger: Box<dyn SessionLogger>,
        on_progress: Option<Box<dyn Fn(usize) -> bool + Send>>,
        cancelled: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            session,
            source: Some(source),
            clock,
            logger,
            on_progress,
            cancelled: cancelled.unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn execute(&mut self) -> Result<IngestSummary, Box<dyn std::error::Error>> {
        let source = self.source.take().ok_or("Ingestion already executed")?;
        let (frame_tx, frame_rx) =
            crossbeam_channel::bounded::<Result<SourceFrame<R>, SendError>>(self.channel_capacity);
        let source_handle = spawn_source(source, frame_tx, self.cancelled.clone());

        let mut summary = IngestSummary::default();
        let result = self
            .run_main_loop(frame_rx, &mut summary)
            .and_then(|last_ts| self.flush(last_ts, &mut summary));

        join_source(source_handle, result)?;
        self.logger.summary();
        Ok(summary)
    }

    /// Consumes frames until the source ends, the run is cancelled, or a
    /// fatal error occurs. Returns the timestamp of the last frame.
    fn run_main_loop(
        &mut self,
        frame_rx: crossbeam_channel::Receiver<Result<SourceFrame<R>, SendError>>,
        summary: &mut IngestSummary,
    ) -> Result<Option<DateTime<Utc>>, Box<dyn std::error::Error>> {
        let mut last_ts = None;

        for frame_result in frame_rx {
            if self.cancelled.load(Ordering::Relaxed) {
                summary.cancelled = true;
                break;
            }

            let frame = frame_result.map_err(|e| -> Box<dyn std::error::Error> {
                format!("Embedding source failed: {e}").into()
            })?;
            let now = frame.timestamp.unwrap_or_else(|| self.clock.now());
            last_ts = Some(now);

            for face in frame.faces {
                let started = Instant::now();
                match self.session.ingest(face.embedding, face.capture_ref, now) {
                    Ok(outcome) => {
                        summary.observations += 1;
                        if let Some(report) = outcome.pass {
                            let ms = started.elapsed().as_secs_f64() * 1000.0;
                            self.logger.pass(&report, ms);
                            summary.record_pass(&report);
                        }
                    }
                    Err(SessionError::Store(e)) => {
                        summary.rejected += 1;
                        self.logger.rejected(frame.index, &e.to_string());
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            summary.frames += 1;
            self.logger.progress(summary.frames, summary.observations);

            if let Some(ref callback) = self.on_progress {
                if !callback(summary.frames) {
                    self.cancelled.store(true, Ordering::Relaxed);
                    summary.cancelled = true;
                    break;
                }
            }
        }

        Ok(last_ts)
    }

    fn flush(
        &mut self,
        last_ts: Option<DateTime<Utc>>,
        summary: &mut IngestSummary,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let now = last_ts.unwrap_or_else(|| self.clock.now());
        let started = Instant::now();
        if let Some(report) = self.session.flush(now)? {
            let ms = started.elapsed().as_secs_f64() * 1000.0;
            self.logger.pass(&report, ms);
            summary.record_pass(&report);
        }
        if summary.cancelled {
            self.logger.info("Ingestion cancelled");
        }
        Ok(())
    }
}

fn spawn_source<R: Send + 'static>(
    mut source: Box<dyn EmbeddingSource<R>>,
    frame_tx: crossbeam_channel::Sender<Result<SourceFrame<R>, SendError>>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for frame_result in source.frames() {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let mapped = frame_result.map_err(|e| -> SendError { e.to_string().into() });
            if frame_tx.send(mapped).is_err() {
                break;
            }
        }
        source.close();
    })
}

/// Joins the source thread. The main loop's error wins over a panic.
fn join_source(
    source_handle: JoinHandle<()>,
    result: Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let joined = source_handle.join();
    result?;
    joined.map_err(|_| "Source thread panicked".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::domain::capture_sink::{CaptureEvent, CaptureSink, SinkError};
    use crate::capture::infrastructure::memory_ledger_store::MemoryLedgerStore;
    use crate::identity::infrastructure::dbscan_cluster_engine::DbscanClusterEngine;
    use crate::pipeline::embedding_source::FaceSample;
    use crate::pipeline::session_config::SessionConfig;
    use crate::pipeline::session_logger::NullSessionLogger;
    use chrono::TimeZone;
    use std::sync::Mutex;

    // --- Stubs ---

    struct StubSource {
        frames: Vec<Result<SourceFrame<u32>, String>>,
        closed: Arc<Mutex<bool>>,
    }

    impl StubSource {
        fn new(frames: Vec<SourceFrame<u32>>) -> Self {
            Self {
                frames: frames.into_iter().map(Ok).collect(),
                closed: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl EmbeddingSource<u32> for StubSource {
        fn frames(
            &mut self,
        ) -> Box<dyn Iterator<Item = Result<SourceFrame<u32>, Box<dyn std::error::Error>>> + '_>
        {
            Box::new(
                self.frames
                    .drain(..)
                    .map(|f| f.map_err(|e| -> Box<dyn std::error::Error> { e.into() })),
            )
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    struct NullSink;

    impl CaptureSink<u32> for NullSink {
        fn capture(&self, _event: &CaptureEvent<u32>) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    // --- Helpers ---

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn face(embedding: Vec<f32>, capture_ref: u32) -> FaceSample<u32> {
        FaceSample {
            embedding,
            capture_ref,
        }
    }

    fn frame(index: u64, secs: Option<i64>, faces: Vec<FaceSample<u32>>) -> SourceFrame<u32> {
        SourceFrame {
            index,
            timestamp: secs.map(at),
            faces,
        }
    }

    fn session(batch: usize) -> Arc<RecognitionSession<u32>> {
        let config = SessionConfig {
            recluster_batch_size: batch,
            ..SessionConfig::default()
        };
        Arc::new(
            RecognitionSession::open(
                config,
                Box::new(DbscanClusterEngine::new()),
                Box::new(NullSink),
                Box::new(MemoryLedgerStore::new()),
            )
            .unwrap(),
        )
    }

    fn use_case(
        session: &Arc<RecognitionSession<u32>>,
        source: StubSource,
        on_progress: Option<Box<dyn Fn(usize) -> bool + Send>>,
    ) -> IngestUseCase<u32> {
        IngestUseCase::new(
            session.clone(),
            Box::new(source),
            Box::new(FixedClock(at(500))),
            Box::new(NullSessionLogger),
            on_progress,
            None,
        )
    }

    /// Three frames, each showing one face of group A and one of group B.
    fn two_customers() -> Vec<SourceFrame<u32>> {
        (0..3)
            .map(|i| {
                let d = 0.01 * i as f32;
                frame(
                    i as u64,
                    Some(i),
                    vec![
                        face(vec![d, 0.0], 2 * i as u32),
                        face(vec![5.0, 5.0 + d], 2 * i as u32 + 1),
                    ],
                )
            })
            .collect()
    }

    // --- Tests ---

    #[test]
    fn test_ingests_all_frames_and_captures_each_customer() {
        let s = session(3);
        let source = StubSource::new(two_customers());
        let closed = source.closed.clone();

        let summary = use_case(&s, source, None).execute().unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.observations, 6);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.captures, 2);
        assert_eq!(summary.identities_created, vec![0, 1]);
        assert!(!summary.cancelled);
        assert!(*closed.lock().unwrap());
        assert_eq!(s.aggregate().unwrap().len(), 2);
    }

    #[test]
    fn test_rejected_embeddings_are_skipped() {
        let s = session(3);
        let frames = vec![
            frame(0, Some(0), vec![face(vec![0.0, 0.0], 0)]),
            frame(1, Some(1), vec![face(vec![0.0, 0.0, 0.0], 1)]),
            frame(2, Some(2), vec![face(vec![f32::NAN, 0.0], 2)]),
            frame(3, Some(3), vec![face(vec![0.01, 0.0], 3), face(vec![0.02, 0.0], 4)]),
        ];
        let summary = use_case(&s, StubSource::new(frames), None)
            .execute()
            .unwrap();

        assert_eq!(summary.frames, 4);
        assert_eq!(summary.observations, 3);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.captures, 1);
        assert_eq!(s.query(0).unwrap(), vec![at(3)]);
    }

    #[test]
    fn test_final_flush_runs_partial_batch() {
        let s = session(50);
        let summary = use_case(&s, StubSource::new(two_customers()), None)
            .execute()
            .unwrap();
        assert_eq!(summary.passes, 1);
        assert_eq!(summary.captures, 2);
        // Flushed at the last frame's timestamp.
        assert_eq!(s.query(0).unwrap(), vec![at(2)]);
    }

    #[test]
    fn test_frames_without_timestamp_use_clock() {
        let s = session(3);
        let frames = (0..3)
            .map(|i| frame(i, None, vec![face(vec![0.0, 0.01 * i as f32], i as u32)]))
            .collect();
        use_case(&s, StubSource::new(frames), None)
            .execute()
            .unwrap();
        assert_eq!(s.query(0).unwrap(), vec![at(500)]);
    }

    #[test]
    fn test_source_error_stops_run() {
        let s = session(3);
        let source = StubSource {
            frames: vec![
                Ok(frame(0, Some(0), vec![face(vec![0.0], 0)])),
                Err("truncated input".into()),
                Ok(frame(2, Some(2), vec![face(vec![0.0], 1)])),
            ],
            closed: Arc::new(Mutex::new(false)),
        };
        let closed = source.closed.clone();

        let err = use_case(&s, source, None).execute().unwrap_err();
        assert!(err.to_string().contains("truncated input"));
        assert!(*closed.lock().unwrap());
        assert_eq!(s.observation_count().unwrap(), 1);
    }

    #[test]
    fn test_progress_callback_can_cancel() {
        let s = session(50);
        let summary = use_case(
            &s,
            StubSource::new(two_customers()),
            Some(Box::new(|frames: usize| frames < 1)),
        )
        .execute()
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.observations, 2);
        // Cancelled runs still flush what was read.
        assert_eq!(summary.passes, 1);
    }

    #[test]
    fn test_preset_cancel_flag_stops_before_first_frame() {
        let s = session(3);
        let flag = Arc::new(AtomicBool::new(true));
        let mut uc = IngestUseCase::new(
            s.clone(),
            Box::new(StubSource::new(two_customers())),
            Box::new(FixedClock(at(0))),
            Box::new(NullSessionLogger),
            None,
            Some(flag),
        );
        let summary = uc.execute().unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(s.observation_count().unwrap(), 0);
    }

    #[test]
    fn test_execute_twice_fails() {
        let s = session(3);
        let mut uc = use_case(&s, StubSource::new(Vec::new()), None);
        assert!(uc.execute().is_ok());
        assert!(uc.execute().is_err());
    }
}
