use std::time::Instant;

use crate::pipeline::recognition_session::PassReport;

/// Cross-cutting logger for ingestion events.
///
/// Keeps the ingest loop free of output concerns: the CLI logs through the
/// `log` crate, tests discard everything.
pub trait SessionLogger: Send {
    /// Report how many frames and observations have been consumed so far.
    fn progress(&mut self, frames: usize, observations: usize);

    /// Record a completed cluster/assign/gate pass and how long it took.
    fn pass(&mut self, report: &PassReport, duration_ms: f64);

    /// Record an embedding the store refused.
    fn rejected(&mut self, frame: u64, reason: &str);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullSessionLogger;

impl SessionLogger for NullSessionLogger {
    fn progress(&mut self, _frames: usize, _observations: usize) {}
    fn pass(&mut self, _report: &PassReport, _duration_ms: f64) {}
    fn rejected(&mut self, _frame: u64, _reason: &str) {}
    fn info(&mut self, _message: &str) {}
}

/// CLI-oriented logger that tallies passes, captures and rejections and
/// reports them at the end of a run.
///
/// Progress output is throttled to every `throttle_frames` frames.
pub struct StdoutSessionLogger {
    throttle_frames: usize,
    pass_timings: Vec<f64>,
    captures: usize,
    suppressed: usize,
    identities_created: usize,
    rejected: usize,
    frames: usize,
    observations: usize,
    start_time: Instant,
    messages: Vec<String>,
}

impl StdoutSessionLogger {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            pass_timings: Vec::new(),
            captures: 0,
            suppressed: 0,
            identities_created: 0,
            rejected: 0,
            frames: 0,
            observations: 0,
            start_time: Instant::now(),
            messages: Vec::new(),
        }
    }

    /// Returns the formatted summary string, or `None` if nothing happened.
    pub fn summary_string(&self) -> Option<String> {
        if self.frames == 0 && self.pass_timings.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Session summary ({} frames, {} observations, {elapsed_s:.1}s total):",
            self.frames, self.observations
        )];

        if !self.pass_timings.is_empty() {
            let total_ms: f64 = self.pass_timings.iter().sum();
            let avg_ms = total_ms / self.pass_timings.len() as f64;
            lines.push(format!(
                "  passes      : {:4}  avg {avg_ms:6.1}ms  total {total_ms:7.0}ms",
                self.pass_timings.len()
            ));
        }
        lines.push(format!("  new ids     : {}", self.identities_created));
        lines.push(format!("  captures    : {}", self.captures));
        lines.push(format!("  suppressed  : {}", self.suppressed));
        if self.rejected > 0 {
            lines.push(format!("  rejected    : {}", self.rejected));
        }
        if self.frames > 0 && elapsed_s > 0.0 {
            lines.push(format!(
                "  Throughput: {:.1} frames/s",
                self.frames as f64 / elapsed_s
            ));
        }

        Some(lines.join("\n"))
    }

    pub fn pass_timings(&self) -> &[f64] {
        &self.pass_timings
    }

    pub fn captures(&self) -> usize {
        self.captures
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected
    }
}

impl Default for StdoutSessionLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SessionLogger for StdoutSessionLogger {
    fn progress(&mut self, frames: usize, observations: usize) {
        self.frames = frames;
        self.observations = observations;
        if frames % self.throttle_frames == 0 {
            log::info!("Processed {frames} frames ({observations} faces)");
        }
    }

    fn pass(&mut self, report: &PassReport, duration_ms: f64) {
        self.pass_timings.push(duration_ms);
        self.captures += report.captures.len();
        self.suppressed += report.suppressed;
        self.identities_created += report.identities_created.len();
        for id in &report.identities_created {
            log::info!("New customer {id}");
        }
    }

    fn rejected(&mut self, frame: u64, reason: &str) {
        self.rejected += 1;
        log::warn!("Frame {frame}: face rejected: {reason}");
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
