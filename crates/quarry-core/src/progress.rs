//! The progress-reporting contract.
//!
//! Long-running operations invoke a [`ProgressReporter`] periodically with a
//! percent on a 0-100 scale and an optional status line. Delivery is
//! infallible by contract: a reporter must never propagate failure into the
//! host operation. Sinks that can fail (like the tracker-backed one in
//! `quarry-store`) degrade to a log line instead.
//!
//! Percent is expected to be non-decreasing in normal operation, but that is
//! the operation's responsibility; nothing here enforces or clamps it.

use std::sync::Arc;

/// Callback shape invoked by long-running operations.
///
/// Implemented for closures, so a bare `|percent, message| ...` works
/// wherever a reporter is expected.
pub trait ProgressReporter: Send + Sync {
    /// Deliver a progress report. Must not block for long and must not
    /// panic; there is no return value to propagate failure through.
    fn report(&self, percent: f64, message: Option<&str>);
}

impl<F> ProgressReporter for F
where
    F: Fn(f64, Option<&str>) + Send + Sync,
{
    fn report(&self, percent: f64, message: Option<&str>) {
        self(percent, message)
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(&self, _percent: f64, _message: Option<&str>) {}
}

/// Reporter that emits one structured log line per report.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, percent: f64, message: Option<&str>) {
        match message {
            Some(message) => tracing::info!(percent, message, "progress"),
            None => tracing::info!(percent, "progress"),
        }
    }
}

/// Reporter that maps a sub-stage's local 0-100 onto a slice of the overall
/// scale.
///
/// Operations with several stages keep each stage's arithmetic local: a
/// fetch stage reporting 0-100 through `StageProgress::new(inner, 0.0, 50.0)`
/// lands on the overall 0-50, an upload stage through `(inner, 50.0, 100.0)`
/// on 50-100.
pub struct StageProgress {
    inner: Arc<dyn ProgressReporter>,
    lo: f64,
    hi: f64,
}

impl StageProgress {
    /// Wrap `inner`, mapping local percent onto `[lo, hi]`.
    pub fn new(inner: Arc<dyn ProgressReporter>, lo: f64, hi: f64) -> Self {
        Self { inner, lo, hi }
    }
}

impl ProgressReporter for StageProgress {
    fn report(&self, percent: f64, message: Option<&str>) {
        let local = percent.clamp(0.0, 100.0);
        let overall = self.lo + (self.hi - self.lo) * local / 100.0;
        self.inner.report(overall, message);
    }
}

/// Reporter that forwards each report to every sink in order.
///
/// The CLI wires a log sink and a tracker sink together this way.
#[derive(Default)]
pub struct FanoutProgress {
    sinks: Vec<Arc<dyn ProgressReporter>>,
}

impl FanoutProgress {
    /// An empty fan-out (equivalent to [`NullProgress`]).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: Arc<dyn ProgressReporter>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressReporter for FanoutProgress {
    fn report(&self, percent: f64, message: Option<&str>) {
        for sink in &self.sinks {
            sink.report(percent, message);
        }
    }
}
