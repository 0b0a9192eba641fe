//! Scan progress reporting.
//!
//! Producers may call [`ProgressReporter::report`] thousands of times per
//! second; the reporter forwards only what a UI can usefully render.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Receives progress updates.
///
/// Implementations must return quickly; a sink that blocks should buffer
/// on its own side.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn on_progress(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

/// Discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _percent: u8, _message: &str) {}
}

/// Logs updates at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_progress(&self, percent: u8, message: &str) {
        debug!(percent, "{message}");
    }
}

/// Forwards every update to several sinks.
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }
}

impl ProgressSink for CompositeSink {
    fn on_progress(&self, percent: u8, message: &str) {
        for sink in &self.sinks {
            sink.on_progress(percent, message);
        }
    }
}

/// A progress update as delivered through a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Overall completion, 0 to 100.
    pub percent: u8,
    /// Human-readable status.
    pub message: String,
    /// Time since the sink was created.
    pub elapsed: Duration,
}

/// Publishes updates on a tokio broadcast channel.
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
    started: Instant,
}

impl BroadcastSink {
    /// Create a sink whose channel buffers `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            started: Instant::now(),
        }
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ProgressSink for BroadcastSink {
    fn on_progress(&self, percent: u8, message: &str) {
        // No receivers is fine; nobody is watching.
        let _ = self.tx.send(ProgressEvent {
            percent,
            message: message.to_string(),
            elapsed: self.started.elapsed(),
        });
    }
}

/// Throttling parameters for [`ProgressReporter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum time between non-forced updates.
    pub interval: Duration,
    /// Interval used while in burst mode.
    pub burst_interval: Duration,
    /// Percent change that bypasses the interval.
    pub min_step: u8,
    /// Burst mode stays on while at most this many items were processed.
    pub burst_threshold: u64,
    /// Upper bound for the interval under backpressure.
    pub max_interval: Duration,
    /// A sink call slower than this counts as backpressure.
    pub slow_sink: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(75),
            burst_interval: Duration::from_millis(16),
            min_step: 4,
            burst_threshold: 200,
            max_interval: Duration::from_millis(500),
            slow_sink: Duration::from_millis(8),
        }
    }
}

#[derive(Debug)]
struct ReporterState {
    last_emit: Option<Instant>,
    last_percent: Option<u8>,
    high_water: u8,
    burst: bool,
    backpressure: f64,
    emitted: u64,
    suppressed: u64,
}

/// Thread-safe, throttled progress channel.
///
/// Emitted percentages never decrease. 0% (as the first update) and 100%
/// are always delivered. The sink is called with the internal lock held,
/// so it must not report back into the same reporter.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    config: ProgressConfig,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    /// Create a reporter starting in burst mode.
    pub fn new(sink: Arc<dyn ProgressSink>, config: ProgressConfig) -> Self {
        Self {
            sink,
            config,
            state: Mutex::new(ReporterState {
                last_emit: None,
                last_percent: None,
                high_water: 0,
                burst: true,
                backpressure: 1.0,
                emitted: 0,
                suppressed: 0,
            }),
        }
    }

    /// Create a reporter that discards everything.
    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink), ProgressConfig::default())
    }

    /// Report progress. Returns whether the update reached the sink.
    pub fn report(&self, percent: u8, message: &str, force: bool) -> bool {
        let mut state = self.state.lock();
        let percent = percent.min(100).max(state.high_water);

        let boundary = (percent == 0 && state.last_percent.is_none())
            || (percent == 100 && state.last_percent != Some(100));
        let now = Instant::now();
        let due = match (state.last_emit, state.last_percent) {
            (Some(at), Some(last)) => {
                now.duration_since(at) >= self.current_interval(&state)
                    || percent.saturating_sub(last) >= self.config.min_step
            }
            _ => true,
        };

        if !(force || boundary || due) {
            state.suppressed += 1;
            return false;
        }

        let call_started = Instant::now();
        self.sink.on_progress(percent, message);
        let call_time = call_started.elapsed();

        if call_time > self.config.slow_sink {
            state.backpressure = (state.backpressure * 1.5).min(self.max_backpressure());
        } else {
            state.backpressure = (state.backpressure * 0.9).max(1.0);
        }
        state.last_emit = Some(now);
        state.last_percent = Some(percent);
        state.high_water = percent;
        state.emitted += 1;
        true
    }

    fn max_backpressure(&self) -> f64 {
        let base = self.config.interval.as_secs_f64();
        if base <= 0.0 {
            return 1.0;
        }
        (self.config.max_interval.as_secs_f64() / base).max(1.0)
    }

    fn current_interval(&self, state: &ReporterState) -> Duration {
        if state.burst {
            return self.config.burst_interval;
        }
        self.config
            .interval
            .mul_f64(state.backpressure)
            .min(self.config.max_interval)
    }

    /// Turn burst mode on or off.
    pub fn set_burst_mode(&self, enabled: bool) {
        self.state.lock().burst = enabled;
    }

    /// Tell the reporter how many items the producer has handled; burst
    /// mode ends once the scan is no longer small.
    pub fn note_items(&self, items: u64) {
        if items > self.config.burst_threshold {
            self.state.lock().burst = false;
        }
    }

    /// Stretch the interval by `factor` (at least 1).
    pub fn set_backpressure(&self, factor: f64) {
        let factor = factor.clamp(1.0, self.max_backpressure());
        self.state.lock().backpressure = factor;
    }

    /// Highest percent emitted so far.
    pub fn last_percent(&self) -> Option<u8> {
        self.state.lock().last_percent
    }

    /// Number of updates that reached the sink and number suppressed.
    pub fn counts(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.emitted, state.suppressed)
    }

    /// A view mapping 0..=1 onto `start..=end` percent.
    pub fn stage(&self, start: u8, end: u8) -> Stage<'_> {
        Stage {
            reporter: self,
            start: start.min(100),
            end: end.clamp(start.min(100), 100),
        }
    }
}

/// A slice of the overall progress budget.
#[derive(Clone, Copy)]
pub struct Stage<'a> {
    reporter: &'a ProgressReporter,
    start: u8,
    end: u8,
}

impl Stage<'_> {
    /// Report completion of this stage as a fraction from 0 to 1.
    pub fn report(&self, fraction: f64, message: &str) -> bool {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        let span = f64::from(self.end - self.start);
        let percent = self.start + (span * fraction).floor() as u8;
        self.reporter.report(percent, message, false)
    }

    /// Report the start of this stage, always delivered.
    pub fn begin(&self, message: &str) -> bool {
        self.reporter.report(self.start, message, true)
    }

    /// Report the end of this stage, always delivered.
    pub fn finish(&self, message: &str) -> bool {
        self.reporter.report(self.end, message, true)
    }

    pub fn reporter(&self) -> &ProgressReporter {
        self.reporter
    }
}
