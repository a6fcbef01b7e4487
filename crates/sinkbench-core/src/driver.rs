//! The batch driver: emit a batch, time it, sample memory, report, pause.
//!
//! The driver has one state, running, and leaves it only when the stop flag
//! is raised or the configured batch limit is reached. Events go to the sink
//! in index order and batches never overlap. A rejected event is counted and
//! skipped; a bad clock reading only degrades that batch's timing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::clock::{Clock, Elapsed, SystemClock};
use crate::config::DriverConfig;
use crate::memory::{self, MemorySnapshot};
use crate::record::EventProducer;
use crate::sink::EventSink;

/// Granularity at which the pause re-checks the stop flag.
const STOP_POLL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Sequence counter
// ---------------------------------------------------------------------------

/// Monotonic batch counter. Starts at 0, advances once per completed batch.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the batch in progress (or about to start).
    pub fn current(&self) -> u64 {
        self.next
    }

    /// Mark the current batch complete and return its number.
    pub fn advance(&mut self) -> u64 {
        let done = self.next;
        self.next += 1;
        done
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub sequence: u64,
    pub batch_size: usize,
    pub elapsed: Elapsed,
    /// Events the sink rejected in this batch.
    pub failures: u64,
    pub memory: MemorySnapshot,
}

impl BatchReport {
    /// `{seq}: Logged {n} events in {ms} ms`, plus the failure count if any.
    pub fn throughput_line(&self) -> String {
        let mut line = format!(
            "{}: Logged {} events in {}",
            self.sequence, self.batch_size, self.elapsed
        );
        if self.failures > 0 {
            line.push_str(&format!(", {} failed", self.failures));
        }
        line
    }

    pub fn memory_line(&self) -> String {
        self.memory.to_string()
    }
}

/// Totals accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub events_attempted: u64,
    pub events_failed: u64,
    /// Sum of measured batch times. Unavailable batches add nothing.
    pub measured_ms: u64,
}

impl RunSummary {
    /// Accepted events per second over measured time, if any was measured.
    pub fn events_per_sec(&self) -> Option<f64> {
        if self.measured_ms == 0 {
            return None;
        }
        let accepted = self.events_attempted - self.events_failed;
        Some(accepted as f64 * 1000.0 / self.measured_ms as f64)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Drives an [`EventSink`] in fixed-size batches.
#[derive(Debug)]
pub struct BatchDriver<C: Clock = SystemClock> {
    config: DriverConfig,
    producer: EventProducer,
    clock: C,
    sequence: SequenceCounter,
    summary: RunSummary,
}

impl BatchDriver<SystemClock> {
    pub fn new(config: DriverConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> BatchDriver<C> {
    pub fn with_clock(config: DriverConfig, clock: C) -> Self {
        let producer = EventProducer::new(config.event_name.clone());
        Self {
            config,
            producer,
            clock,
            sequence: SequenceCounter::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn producer(&self) -> &EventProducer {
        &self.producer
    }

    /// Sequence number the next batch will carry.
    pub fn sequence(&self) -> u64 {
        self.sequence.current()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Run one batch against `sink` and return its report.
    pub fn run_batch<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> BatchReport {
        let sequence = self.sequence.current();
        let batch_size = self.config.batch_size;
        let start = self.clock.now_ms();

        let mut failures = 0u64;
        for index in 0..batch_size as u64 {
            if let Err(e) = self.producer.emit(index, sink) {
                failures += 1;
                log::debug!("batch {sequence}: event {index} rejected by {}: {e}", sink.name());
            }
        }

        let elapsed = Elapsed::between(start, self.clock.now_ms());
        match elapsed {
            Elapsed::Clamped { skew_ms } => {
                log::warn!("batch {sequence}: clock stepped back {skew_ms} ms, elapsed clamped to 0");
            }
            Elapsed::Unavailable => {
                log::warn!("batch {sequence}: clock unavailable, elapsed not measured");
            }
            Elapsed::Measured(_) => {}
        }
        if failures > 0 {
            log::warn!(
                "batch {sequence}: {failures} of {batch_size} events rejected by {}",
                sink.name()
            );
        }

        let memory = memory::sample();
        self.sequence.advance();

        self.summary.batches += 1;
        self.summary.events_attempted += batch_size as u64;
        self.summary.events_failed += failures;
        if let Elapsed::Measured(ms) = elapsed {
            self.summary.measured_ms += ms;
        }

        BatchReport {
            sequence,
            batch_size,
            elapsed,
            failures,
            memory,
        }
    }

    /// Run batches until `stop` is raised or `max_batches` is reached.
    ///
    /// `on_report` sees every report before the pause that follows it. The
    /// flag is checked between batches and during the pause; a batch in
    /// progress always completes.
    pub fn run<S, F>(&mut self, sink: &mut S, stop: &AtomicBool, mut on_report: F) -> RunSummary
    where
        S: EventSink + ?Sized,
        F: FnMut(&BatchReport),
    {
        while !stop.load(Ordering::SeqCst) {
            let report = self.run_batch(sink);
            on_report(&report);

            if let Some(max) = self.config.max_batches
                && self.summary.batches >= max
            {
                break;
            }
            self.pause(stop);
        }
        self.summary.clone()
    }

    fn pause(&self, stop: &AtomicBool) {
        if self.config.pause.is_zero() {
            return;
        }
        let deadline = Instant::now() + self.config.pause;
        while !stop.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(STOP_POLL));
        }
    }
}
