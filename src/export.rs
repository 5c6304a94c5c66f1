//! Batching export pipeline
//!
//! Records are buffered in submission order and handed to a [`Sink`] in
//! batches. Two triggers flush the buffer:
//!
//! - **size**: the buffer grows past `batch_threshold` records; the batch goes
//!   out immediately and any pending delayed flush is cancelled;
//! - **delay**: the first record buffered after a flush arms a one-shot
//!   deadline `flush_delay` in the future; when it passes, whatever is
//!   buffered is flushed, however small.
//!
//! ```text
//!            submit (buffer <= threshold)
//!   ┌──────┐ ───────────────────────────▶ ┌───────────┐
//!   │ Idle │                              │ Scheduled │
//!   └──────┘ ◀─────────────────────────── └───────────┘
//!       ▲       deadline passed / size           │
//!       │       trigger (Flushing)               │
//!       └────────────────────────────────────────┘
//! ```
//!
//! The recorder is single-threaded, so the deadline is not a timer thread:
//! it is checked on every submit and whenever the host yields via
//! [`ExportPipeline::poll`]. At most one deadline is armed at a time.
//!
//! Delivery failures are not retried: the batch is dropped, counted in
//! [`PipelineStats`] and logged. Retrying would either reorder records or
//! stall the traced program.

use crate::error::SinkError;
use crate::event::Record;
use crate::sink::Sink;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Default size trigger
pub const DEFAULT_BATCH_THRESHOLD: usize = 10;

/// Largest size trigger a configuration may ask for
pub const MAX_BATCH_THRESHOLD: usize = 100_000;

/// Records preallocated for the buffer regardless of the threshold
const BUFFER_PREALLOC: usize = 1024;

/// Default delay trigger
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// A batch of records handed to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Position of this batch in the session, starting at 0
    pub sequence: u64,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Source of "now" for the delay trigger
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and give the
/// other to the pipeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }
}

/// Flush triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportConfig {
    /// Flush immediately once the buffer holds more than this many records
    pub batch_threshold: usize,
    /// Delay before buffered records are flushed regardless of size
    pub flush_delay: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            flush_delay: DEFAULT_FLUSH_DELAY,
        }
    }
}

/// Whether a delayed flush is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Scheduled,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub records_submitted: u64,
    pub batches_sent: u64,
    pub records_sent: u64,
    pub size_flushes: u64,
    pub delayed_flushes: u64,
    pub failed_batches: u64,
    pub dropped_records: u64,
}

/// Buffer between the encoder and the sink
pub struct ExportPipeline {
    sink: Box<dyn Sink>,
    clock: Box<dyn Clock>,
    config: ExportConfig,
    buffer: Vec<Record>,
    deadline: Option<Instant>,
    next_sequence: u64,
    stats: PipelineStats,
    closed: bool,
}

impl ExportPipeline {
    pub fn new(sink: Box<dyn Sink>, config: ExportConfig) -> Self {
        Self::with_clock(sink, config, Box::new(SystemClock))
    }

    pub fn with_clock(sink: Box<dyn Sink>, config: ExportConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            config,
            buffer: Vec::with_capacity(
                config.batch_threshold.saturating_add(1).min(BUFFER_PREALLOC),
            ),
            deadline: None,
            next_sequence: 0,
            stats: PipelineStats::default(),
            closed: false,
        }
    }

    /// Append a record, flushing according to the size and delay triggers
    pub fn submit(&mut self, record: Record) {
        if self.closed {
            tracing::warn!("record submitted after pipeline shutdown, dropping");
            self.stats.dropped_records += 1;
            return;
        }

        // A deadline that passed since the last hook fires before this record
        self.poll();

        self.buffer.push(record);
        self.stats.records_submitted += 1;

        if self.buffer.len() > self.config.batch_threshold {
            self.stats.size_flushes += 1;
            self.flush();
        } else if self.deadline.is_none() {
            self.deadline = Some(self.clock.now() + self.config.flush_delay);
        }
    }

    /// Fire the delayed flush if its deadline has passed
    ///
    /// Returns whether a delayed flush ran.
    pub fn poll(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if self.clock.now() >= deadline => {
                self.stats.delayed_flushes += 1;
                self.flush();
                true
            }
            _ => false,
        }
    }

    /// Hand the whole buffer to the sink and cancel any pending deadline
    ///
    /// A no-op on an empty buffer. Failures are logged and counted.
    pub fn flush(&mut self) {
        self.deadline = None;
        if let Err(err) = self.deliver() {
            tracing::warn!(error = %err, "dropping batch after sink failure");
        }
    }

    fn deliver(&mut self) -> Result<usize, SinkError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let batch = Batch {
            sequence: self.next_sequence,
            records: std::mem::take(&mut self.buffer),
        };
        self.next_sequence += 1;
        let count = batch.len() as u64;

        match self.sink.send_batch(&batch) {
            Ok(()) => {
                self.stats.batches_sent += 1;
                self.stats.records_sent += count;
                tracing::trace!(sequence = batch.sequence, records = count, "batch delivered");
                Ok(batch.len())
            }
            Err(err) => {
                self.stats.failed_batches += 1;
                self.stats.dropped_records += count;
                Err(err)
            }
        }
    }

    /// Final unconditional flush, then close the sink
    ///
    /// Unlike hook-time flushes, failures here are returned. Idempotent.
    pub fn shutdown(&mut self) -> Result<PipelineStats, SinkError> {
        if self.closed {
            return Ok(self.stats);
        }
        self.deadline = None;
        self.closed = true;

        let flushed = self.deliver();
        let closed = self.sink.close();
        flushed?;
        closed?;
        Ok(self.stats)
    }

    pub fn state(&self) -> PipelineState {
        if self.deadline.is_some() {
            PipelineState::Scheduled
        } else {
            PipelineState::Idle
        }
    }

    /// Records waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn config(&self) -> ExportConfig {
        self.config
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }
}

impl Drop for ExportPipeline {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.shutdown() {
                tracing::warn!(error = %err, "final flush failed during drop");
            }
        }
    }
}
