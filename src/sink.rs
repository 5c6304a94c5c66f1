//! Batch sinks
//!
//! A [`Sink`] receives the batches produced by the export pipeline, in
//! order. Shipped sinks:
//!
//! - [`MemorySink`]: keeps batches in memory (embedding, tests)
//! - [`JsonLinesSink`]: one JSON array per batch per line
//! - [`HttpSink`]: POSTs each batch to `<base>/facts`
//! - [`BackgroundSink`]: runs any `Send` sink on a delivery worker thread
//! - [`crate::html_output::HtmlSink`]: renders an HTML report on close
//! - [`crate::otlp_exporter::OtlpSink`]: OpenTelemetry spans (feature `otlp`)

use crate::error::SinkError;
use crate::event::Record;
use crate::export::Batch;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default base URL of the fact collector
pub const DEFAULT_HTTP_BASE: &str = "http://localhost:8765";

/// Batches a delivery worker holds before rejecting new ones
pub const DEFAULT_DELIVERY_QUEUE: usize = 64;

/// Consumer of exported batches
pub trait Sink {
    /// Deliver one batch; batches arrive in sequence order
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError>;

    /// Called once after the final batch
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// In-memory sink; clones share the same batch log
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Rc<RefCell<Vec<Batch>>>,
    failures: Rc<Cell<usize>>,
    closed: Rc<Cell<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` batches
    pub fn fail_next(&self, count: usize) {
        self.failures.set(count);
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.borrow().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.borrow().len()
    }

    /// Every delivered record, in delivery order
    pub fn all_records(&self) -> Vec<Record> {
        self.batches
            .borrow()
            .iter()
            .flat_map(|b| b.records.iter().cloned())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Sink for MemorySink {
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
        if self.closed.get() {
            return Err(SinkError::Closed);
        }
        let failures = self.failures.get();
        if failures > 0 {
            self.failures.set(failures - 1);
            return Err(SinkError::Rejected {
                sequence: batch.sequence,
                reason: "injected failure".to_string(),
            });
        }
        self.batches.borrow_mut().push(batch.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closed.set(true);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Writes each batch as one JSON array line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Sink writing to a newly created file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> Sink for JsonLinesSink<W> {
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &batch.records)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// POSTs each batch as a JSON array to `<base>/facts`
pub struct HttpSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpSink {
    pub fn new(base: &str) -> Result<Self, SinkError> {
        Self::with_timeout(base, Duration::from_secs(5))
    }

    pub fn with_timeout(base: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: facts_url(base),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Collector endpoint for a base URL
pub fn facts_url(base: &str) -> String {
    format!("{}/facts", base.trim_end_matches('/'))
}

impl Sink for HttpSink {
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
        self.client
            .post(&self.url)
            .json(&batch.records)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Delivery counters shared between a [`BackgroundSink`] and its worker
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl DeliveryCounters {
    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            batches_queued: self.queued.load(Ordering::Relaxed),
            batches_sent: self.sent.load(Ordering::Relaxed),
            batches_failed: self.failed.load(Ordering::Relaxed),
            batches_rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a delivery worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Accepted onto the queue
    pub batches_queued: u64,
    /// Delivered by the inner sink
    pub batches_sent: u64,
    /// Refused by the inner sink on the worker thread
    pub batches_failed: u64,
    /// Refused at the queue because it was full
    pub batches_rejected: u64,
}

/// Moves delivery off the hook thread
///
/// `send_batch` only enqueues onto a bounded channel; one named worker
/// thread drains it in order and calls the wrapped sink. A full queue
/// rejects the batch instead of blocking, so the pipeline drops and counts
/// it like any other failed delivery. Failures on the worker are counted in
/// [`DeliveryCounters`] and logged there.
pub struct BackgroundSink {
    name: &'static str,
    sender: Option<Sender<Batch>>,
    worker: Option<JoinHandle<Result<(), SinkError>>>,
    counters: Arc<DeliveryCounters>,
}

impl BackgroundSink {
    pub fn spawn(inner: Box<dyn Sink + Send>) -> Result<Self, SinkError> {
        Self::with_capacity(inner, DEFAULT_DELIVERY_QUEUE)
    }

    pub fn with_capacity(inner: Box<dyn Sink + Send>, capacity: usize) -> Result<Self, SinkError> {
        let name = inner.name();
        let (sender, receiver) = channel::bounded(capacity.max(1));
        let counters = Arc::new(DeliveryCounters::default());

        let worker_counters = counters.clone();
        let worker = thread::Builder::new()
            .name(format!("rastro-{}-delivery", name))
            .spawn(move || delivery_worker(inner, receiver, worker_counters))?;

        tracing::debug!(sink = name, capacity, "delivery worker started");
        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            counters,
        })
    }

    /// Handle that stays readable after the sink is boxed or closed
    pub fn counters(&self) -> Arc<DeliveryCounters> {
        self.counters.clone()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    /// Close the queue and wait for the worker to drain it
    fn join(&mut self) -> Result<(), SinkError> {
        drop(self.sender.take());
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| SinkError::WorkerPanicked)?,
            None => Ok(()),
        }
    }
}

fn delivery_worker(
    mut inner: Box<dyn Sink + Send>,
    batches: Receiver<Batch>,
    counters: Arc<DeliveryCounters>,
) -> Result<(), SinkError> {
    let mut last = Ok(());
    for batch in batches.iter() {
        last = match inner.send_batch(&batch) {
            Ok(()) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    sink = inner.name(),
                    sequence = batch.sequence,
                    error = %err,
                    "background delivery failed, dropping batch"
                );
                Err(err)
            }
        };
    }
    let closed = inner.close();
    last?;
    closed
}

impl Sink for BackgroundSink {
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
        let sender = self.sender.as_ref().ok_or(SinkError::Closed)?;
        match sender.try_send(batch.clone()) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Rejected {
                    sequence: batch.sequence,
                    reason: "delivery queue full".to_string(),
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Closed),
        }
    }

    /// Drains the queue; reports the last batch's failure or the inner close
    fn close(&mut self) -> Result<(), SinkError> {
        self.join()
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for BackgroundSink {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            tracing::warn!(sink = self.name, error = %err, "delivery worker stopped with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn batch(sequence: u64) -> Batch {
        Batch {
            sequence,
            records: vec![
                Record::GlobalsAreProperties { value: true },
                Record::End,
            ],
        }
    }

    #[test]
    fn test_memory_sink_shares_log() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        handle.send_batch(&batch(0)).unwrap();

        assert_eq!(sink.batch_count(), 1);
        assert_eq!(sink.all_records().len(), 2);
    }

    #[test]
    fn test_memory_sink_injected_failure() {
        let mut sink = MemorySink::new();
        sink.fail_next(1);
        assert!(sink.send_batch(&batch(0)).is_err());
        assert!(sink.send_batch(&batch(1)).is_ok());
        assert_eq!(sink.batches()[0].sequence, 1);
    }

    #[test]
    fn test_memory_sink_rejects_after_close() {
        let mut sink = MemorySink::new();
        sink.close().unwrap();
        assert!(matches!(sink.send_batch(&batch(0)), Err(SinkError::Closed)));
    }

    #[test]
    fn test_json_lines_one_line_per_batch() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.send_batch(&batch(0)).unwrap();
        sink.send_batch(&batch(1)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Vec<Record> = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, batch(0).records);
    }

    #[test]
    fn test_facts_url() {
        assert_eq!(facts_url("http://localhost:8765"), "http://localhost:8765/facts");
        assert_eq!(facts_url("http://collector/"), "http://collector/facts");
    }

    #[test]
    fn test_http_sink_unreachable_endpoint_errors() {
        let mut sink =
            HttpSink::with_timeout("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9/facts");
        assert!(sink.send_batch(&batch(0)).is_err());
    }

    /// Send sink recording sequences, optionally stalled behind a gate
    struct GatedSink {
        delivered: Arc<Mutex<Vec<u64>>>,
        started: Sender<u64>,
        gate: Option<Arc<Mutex<()>>>,
        fail: bool,
    }

    fn gated(
        gate: Option<Arc<Mutex<()>>>,
        fail: bool,
    ) -> (GatedSink, Arc<Mutex<Vec<u64>>>, Receiver<u64>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let (started, started_rx) = channel::unbounded();
        let sink = GatedSink {
            delivered: delivered.clone(),
            started,
            gate,
            fail,
        };
        (sink, delivered, started_rx)
    }

    impl Sink for GatedSink {
        fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
            let _ = self.started.send(batch.sequence);
            if let Some(gate) = &self.gate {
                let _held = gate.lock().unwrap();
            }
            if self.fail {
                return Err(SinkError::Rejected {
                    sequence: batch.sequence,
                    reason: "collector down".to_string(),
                });
            }
            self.delivered.lock().unwrap().push(batch.sequence);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    #[test]
    fn test_background_sink_delivers_in_order() {
        let (inner, delivered, _started) = gated(None, false);
        let mut sink = BackgroundSink::spawn(Box::new(inner)).unwrap();
        assert_eq!(sink.name(), "gated");

        for sequence in 0..5 {
            sink.send_batch(&batch(sequence)).unwrap();
        }
        sink.close().unwrap();

        assert_eq!(*delivered.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        let stats = sink.stats();
        assert_eq!(stats.batches_queued, 5);
        assert_eq!(stats.batches_sent, 5);
        assert_eq!(stats.batches_failed, 0);
    }

    #[test]
    fn test_background_sink_counts_worker_failures() {
        let (inner, delivered, _started) = gated(None, true);
        let mut sink = BackgroundSink::spawn(Box::new(inner)).unwrap();
        let counters = sink.counters();

        // the hook thread only sees the enqueue succeed
        for sequence in 0..3 {
            assert!(sink.send_batch(&batch(sequence)).is_ok());
        }
        assert!(matches!(sink.close(), Err(SinkError::Rejected { sequence: 2, .. })));

        assert!(delivered.lock().unwrap().is_empty());
        let stats = counters.snapshot();
        assert_eq!(stats.batches_failed, 3);
        assert_eq!(stats.batches_sent, 0);
    }

    #[test]
    fn test_background_sink_full_queue_rejects_without_blocking() {
        let gate = Arc::new(Mutex::new(()));
        let (inner, delivered, started) = gated(Some(gate.clone()), false);
        let mut sink = BackgroundSink::with_capacity(Box::new(inner), 1).unwrap();
        let held = gate.lock().unwrap();

        // worker takes batch 0 and stalls inside the inner sink
        sink.send_batch(&batch(0)).unwrap();
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 0);

        sink.send_batch(&batch(1)).unwrap();
        assert!(matches!(
            sink.send_batch(&batch(2)),
            Err(SinkError::Rejected { sequence: 2, .. })
        ));
        assert_eq!(sink.stats().batches_rejected, 1);

        drop(held);
        sink.close().unwrap();
        assert_eq!(*delivered.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_background_sink_rejects_after_close() {
        let (inner, _delivered, _started) = gated(None, false);
        let mut sink = BackgroundSink::spawn(Box::new(inner)).unwrap();
        sink.close().unwrap();
        assert!(sink.close().is_ok());
        assert!(matches!(sink.send_batch(&batch(0)), Err(SinkError::Closed)));
    }
}
