use std::{collections::HashMap, sync::Arc};

use crossbeam_queue::ArrayQueue;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::{
    model::{Aggregation, AggregationFreq},
    telemetry::Telemetry,
    transport::{Transport, TransportError},
};

/// Where a batch of lines is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Destination {
    Standard,
    Aggregated(Aggregation, AggregationFreq),
}

/// A bounded queue of encoded lines.
///
/// Producers push concurrently. Draining is serialized by `drain_lock`, so every line is taken by exactly one drain.
struct LineQueue {
    lines: ArrayQueue<String>,
    drain_lock: Mutex<()>,
}

impl LineQueue {
    fn new(capacity: usize) -> Self {
        LineQueue { lines: ArrayQueue::new(capacity), drain_lock: Mutex::new(()) }
    }

    fn is_full(&self) -> bool {
        self.lines.is_full()
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn push(&self, line: String) -> Result<(), String> {
        self.lines.push(line)
    }

    fn force_push(&self, line: String) -> Option<String> {
        self.lines.force_push(line)
    }

    /// Takes every line queued at the time of the call, in FIFO order.
    fn drain(&self) -> Vec<String> {
        let _guard = self.drain_lock.lock();

        // Only take what is queued right now, so producers racing with us can't keep the drain going forever.
        let queued = self.lines.len();
        let mut lines = Vec::with_capacity(queued);
        for _ in 0..queued {
            match self.lines.pop() {
                Some(line) => lines.push(line),
                None => break,
            }
        }
        lines
    }
}

/// Buffers encoded lines and hands them to the transport in batches.
///
/// Lines for the standard endpoint and for each aggregated endpoint are buffered separately, each with a capacity of
/// the configured flush size. Transport failures are logged and the affected batch is dropped.
pub(crate) struct BufferingEngine {
    standard: LineQueue,
    aggregated: RwLock<HashMap<(Aggregation, AggregationFreq), Arc<LineQueue>>>,
    capacity: usize,
    dry_run: bool,
    transport: Arc<dyn Transport>,
    telemetry: Arc<Telemetry>,
}

impl BufferingEngine {
    pub fn new(capacity: usize, dry_run: bool, transport: Arc<dyn Transport>, telemetry: Arc<Telemetry>) -> Self {
        BufferingEngine {
            standard: LineQueue::new(capacity),
            aggregated: RwLock::new(HashMap::new()),
            capacity,
            dry_run,
            transport,
            telemetry,
        }
    }

    /// Buffers a line for the standard endpoint, flushing when the buffer fills up.
    pub fn enqueue(&self, line: String) {
        self.enqueue_into(&self.standard, Destination::Standard, line);
    }

    /// Buffers a line for the endpoint of the given aggregation and frequency, flushing when the buffer fills up.
    pub fn enqueue_aggregated(&self, line: String, aggregation: Aggregation, frequency: AggregationFreq) {
        let queue = self.aggregated_queue(aggregation, frequency);
        self.enqueue_into(&queue, Destination::Aggregated(aggregation, frequency), line);
    }

    /// Flushes every buffer, sending one batch per non-empty buffer.
    ///
    /// Does nothing in dry-run mode.
    pub fn flush(&self) {
        if self.dry_run {
            trace!("Dry run enabled, skipping flush.");
            return;
        }

        self.flush_queue(&self.standard, Destination::Standard);

        let aggregated = self
            .aggregated
            .read()
            .iter()
            .map(|(key, queue)| (*key, Arc::clone(queue)))
            .collect::<Vec<_>>();
        for ((aggregation, frequency), queue) in aggregated {
            self.flush_queue(&queue, Destination::Aggregated(aggregation, frequency));
        }
    }

    /// Removes and returns every line buffered for the standard endpoint without sending them.
    pub fn take_buffered(&self) -> Vec<String> {
        self.standard.drain()
    }

    fn aggregated_queue(&self, aggregation: Aggregation, frequency: AggregationFreq) -> Arc<LineQueue> {
        let key = (aggregation, frequency);
        if let Some(queue) = self.aggregated.read().get(&key) {
            return Arc::clone(queue);
        }

        let mut aggregated = self.aggregated.write();
        Arc::clone(aggregated.entry(key).or_insert_with(|| Arc::new(LineQueue::new(self.capacity))))
    }

    fn enqueue_into(&self, queue: &LineQueue, destination: Destination, line: String) {
        if self.dry_run {
            if let Some(evicted) = queue.force_push(line) {
                trace!(line = %evicted, "Dry run buffer full, evicting oldest line.");
                self.telemetry.track_line_evicted();
            }
            self.telemetry.track_line_buffered();
            return;
        }

        if queue.is_full() {
            self.flush_queue(queue, destination);
        }

        match queue.push(line) {
            Ok(()) => {
                self.telemetry.track_line_buffered();
                if queue.len() >= self.capacity {
                    self.flush_queue(queue, destination);
                }
            }
            Err(line) => {
                // Other producers refilled the buffer before we could insert, so send this line on its own rather
                // than dropping it.
                debug!("Buffer full after flush, sending line directly.");
                self.telemetry.track_direct_send();
                self.deliver(destination, &line, 1);
            }
        }
    }

    fn flush_queue(&self, queue: &LineQueue, destination: Destination) {
        let lines = queue.drain();
        if lines.is_empty() {
            return;
        }

        let batch = lines.join("\n");
        trace!(?destination, lines = lines.len(), bytes = batch.len(), "Flushing batch.");
        self.deliver(destination, &batch, lines.len());
    }

    fn deliver(&self, destination: Destination, batch: &str, lines: usize) {
        let result = match destination {
            Destination::Standard => self.transport.send(batch),
            Destination::Aggregated(aggregation, frequency) => {
                self.transport.send_aggregated(batch, aggregation, frequency)
            }
        };

        match result {
            Ok(()) => self.telemetry.track_batch_sent(lines, batch.len()),
            Err(e @ TransportError::Unsupported { .. }) => {
                warn!(error = %e, lines, "Transport cannot deliver aggregated metrics, dropping batch.");
                self.telemetry.track_batch_failed(lines);
            }
            Err(e) => {
                warn!(transport = self.transport.name(), error = %e, lines, "Failed to send batch, dropping it.");
                self.telemetry.track_batch_failed(lines);
            }
        }
    }
}
