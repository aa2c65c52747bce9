use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, Counter, CounterFn as _};

/// A counter reported through the `metrics` facade that also keeps a local total for snapshots.
struct TrackedCounter {
    total: AtomicU64,
    reported: Counter,
}

impl TrackedCounter {
    fn new(reported: Counter) -> Self {
        TrackedCounter { total: AtomicU64::new(0), reported }
    }

    fn increment(&self, value: u64) {
        self.total.increment(value);
        self.reported.increment(value);
    }

    fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Client telemetry.
///
/// `Telemetry` collects information about the behavior of the client itself: how many lines were buffered or sampled
/// out, and how many lines and batches made it to the transport.
///
/// Every counter is registered with the global recorder, if one is installed when the client is built, under the
/// `statful.client.*` names and tagged with the transport in use. The totals are also kept locally so they can be read
/// back through [`TelemetrySnapshot`].
pub(crate) struct Telemetry {
    lines_buffered: TrackedCounter,
    lines_sampled_out: TrackedCounter,
    lines_sent: TrackedCounter,
    lines_dropped: TrackedCounter,
    lines_evicted: TrackedCounter,
    batches_sent: TrackedCounter,
    batches_failed: TrackedCounter,
    direct_sends: TrackedCounter,
    bytes_sent: TrackedCounter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance for the given transport.
    pub fn new(transport: &'static str) -> Self {
        let tracked = TrackedCounter::new;

        Telemetry {
            lines_buffered: tracked(counter!("statful.client.lines_buffered", "client_transport" => transport)),
            lines_sampled_out: tracked(counter!("statful.client.lines_sampled_out", "client_transport" => transport)),
            lines_sent: tracked(counter!("statful.client.lines_sent", "client_transport" => transport)),
            lines_dropped: tracked(counter!("statful.client.lines_dropped", "client_transport" => transport)),
            lines_evicted: tracked(counter!("statful.client.lines_evicted", "client_transport" => transport)),
            batches_sent: tracked(counter!("statful.client.batches_sent", "client_transport" => transport)),
            batches_failed: tracked(counter!("statful.client.batches_failed", "client_transport" => transport)),
            direct_sends: tracked(counter!("statful.client.direct_sends", "client_transport" => transport)),
            bytes_sent: tracked(counter!("statful.client.bytes_sent", "client_transport" => transport)),
        }
    }

    /// Tracks a line being added to a buffer.
    pub fn track_line_buffered(&self) {
        self.lines_buffered.increment(1);
    }

    /// Tracks a line rejected by the sampler.
    pub fn track_line_sampled_out(&self) {
        self.lines_sampled_out.increment(1);
    }

    /// Tracks a line evicted from a full buffer in dry-run mode.
    pub fn track_line_evicted(&self) {
        self.lines_evicted.increment(1);
    }

    /// Tracks a line that bypassed the buffer because it could not be inserted.
    pub fn track_direct_send(&self) {
        self.direct_sends.increment(1);
    }

    /// Tracks a batch successfully handed to the transport.
    pub fn track_batch_sent(&self, lines: usize, bytes_len: usize) {
        self.batches_sent.increment(1);
        self.lines_sent.increment(lines as u64);
        self.bytes_sent.increment(bytes_len as u64);
    }

    /// Tracks a batch the transport failed to deliver.
    pub fn track_batch_failed(&self, lines: usize) {
        self.batches_failed.increment(1);
        self.lines_dropped.increment(lines as u64);
    }

    /// Takes a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            lines_buffered: self.lines_buffered.get(),
            lines_sampled_out: self.lines_sampled_out.get(),
            lines_sent: self.lines_sent.get(),
            lines_dropped: self.lines_dropped.get(),
            lines_evicted: self.lines_evicted.get(),
            batches_sent: self.batches_sent.get(),
            batches_failed: self.batches_failed.get(),
            direct_sends: self.direct_sends.get(),
            bytes_sent: self.bytes_sent.get(),
        }
    }
}

/// A snapshot of the client's internal counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Lines added to a buffer.
    pub lines_buffered: u64,
    /// Lines rejected by the sampler.
    pub lines_sampled_out: u64,
    /// Lines delivered to the transport as part of a successful batch.
    pub lines_sent: u64,
    /// Lines lost to transport failures.
    pub lines_dropped: u64,
    /// Lines evicted from a full buffer in dry-run mode.
    pub lines_evicted: u64,
    /// Batches delivered to the transport.
    pub batches_sent: u64,
    /// Batches the transport failed to deliver.
    pub batches_failed: u64,
    /// Lines sent directly because the buffer was full.
    pub direct_sends: u64,
    /// Bytes delivered to the transport.
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::{Telemetry, TelemetrySnapshot};

    #[test]
    fn counters_are_reported_and_snapshotted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let telemetry = metrics::with_local_recorder(&recorder, || Telemetry::new("udp"));

        telemetry.track_line_buffered();
        telemetry.track_line_buffered();
        telemetry.track_batch_sent(2, 42);
        telemetry.track_batch_failed(3);

        assert_eq!(
            telemetry.snapshot(),
            TelemetrySnapshot {
                lines_buffered: 2,
                lines_sent: 2,
                lines_dropped: 3,
                batches_sent: 1,
                batches_failed: 1,
                bytes_sent: 42,
                ..Default::default()
            }
        );

        let reported = snapshotter.snapshot().into_vec();
        let reported_value = |name: &str| {
            reported.iter().find(|(key, _, _, _)| key.key().name() == name).map(|(key, _, _, value)| {
                assert!(key.key().labels().any(|label| label.key() == "client_transport" && label.value() == "udp"));
                match value {
                    DebugValue::Counter(v) => DebugValue::Counter(*v),
                    DebugValue::Gauge(v) => DebugValue::Gauge(*v),
                    DebugValue::Histogram(v) => DebugValue::Histogram(v.clone()),
                }
            })
        };
        assert_eq!(reported_value("statful.client.lines_buffered"), Some(DebugValue::Counter(2)));
        assert_eq!(reported_value("statful.client.bytes_sent"), Some(DebugValue::Counter(42)));
        assert_eq!(reported_value("statful.client.lines_dropped"), Some(DebugValue::Counter(3)));
    }

    #[test]
    fn works_without_a_recorder() {
        let telemetry = Telemetry::new("http");
        telemetry.track_direct_send();
        assert_eq!(telemetry.snapshot().direct_sends, 1);
    }
}
