use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use crate::{
    buffer::BufferingEngine,
    config::{BuildError, ClientConfiguration, TransportKind},
    encoder::Line,
    flusher::Flusher,
    metric::{Metric, MetricError, MetricValue},
    model::{Aggregation, AggregationFreq, Aggregations, MetricKind, Tags},
    sampler::Sampler,
    telemetry::{Telemetry, TelemetrySnapshot},
    transport::{udp::UdpTransport, Transport},
};

/// A client for sending metrics to a Statful collector.
///
/// Metrics are sampled, encoded into lines, and buffered. A batch is sent whenever the buffer reaches the configured
/// flush size, when the periodic flush runs, or when [`flush`](StatfulClient::flush) is called. Delivery failures are
/// logged and never reach the caller.
///
/// The client can be shared freely between threads. Dropping it shuts it down, flushing any buffered lines first.
///
/// Internal counters are registered with the global `metrics` recorder under `statful.client.*`, so a recorder must
/// be installed before the client is built for them to be reported. They can always be read through
/// [`telemetry`](StatfulClient::telemetry).
pub struct StatfulClient {
    config: Arc<ClientConfiguration>,
    global_tags: Tags,
    sampler: Sampler,
    enabled: AtomicBool,
    // Held shared by every call that buffers a line, and exclusively by shutdown before the final flush.
    admission: RwLock<()>,
    shut_down: AtomicBool,
    engine: Arc<BufferingEngine>,
    transport: Arc<dyn Transport>,
    flusher: Mutex<Option<Flusher>>,
    telemetry: Arc<Telemetry>,
}

impl StatfulClient {
    /// Creates a client from the given configuration, using the configured transport.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, the transport cannot be set up, or the background flush thread cannot be
    /// spawned, an error is returned.
    pub fn new(config: ClientConfiguration) -> Result<Self, BuildError> {
        config.validate()?;

        let transport: Arc<dyn Transport> = match config.transport.kind {
            TransportKind::Udp => Arc::new(UdpTransport::new(&config.transport)),
            #[cfg(feature = "http")]
            TransportKind::Http => Arc::new(crate::transport::http::HttpTransport::new(&config.transport)?),
            #[cfg(not(feature = "http"))]
            TransportKind::Http => return Err(BuildError::HttpUnavailable),
        };

        Self::with_transport(config, transport)
    }

    /// Creates a client from the given configuration that delivers batches through `transport`.
    ///
    /// The transport settings in the configuration are ignored.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the background flush thread cannot be spawned, an error is returned.
    pub fn with_transport(mut config: ClientConfiguration, transport: Arc<dyn Transport>) -> Result<Self, BuildError> {
        config.validate()?;

        let sampler = Sampler::new(config.sample_rate);
        config.sample_rate = i32::from(sampler.rate());

        let telemetry = Arc::new(Telemetry::new(transport.name()));
        let engine = Arc::new(BufferingEngine::new(
            config.flush_size,
            config.dry_run,
            Arc::clone(&transport),
            Arc::clone(&telemetry),
        ));
        let flusher = Flusher::spawn(Arc::clone(&engine), config.flush_interval)?;

        debug!(
            transport = transport.name(),
            flush_size = config.flush_size,
            flush_interval = ?config.flush_interval,
            dry_run = config.dry_run,
            "Statful client started."
        );

        Ok(StatfulClient {
            global_tags: config.global_tags(),
            sampler,
            config: Arc::new(config),
            enabled: AtomicBool::new(true),
            admission: RwLock::new(()),
            shut_down: AtomicBool::new(false),
            engine,
            transport,
            flusher: Mutex::new(flusher),
            telemetry,
        })
    }

    /// Returns the client's configuration.
    pub fn configuration(&self) -> &ClientConfiguration {
        &self.config
    }

    /// Sends a timer, in milliseconds, with the configured timer defaults.
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned.
    pub fn timer<N, V>(&self, name: N, value: V) -> Result<(), MetricError>
    where
        N: Into<String>,
        V: Into<MetricValue>,
    {
        self.sender(MetricKind::Timer, name, value).send()
    }

    /// Increments a counter by one, with the configured counter defaults.
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned.
    pub fn counter<N: Into<String>>(&self, name: N) -> Result<(), MetricError> {
        self.counter_with_value(name, 1)
    }

    /// Increments a counter by `value`, with the configured counter defaults.
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned.
    pub fn counter_with_value<N, V>(&self, name: N, value: V) -> Result<(), MetricError>
    where
        N: Into<String>,
        V: Into<MetricValue>,
    {
        self.sender(MetricKind::Counter, name, value).send()
    }

    /// Sends a gauge, with the configured gauge defaults.
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned.
    pub fn gauge<N, V>(&self, name: N, value: V) -> Result<(), MetricError>
    where
        N: Into<String>,
        V: Into<MetricValue>,
    {
        self.sender(MetricKind::Gauge, name, value).send()
    }

    /// Starts building a metric of the given kind, pre-filled with the configured defaults for that kind.
    pub fn sender<N, V>(&self, kind: MetricKind, name: N, value: V) -> MetricSender<'_>
    where
        N: Into<String>,
        V: Into<MetricValue>,
    {
        let defaults = self.config.defaults_for(kind);
        let metric = Metric::new(name, value)
            .with_tags(&defaults.tags)
            .with_aggregations(defaults.aggregations.clone())
            .with_frequency(defaults.frequency);

        MetricSender { client: self, metric }
    }

    /// Sends a metric.
    ///
    /// Global tags are added to the metric, with the metric's own tags taking precedence. The metric is subject to its
    /// own sample rate, or the configured one if it has none. Does nothing while the client is disabled.
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned.
    pub fn put(&self, metric: Metric) -> Result<(), MetricError> {
        let _admitted = self.admission.read();
        if let Some(line) = self.prepare(&metric, &metric.aggregations)? {
            self.engine.enqueue(line);
        }
        Ok(())
    }

    /// Sends a metric that was already aggregated by the caller.
    ///
    /// The metric is delivered to the collector's endpoint for the given aggregation and frequency, and its own
    /// aggregations are not encoded. Not every transport supports this: over UDP, such batches are logged and dropped.
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned.
    pub fn aggregated_put(
        &self,
        metric: Metric,
        aggregation: Aggregation,
        frequency: AggregationFreq,
    ) -> Result<(), MetricError> {
        let _admitted = self.admission.read();
        if let Some(line) = self.prepare(&metric, &Aggregations::new())? {
            self.engine.enqueue_aggregated(line, aggregation, frequency);
        }
        Ok(())
    }

    /// Sends every buffered line now.
    pub fn flush(&self) {
        self.engine.flush();
    }

    /// Enables the client.
    ///
    /// Has no effect once the client has been shut down.
    pub fn enable(&self) {
        if self.shut_down.load(Ordering::Acquire) {
            debug!("Ignoring enable on a client that has been shut down.");
            return;
        }
        self.enabled.store(true, Ordering::Release);
    }

    /// Disables the client. Metrics sent while disabled are discarded.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Returns `true` if the client is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Removes and returns the lines currently buffered for the standard endpoint, without sending them.
    ///
    /// Mostly useful in dry-run mode, to inspect what would have been sent.
    pub fn take_buffered_lines(&self) -> Vec<String> {
        self.engine.take_buffered()
    }

    /// Returns a snapshot of the client's internal counters.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Shuts the client down.
    ///
    /// Disables the client, stops the periodic flush, flushes any buffered lines, and then shuts the transport down.
    /// Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.disable();

        // Calls that saw the client enabled finish buffering their line before the final flush.
        drop(self.admission.write());

        if let Some(flusher) = self.flusher.lock().take() {
            flusher.stop();
        }
        self.engine.flush();
        self.transport.shutdown();

        debug!("Statful client shut down.");
    }

    fn prepare(&self, metric: &Metric, aggregations: &Aggregations) -> Result<Option<String>, MetricError> {
        if !self.is_enabled() {
            trace!(name = %metric.name, "Client disabled, discarding metric.");
            return Ok(None);
        }

        let sampler = metric.sample_rate.map_or(self.sampler, Sampler::new);
        if !sampler.admit() {
            trace!(name = %metric.name, rate = sampler.rate(), "Metric sampled out.");
            self.telemetry.track_line_sampled_out();
            return Ok(None);
        }

        let tags = self.global_tags.merged(&metric.tags);
        let line = Line {
            prefix: &self.config.prefix,
            namespace: metric.namespace.as_deref().unwrap_or(&self.config.namespace),
            name: &metric.name,
            tags: &tags,
            value: &metric.value,
            timestamp: metric.timestamp.unwrap_or_else(unix_timestamp),
            aggregations,
            frequency: metric.frequency,
        };

        match line.encode() {
            Ok(line) => Ok(Some(line)),
            Err(e) => {
                error!(error = %e, name = %metric.name, "Failed to encode metric.");
                Err(e)
            }
        }
    }
}

impl Drop for StatfulClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// Builder for a single metric, pre-filled with the defaults for its kind.
///
/// Created by [`StatfulClient::sender`].
#[must_use = "the metric is only sent when `send` is called"]
pub struct MetricSender<'a> {
    client: &'a StatfulClient,
    metric: Metric,
}

impl MetricSender<'_> {
    /// Merges the given tags into the metric's tags.
    pub fn with_tags(mut self, tags: &Tags) -> Self {
        self.metric = self.metric.with_tags(tags);
        self
    }

    /// Adds a single tag.
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metric = self.metric.with_tag(key, value);
        self
    }

    /// Replaces the default aggregations.
    pub fn with_aggregations<A: Into<Aggregations>>(mut self, aggregations: A) -> Self {
        self.metric = self.metric.with_aggregations(aggregations);
        self
    }

    /// Sets the aggregation frequency.
    pub fn with_frequency(mut self, frequency: AggregationFreq) -> Self {
        self.metric = self.metric.with_frequency(frequency);
        self
    }

    /// Sets the sample rate, as a percentage from 0 to 100.
    pub fn with_sample_rate(mut self, sample_rate: i32) -> Self {
        self.metric = self.metric.with_sample_rate(sample_rate);
        self
    }

    /// Sets the namespace.
    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.metric = self.metric.with_namespace(namespace);
        self
    }

    /// Sets the timestamp, in seconds since the Unix epoch.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.metric = self.metric.with_timestamp(timestamp);
        self
    }

    /// Sends the metric.
    ///
    /// # Errors
    ///
    /// If the metric cannot be encoded, an error is returned.
    pub fn send(self) -> Result<(), MetricError> {
        self.client.put(self.metric)
    }
}
