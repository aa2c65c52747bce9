use std::time::Duration;

use thiserror::Error;

use crate::model::{Aggregation, AggregationFreq, Aggregations, MetricKind, Tags};

const DEFAULT_NAMESPACE: &str = "application";
const DEFAULT_HOST: &str = "api.statful.com";
const DEFAULT_UDP_PORT: u16 = 2013;
const DEFAULT_FLUSH_SIZE: usize = 10;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_SAMPLE_RATE: i32 = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_POOL_SIZE: usize = 10;

/// Errors that could occur while building a client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configuration is invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid setting.
        reason: String,
    },

    /// The API token cannot be sent as an HTTP header value.
    #[error("API token contains characters not allowed in an HTTP header")]
    InvalidToken,

    /// The HTTP transport was requested but support for it was not compiled in.
    #[error("HTTP transport requested but the `http` feature is disabled")]
    HttpUnavailable,

    /// Failed to set up the HTTP transport.
    #[error("failed to set up HTTP transport: {0}")]
    Http(#[source] std::io::Error),

    /// Failed to spawn the background flush thread.
    #[error("failed to spawn background flush thread: {0}")]
    Backend(#[source] std::io::Error),
}

impl BuildError {
    fn invalid<S: Into<String>>(reason: S) -> Self {
        BuildError::InvalidConfiguration { reason: reason.into() }
    }
}

/// Transport used to deliver metrics to the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// One datagram per batch.
    Udp,
    /// One `PUT` request per batch, over a pooled connection.
    Http,
}

/// Version of the HTTP ingestion API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApiVersion {
    /// Legacy `/tel/v1/metrics` endpoint.
    V1,
    /// Current `/tel/v2.0/metrics` endpoint.
    #[default]
    V2,
}

impl ApiVersion {
    /// Returns the path metrics are sent to for this API version.
    pub const fn metrics_path(self) -> &'static str {
        match self {
            ApiVersion::V1 => "/tel/v1/metrics",
            ApiVersion::V2 => "/tel/v2.0/metrics",
        }
    }
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfiguration {
    /// Which transport to use.
    ///
    /// Defaults to [`TransportKind::Http`].
    pub kind: TransportKind,

    /// Collector host name or address.
    ///
    /// Defaults to `api.statful.com`.
    pub host: String,

    /// Collector port.
    ///
    /// When unset, HTTP uses the scheme's default port and UDP uses port 2013.
    pub port: Option<u16>,

    /// Whether to use HTTPS.
    ///
    /// Defaults to `true`.
    pub secure: bool,

    /// HTTP ingestion API version.
    pub api_version: ApiVersion,

    /// Maximum number of idle pooled HTTP connections.
    ///
    /// Defaults to 10.
    pub pool_size: usize,

    /// HTTP connect timeout.
    ///
    /// Defaults to 2 seconds.
    pub connect_timeout: Duration,

    /// HTTP request timeout, and UDP write timeout.
    ///
    /// Defaults to 2 seconds.
    pub socket_timeout: Duration,

    /// API token, sent as the `M-Api-Token` header over HTTP.
    pub token: Option<String>,
}

impl TransportConfiguration {
    /// Returns the port to send datagrams to.
    pub fn udp_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_UDP_PORT)
    }

    /// Returns the base URL of the collector, including the port only when one is configured.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}", self.host),
            None => format!("{scheme}://{}", self.host),
        }
    }
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        TransportConfiguration {
            kind: TransportKind::Http,
            host: DEFAULT_HOST.to_owned(),
            port: None,
            secure: true,
            api_version: ApiVersion::default(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: DEFAULT_TIMEOUT,
            socket_timeout: DEFAULT_TIMEOUT,
            token: None,
        }
    }
}

/// Defaults applied to every metric of a given [`MetricKind`].
#[derive(Clone, Debug, Default)]
pub struct MetricDefaults {
    /// Tags added to the metric.
    pub tags: Tags,
    /// Aggregations requested for the metric.
    pub aggregations: Aggregations,
    /// Aggregation frequency.
    pub frequency: AggregationFreq,
}

/// Client configuration.
///
/// Created with [`ClientConfiguration::new`], adjusted through its public fields, and then handed to
/// [`StatfulClient::new`](crate::StatfulClient::new), which validates it. The client never mutates its configuration.
#[derive(Clone, Debug)]
pub struct ClientConfiguration {
    /// Prefix for every measurement path. Required.
    pub prefix: String,

    /// Namespace used when a metric does not specify one. An empty namespace is omitted from the path.
    ///
    /// Defaults to `application`.
    pub namespace: String,

    /// Application name, added to every metric as the `app` tag.
    pub app: Option<String>,

    /// Tags added to every metric.
    pub tags: Tags,

    /// Defaults for timers.
    ///
    /// Defaults to the `unit=ms` tag and the `avg`, `p90` and `count` aggregations.
    pub timer: MetricDefaults,

    /// Defaults for counters.
    ///
    /// Defaults to the `count` and `sum` aggregations.
    pub counter: MetricDefaults,

    /// Defaults for gauges.
    ///
    /// Defaults to the `last` aggregation.
    pub gauge: MetricDefaults,

    /// Sample rate applied when a metric does not specify one, as a percentage.
    ///
    /// Values outside of `[0, 100]` are clamped once, when the client is built.
    ///
    /// Defaults to 100.
    pub sample_rate: i32,

    /// Number of lines buffered before they are flushed as one batch.
    ///
    /// Defaults to 10.
    pub flush_size: usize,

    /// Interval between periodic flushes. Intervals under 100 milliseconds disable periodic flushing.
    ///
    /// Defaults to 3 seconds.
    pub flush_interval: Duration,

    /// When enabled, lines are buffered but never sent.
    ///
    /// The buffer still holds at most `flush_size` lines: once it is full, each new line evicts the oldest one. The
    /// buffered lines can be read back with [`take_buffered_lines`].
    ///
    /// [`take_buffered_lines`]: crate::StatfulClient::take_buffered_lines
    ///
    /// Defaults to `false`.
    pub dry_run: bool,

    /// Transport settings.
    pub transport: TransportConfiguration,
}

impl ClientConfiguration {
    /// Creates a configuration with the given prefix and default settings.
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        ClientConfiguration {
            prefix: prefix.into(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            app: None,
            tags: Tags::new(),
            timer: MetricDefaults {
                tags: Tags::from([("unit", "ms")]),
                aggregations: Aggregations::from([Aggregation::Avg, Aggregation::P90, Aggregation::Count]),
                frequency: AggregationFreq::default(),
            },
            counter: MetricDefaults {
                tags: Tags::new(),
                aggregations: Aggregations::from([Aggregation::Count, Aggregation::Sum]),
                frequency: AggregationFreq::default(),
            },
            gauge: MetricDefaults {
                tags: Tags::new(),
                aggregations: Aggregations::from([Aggregation::Last]),
                frequency: AggregationFreq::default(),
            },
            sample_rate: DEFAULT_SAMPLE_RATE,
            flush_size: DEFAULT_FLUSH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            dry_run: false,
            transport: TransportConfiguration::default(),
        }
    }

    /// Returns the defaults for the given kind of metric.
    pub fn defaults_for(&self, kind: MetricKind) -> &MetricDefaults {
        match kind {
            MetricKind::Timer => &self.timer,
            MetricKind::Counter => &self.counter,
            MetricKind::Gauge => &self.gauge,
        }
    }

    /// Returns the tags added to every metric: the global tags plus the `app` tag, if configured.
    pub fn global_tags(&self) -> Tags {
        let mut tags = self.tags.clone();
        if let Some(app) = &self.app {
            tags.insert("app", app.as_str());
        }
        tags
    }

    /// Checks that the configuration can be used to build a client.
    ///
    /// # Errors
    ///
    /// If a required setting is missing or out of range, an error describing it is returned.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.prefix.is_empty() {
            return Err(BuildError::invalid("prefix must not be empty"));
        }
        if self.flush_size == 0 {
            return Err(BuildError::invalid("flush size must be at least 1"));
        }
        if self.transport.host.is_empty() {
            return Err(BuildError::invalid("transport host must not be empty"));
        }
        if self.transport.kind == TransportKind::Http && self.transport.pool_size == 0 {
            return Err(BuildError::invalid("connection pool size must be at least 1"));
        }
        Ok(())
    }
}
