//! A client for sending metrics to a [Statful][statful] collector.
//!
//! [statful]: https://www.statful.com/
//!
//! # Usage
//!
//! Create a [`ClientConfiguration`], adjust it as needed, and build a [`StatfulClient`] from it:
//!
//! ```no_run
//! # use statful_client::{ClientConfiguration, StatfulClient, TransportKind};
//! // Every measurement is sent as `<prefix>.<namespace>.<name>`, so the prefix is the only required setting.
//! let mut config = ClientConfiguration::new("shop");
//!
//! // The namespace defaults to `application`, and metrics go to the Statful HTTP API by default. Here we send
//! // datagrams to a local relay instead.
//! config.namespace = "checkout".to_string();
//! config.transport.kind = TransportKind::Udp;
//! config.transport.host = "127.0.0.1".to_string();
//!
//! let client = StatfulClient::new(config).expect("failed to build client");
//!
//! client.timer("response_time", 42).expect("valid metric");
//! client.counter("requests").expect("valid metric");
//! client.gauge("cart_size", 3).expect("valid metric");
//!
//! // Buffered lines are flushed periodically, whenever the buffer fills up, and when the client is shut down or
//! // dropped.
//! client.shutdown();
//! ```
//!
//! # Wire format
//!
//! Each metric becomes a single line:
//!
//! ```text
//! <prefix>.<namespace>.<name>[,<tagKey>=<tagValue>]* <value> <timestamp>[ <agg1>,...,<aggN>,<freq>]
//! ```
//!
//! Lines are buffered and sent in batches, separated by newlines. Over UDP, each batch is a single datagram. Over
//! HTTP, each batch is the body of a `PUT` request.
//!
//! # Metric defaults
//!
//! Timers, counters, and gauges each have their own default tags, aggregations, and aggregation frequency, configured
//! through [`ClientConfiguration::timer`], [`ClientConfiguration::counter`] and [`ClientConfiguration::gauge`]. Global
//! tags, including the `app` tag, are added to every metric. Tags given for a specific metric take precedence over
//! both.
//!
//! For more control over a single metric, use [`StatfulClient::sender`]:
//!
//! ```no_run
//! # use statful_client::{Aggregation, AggregationFreq, ClientConfiguration, MetricKind, StatfulClient, Tags};
//! # let client = StatfulClient::new(ClientConfiguration::new("shop")).unwrap();
//! client
//!     .sender(MetricKind::Timer, "db_query", 8)
//!     .with_tags(&Tags::from([("table", "orders")]))
//!     .with_aggregations([Aggregation::P99, Aggregation::Max])
//!     .with_frequency(AggregationFreq::Freq60)
//!     .with_sample_rate(10)
//!     .send()
//!     .expect("valid metric");
//! ```
//!
//! # Sampling
//!
//! Metrics are admitted with a probability of `sample_rate / 100`, using the metric's own sample rate if set, or the
//! configured one otherwise. Rates outside of `[0, 100]` are clamped.
//!
//! # Error handling
//!
//! Metrics that cannot be encoded, because the prefix, name, or value is empty, are rejected with a [`MetricError`].
//! Everything past the encoder is fire-and-forget: delivery failures are logged through [`tracing`] and the affected
//! batch is dropped. The client never installs a subscriber itself.
//!
//! # Features
//!
//! - `http` (default): enables the HTTP transport, built on `hyper` and `rustls`. Without it, only the UDP transport
//!   is available and building a client configured for HTTP fails with [`BuildError::HttpUnavailable`].
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod buffer;

mod client;
pub use self::client::{MetricSender, StatfulClient};

mod config;
pub use self::config::{
    ApiVersion, BuildError, ClientConfiguration, MetricDefaults, TransportConfiguration, TransportKind,
};

mod encoder;
pub use self::encoder::Line;

mod flusher;

mod metric;
pub use self::metric::{Metric, MetricError, MetricValue};

mod model;
pub use self::model::{Aggregation, AggregationFreq, Aggregations, MetricKind, Tags};

mod sampler;
pub use self::sampler::Sampler;

mod telemetry;
pub use self::telemetry::TelemetrySnapshot;

mod transport;
pub use self::transport::{Transport, TransportError, UdpTransport};
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use self::transport::{aggregated_path, HttpTransport};

#[cfg(test)]
mod test_util;
