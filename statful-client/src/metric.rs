use thiserror::Error;

use crate::model::{Aggregation, AggregationFreq, Aggregations, Tags};

/// Errors that could occur while encoding a metric.
///
/// These indicate a programming error at the call site, and are always returned to the caller.
#[derive(Debug, Error)]
pub enum MetricError {
    /// A field required by the wire protocol was empty.
    #[error("metric is missing required field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
}

/// The value of a metric.
///
/// Values are rendered to their wire representation as soon as a [`Metric`] is created, so the encoder only ever deals
/// with strings.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// A signed integer.
    Integer(i64),
    /// An unsigned integer.
    Unsigned(u64),
    /// A floating-point number.
    FloatingPoint(f64),
    /// An already-formatted value, passed through as-is.
    Raw(String),
}

impl MetricValue {
    /// Renders the value to its wire representation.
    pub fn render(&self) -> String {
        match self {
            MetricValue::Integer(v) => itoa::Buffer::new().format(*v).to_owned(),
            MetricValue::Unsigned(v) => itoa::Buffer::new().format(*v).to_owned(),
            MetricValue::FloatingPoint(v) => ryu::Buffer::new().format(*v).to_owned(),
            MetricValue::Raw(v) => v.clone(),
        }
    }
}

macro_rules! impl_from_value {
    ($variant:ident, $target:ty, $($source:ty),+) => {
        $(
            impl From<$source> for MetricValue {
                fn from(value: $source) -> Self {
                    MetricValue::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

impl_from_value!(Integer, i64, i8, i16, i32, i64);
impl_from_value!(Unsigned, u64, u8, u16, u32, u64);
impl_from_value!(FloatingPoint, f64, f32, f64);

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Raw(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Raw(value.to_owned())
    }
}

/// A single metric event.
///
/// Created per call and consumed by the encoder. Fields left unset fall back to the client configuration: the
/// namespace defaults to the configured namespace, the sample rate to the global sample rate, and the timestamp to the
/// current time when the metric is encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// Metric name, the last segment of the measurement path.
    pub name: String,
    /// Pre-rendered metric value.
    pub value: String,
    /// Tags attached to the metric.
    pub tags: Tags,
    /// Aggregations the collector should compute.
    pub aggregations: Aggregations,
    /// Window over which the aggregations are computed.
    pub frequency: AggregationFreq,
    /// Sample rate, as a percentage from 0 to 100.
    pub sample_rate: Option<i32>,
    /// Namespace overriding the configured one.
    pub namespace: Option<String>,
    /// Timestamp, in seconds since the Unix epoch.
    pub timestamp: Option<u64>,
}

impl Metric {
    /// Creates a metric with the given name and value and no metadata.
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<MetricValue>,
    {
        Metric {
            name: name.into(),
            value: value.into().render(),
            tags: Tags::new(),
            aggregations: Aggregations::new(),
            frequency: AggregationFreq::default(),
            sample_rate: None,
            namespace: None,
            timestamp: None,
        }
    }

    /// Merges the given tags into the metric's tags.
    #[must_use]
    pub fn with_tags(mut self, tags: &Tags) -> Self {
        self.tags.merge(tags);
        self
    }

    /// Adds a single tag.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key, value);
        self
    }

    /// Replaces the metric's aggregations.
    #[must_use]
    pub fn with_aggregations<A>(mut self, aggregations: A) -> Self
    where
        A: Into<Aggregations>,
    {
        self.aggregations = aggregations.into();
        self
    }

    /// Adds a single aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.insert(aggregation);
        self
    }

    /// Sets the aggregation frequency.
    #[must_use]
    pub fn with_frequency(mut self, frequency: AggregationFreq) -> Self {
        self.frequency = frequency;
        self
    }

    /// Sets the sample rate, as a percentage from 0 to 100.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: i32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the timestamp, in seconds since the Unix epoch.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Metric, MetricValue};
    use crate::model::{Aggregation, AggregationFreq, Tags};

    #[test]
    fn value_rendering() {
        let cases = [
            (MetricValue::from(42i32), "42"),
            (MetricValue::from(-7i64), "-7"),
            (MetricValue::from(u64::MAX), "18446744073709551615"),
            (MetricValue::from(42.0f64), "42.0"),
            (MetricValue::from(0.25f64), "0.25"),
            (MetricValue::from("1e3"), "1e3"),
        ];

        for (value, expected) in cases {
            assert_eq!(value.render(), expected);
        }
    }

    #[test]
    fn builder_methods() {
        let metric = Metric::new("requests", 3u32)
            .with_tags(&Tags::from([("unit", "ms")]))
            .with_tag("host", "web-1")
            .with_aggregations([Aggregation::Sum])
            .with_aggregation(Aggregation::Count)
            .with_frequency(AggregationFreq::Freq60)
            .with_sample_rate(50)
            .with_namespace("web")
            .with_timestamp(100);

        assert_eq!(metric.value, "3");
        assert_eq!(metric.tags.get("unit"), Some("ms"));
        assert_eq!(metric.tags.get("host"), Some("web-1"));
        assert_eq!(metric.aggregations.iter().collect::<Vec<_>>(), vec![Aggregation::Sum, Aggregation::Count]);
        assert_eq!(metric.frequency, AggregationFreq::Freq60);
        assert_eq!(metric.sample_rate, Some(50));
        assert_eq!(metric.namespace.as_deref(), Some("web"));
        assert_eq!(metric.timestamp, Some(100));
    }
}
