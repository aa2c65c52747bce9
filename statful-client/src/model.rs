use std::fmt;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

/// A set of tags attached to a metric.
///
/// Tags map a key to a value, with keys being unique. Pairs where either the key or the value is empty are ignored, as
/// the collector would reject them anyway. Tags are emitted on the wire in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    inner: IndexMap<String, String>,
}

impl Tags {
    /// Creates an empty set of tags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set of tags from a flat sequence of alternating keys and values.
    ///
    /// A trailing key without a matching value is ignored.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags = Tags::new();
        let mut pairs = pairs.into_iter();
        while let Some(key) = pairs.next() {
            let key = key.into();
            match pairs.next() {
                Some(value) => {
                    tags.insert(key, value);
                }
                None => debug!(tag_key = %key, "Ignoring tag key without a value."),
            }
        }
        tags
    }

    /// Inserts a tag, replacing the value of any existing tag with the same key.
    ///
    /// Returns `false` if the pair was ignored because the key or value was empty.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> bool
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return false;
        }

        self.inner.insert(key, value);
        true
    }

    /// Merges `other` into this set of tags.
    ///
    /// When both sets contain the same key, the value from `other` wins.
    pub fn merge(&mut self, other: &Tags) {
        for (key, value) in other.iter() {
            self.inner.insert(key.to_owned(), value.to_owned());
        }
    }

    /// Returns a new set of tags containing this set merged with `other`.
    #[must_use]
    pub fn merged(&self, other: &Tags) -> Tags {
        let mut tags = self.clone();
        tags.merge(other);
        tags
    }

    /// Gets the value of the given tag key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over the key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Tags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Tags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// A statistical reduction the collector computes over the samples of a metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Average of all samples.
    Avg,
    /// Number of samples.
    Count,
    /// Sum of all samples.
    Sum,
    /// First sample in the window.
    First,
    /// Last sample in the window.
    Last,
    /// 90th percentile.
    P90,
    /// 95th percentile.
    P95,
    /// 99th percentile.
    P99,
    /// Smallest sample.
    Min,
    /// Largest sample.
    Max,
}

impl Aggregation {
    /// All supported aggregations.
    pub const ALL: [Aggregation; 10] = [
        Aggregation::Avg,
        Aggregation::Count,
        Aggregation::Sum,
        Aggregation::First,
        Aggregation::Last,
        Aggregation::P90,
        Aggregation::P95,
        Aggregation::P99,
        Aggregation::Min,
        Aggregation::Max,
    ];

    /// Returns the canonical wire name of the aggregation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::First => "first",
            Aggregation::Last => "last",
            Aggregation::P90 => "p90",
            Aggregation::P95 => "p95",
            Aggregation::P99 => "p99",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The window, in seconds, over which the collector computes aggregations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AggregationFreq {
    /// 10 seconds.
    #[default]
    Freq10,
    /// 30 seconds.
    Freq30,
    /// 60 seconds.
    Freq60,
    /// 120 seconds.
    Freq120,
    /// 180 seconds.
    Freq180,
    /// 300 seconds.
    Freq300,
}

impl AggregationFreq {
    /// All supported frequencies, smallest first.
    pub const ALL: [AggregationFreq; 6] = [
        AggregationFreq::Freq10,
        AggregationFreq::Freq30,
        AggregationFreq::Freq60,
        AggregationFreq::Freq120,
        AggregationFreq::Freq180,
        AggregationFreq::Freq300,
    ];

    /// Returns the wire value of the frequency, in seconds.
    pub const fn as_secs(self) -> u32 {
        match self {
            AggregationFreq::Freq10 => 10,
            AggregationFreq::Freq30 => 30,
            AggregationFreq::Freq60 => 60,
            AggregationFreq::Freq120 => 120,
            AggregationFreq::Freq180 => 180,
            AggregationFreq::Freq300 => 300,
        }
    }

    /// Looks up the frequency with the given wire value.
    pub fn from_secs(secs: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|freq| freq.as_secs() == secs)
    }
}

impl fmt::Display for AggregationFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_secs())
    }
}

/// An ordered set of aggregations.
///
/// Inserting an aggregation that is already present is a no-op, and the original insertion order is what gets emitted
/// on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregations {
    inner: IndexSet<Aggregation>,
}

impl Aggregations {
    /// Creates an empty set of aggregations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an aggregation.
    ///
    /// Returns `false` if it was already present.
    pub fn insert(&mut self, aggregation: Aggregation) -> bool {
        self.inner.insert(aggregation)
    }

    /// Merges `other` into this set, appending any aggregations not already present.
    pub fn merge(&mut self, other: &Aggregations) {
        self.inner.extend(other.iter());
    }

    /// Returns `true` if the aggregation is present.
    pub fn contains(&self, aggregation: Aggregation) -> bool {
        self.inner.contains(&aggregation)
    }

    /// Returns the number of aggregations.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no aggregations.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over the aggregations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Aggregation> + '_ {
        self.inner.iter().copied()
    }
}

impl FromIterator<Aggregation> for Aggregations {
    fn from_iter<I: IntoIterator<Item = Aggregation>>(iter: I) -> Self {
        Aggregations { inner: iter.into_iter().collect() }
    }
}

impl<const N: usize> From<[Aggregation; N]> for Aggregations {
    fn from(aggregations: [Aggregation; N]) -> Self {
        aggregations.into_iter().collect()
    }
}

/// The type of a metric, used to pick default tags and aggregations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A duration measurement, in milliseconds.
    Timer,
    /// A count of events.
    Counter,
    /// A point-in-time value.
    Gauge,
}

#[cfg(test)]
mod tests {
    use super::{Aggregation, AggregationFreq, Aggregations, Tags};

    #[test]
    fn tags_from_pairs() {
        let tags = Tags::from_pairs(["unit", "ms", "host", "web-1"]);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("unit"), Some("ms"));
        assert_eq!(tags.get("host"), Some("web-1"));

        // Trailing keys without a value are dropped.
        let tags = Tags::from_pairs(["unit", "ms", "dangling"]);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("dangling"), None);
    }

    #[test]
    fn tags_ignore_empty_pairs() {
        let mut tags = Tags::new();
        assert!(!tags.insert("", "value"));
        assert!(!tags.insert("key", ""));
        assert!(tags.insert("key", "value"));
        assert_eq!(tags.len(), 1);

        let tags = Tags::from_pairs(["", "x", "y", "", "a", "b"]);
        assert_eq!(tags.iter().collect::<Vec<_>>(), vec![("a", "b")]);
    }

    #[test]
    fn tags_merge_incoming_wins() {
        let mut base = Tags::from([("unit", "ms"), ("env", "prod")]);
        let incoming = Tags::from([("env", "staging"), ("region", "eu")]);
        base.merge(&incoming);

        assert_eq!(base.len(), 3);
        assert_eq!(base.get("unit"), Some("ms"));
        assert_eq!(base.get("env"), Some("staging"));
        assert_eq!(base.get("region"), Some("eu"));
    }

    #[test]
    fn aggregations_keep_insertion_order_without_duplicates() {
        let mut aggs = Aggregations::from([Aggregation::P90, Aggregation::Avg]);
        assert!(!aggs.insert(Aggregation::P90));
        assert!(aggs.insert(Aggregation::Count));

        let names = aggs.iter().map(Aggregation::as_str).collect::<Vec<_>>();
        assert_eq!(names, vec!["p90", "avg", "count"]);
    }

    #[test]
    fn frequency_wire_values() {
        let secs = AggregationFreq::ALL.iter().map(|f| f.as_secs()).collect::<Vec<_>>();
        assert_eq!(secs, vec![10, 30, 60, 120, 180, 300]);
        assert_eq!(AggregationFreq::default(), AggregationFreq::Freq10);
        assert_eq!(AggregationFreq::from_secs(120), Some(AggregationFreq::Freq120));
        assert_eq!(AggregationFreq::from_secs(15), None);
    }
}
