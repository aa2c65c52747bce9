use crate::{
    model::{AggregationFreq, Aggregations, Tags},
    MetricError,
};

/// The fields making up a single protocol line.
pub struct Line<'a> {
    /// Global prefix, the first segment of the measurement path.
    pub prefix: &'a str,
    /// Namespace segment. Omitted from the path when empty.
    pub namespace: &'a str,
    /// Metric name, the last segment of the measurement path.
    pub name: &'a str,
    /// Tags appended to the measurement path.
    pub tags: &'a Tags,
    /// Pre-rendered metric value.
    pub value: &'a str,
    /// Timestamp, in seconds since the Unix epoch.
    pub timestamp: u64,
    /// Aggregations to request from the collector.
    pub aggregations: &'a Aggregations,
    /// Window over which the aggregations are computed.
    pub frequency: AggregationFreq,
}

impl Line<'_> {
    /// Encodes the line into its wire representation:
    ///
    /// ```text
    /// <prefix>.<namespace>.<name>[,<tagKey>=<tagValue>]* <value> <timestamp>[ <agg1>,...,<aggN>,<freq>]
    /// ```
    ///
    /// Whitespace and commas in the measurement path are escaped with a backslash. In tag keys and values, equals
    /// signs are escaped as well. The aggregation suffix is only written when there is at least one aggregation.
    ///
    /// # Errors
    ///
    /// If the prefix, name, or value is empty, an error is returned and nothing is encoded.
    pub fn encode(&self) -> Result<String, MetricError> {
        if self.prefix.is_empty() {
            return Err(MetricError::MissingField { field: "prefix" });
        }
        if self.name.is_empty() {
            return Err(MetricError::MissingField { field: "name" });
        }
        if self.value.is_empty() {
            return Err(MetricError::MissingField { field: "value" });
        }

        let mut buf = String::with_capacity(self.estimated_len());
        self.write_measurement(&mut buf);

        buf.push(' ');
        buf.push_str(self.value);
        buf.push(' ');
        buf.push_str(itoa::Buffer::new().format(self.timestamp));

        self.write_aggregations(&mut buf);

        Ok(buf)
    }

    fn estimated_len(&self) -> usize {
        let tags_len = self.tags.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>();
        self.prefix.len() + self.namespace.len() + self.name.len() + tags_len + self.value.len() + 32
    }

    fn write_measurement(&self, buf: &mut String) {
        write_escaped(buf, self.prefix, is_path_special);
        if !self.namespace.is_empty() {
            buf.push('.');
            write_escaped(buf, self.namespace, is_path_special);
        }
        buf.push('.');
        write_escaped(buf, self.name, is_path_special);

        for (key, value) in self.tags.iter() {
            buf.push(',');
            write_escaped(buf, key, is_tag_special);
            buf.push('=');
            write_escaped(buf, value, is_tag_special);
        }
    }

    fn write_aggregations(&self, buf: &mut String) {
        if self.aggregations.is_empty() {
            return;
        }

        buf.push(' ');
        for aggregation in self.aggregations.iter() {
            buf.push_str(aggregation.as_str());
            buf.push(',');
        }
        buf.push_str(itoa::Buffer::new().format(self.frequency.as_secs()));
    }
}

fn is_path_special(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn is_tag_special(c: char) -> bool {
    c.is_whitespace() || c == ',' || c == '='
}

fn write_escaped(buf: &mut String, s: &str, is_special: fn(char) -> bool) {
    for c in s.chars() {
        if is_special(c) {
            buf.push('\\');
        }
        buf.push(c);
    }
}
