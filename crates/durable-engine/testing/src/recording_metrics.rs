//! Metrics handler that remembers every emission.

use parking_lot::Mutex;

use durable_engine_core::port::MetricsHandler;

/// One counter increment or distribution observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedMetric {
    Counter {
        name: String,
        value: u64,
        tags: Vec<(String, String)>,
    },
    Record {
        name: String,
        value: i64,
        tags: Vec<(String, String)>,
    },
}

impl RecordedMetric {
    pub fn name(&self) -> &str {
        match self {
            RecordedMetric::Counter { name, .. } | RecordedMetric::Record { name, .. } => name,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        let tags = match self {
            RecordedMetric::Counter { tags, .. } | RecordedMetric::Record { tags, .. } => tags,
        };
        tags.iter()
            .find(|(tag, _)| tag == key)
            .map(|(_, value)| value.as_str())
    }
}

fn owned(tags: &[(&str, &str)]) -> Vec<(String, String)> {
    tags.iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[derive(Debug, Default)]
pub struct RecordingMetricsHandler {
    emitted: Mutex<Vec<RecordedMetric>>,
}

impl RecordingMetricsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<RecordedMetric> {
        self.emitted.lock().clone()
    }

    /// Sum of all increments of a counter.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.emitted
            .lock()
            .iter()
            .filter_map(|metric| match metric {
                RecordedMetric::Counter { name: n, value, .. } if n == name => Some(*value),
                _ => None,
            })
            .sum()
    }

    /// Observations of a distribution, in emission order.
    pub fn records(&self, name: &str) -> Vec<i64> {
        self.emitted
            .lock()
            .iter()
            .filter_map(|metric| match metric {
                RecordedMetric::Record { name: n, value, .. } if n == name => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Number of emissions under a name, counters and records alike.
    pub fn count(&self, name: &str) -> usize {
        self.emitted
            .lock()
            .iter()
            .filter(|metric| metric.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.emitted.lock().clear();
    }
}

impl MetricsHandler for RecordingMetricsHandler {
    fn counter(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        self.emitted.lock().push(RecordedMetric::Counter {
            name: name.to_string(),
            value,
            tags: owned(tags),
        });
    }

    fn record(&self, name: &str, value: i64, tags: &[(&str, &str)]) {
        self.emitted.lock().push(RecordedMetric::Record {
            name: name.to_string(),
            value,
            tags: owned(tags),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_totals_and_tags() {
        let handler = RecordingMetricsHandler::new();
        handler.counter("deleted", 2, &[("namespace", "acme")]);
        handler.counter("deleted", 3, &[("namespace", "acme")]);
        handler.record("size", 10, &[]);

        assert_eq!(handler.counter_total("deleted"), 5);
        assert_eq!(handler.records("size"), vec![10]);
        assert_eq!(handler.count("deleted"), 2);
        assert_eq!(handler.emitted()[0].tag("namespace"), Some("acme"));
    }
}
