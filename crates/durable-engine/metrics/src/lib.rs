//! # durable-engine-metrics
//!
//! Prometheus implementation of the engine's
//! [`MetricsHandler`](durable_engine_core::port::MetricsHandler) port.
//!
//! Metric families are created on first use. The tag keys of that first
//! emission become the family's label names; later emissions of the same
//! name must use the same keys.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use durable_engine_core::port::MetricsHandler;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Content type of [`PrometheusMetricsHandler::gather_text`].
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct Family<V> {
    labels: Vec<String>,
    vec: V,
}

/// Prometheus-backed metrics handler
pub struct PrometheusMetricsHandler {
    registry: Registry,
    buckets: Vec<f64>,
    counters: DashMap<String, Family<IntCounterVec>>,
    histograms: DashMap<String, Family<HistogramVec>>,
}

impl PrometheusMetricsHandler {
    /// Handler with its own registry and size-oriented histogram buckets
    /// (1 KiB doubling up to 2 MiB).
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self::with_registry(
            Registry::new(),
            prometheus::exponential_buckets(1024.0, 2.0, 12)?,
        ))
    }

    /// Handler registering into an existing registry.
    pub fn with_registry(registry: Registry, buckets: Vec<f64>) -> Self {
        Self {
            registry,
            buckets,
            counters: DashMap::new(),
            histograms: DashMap::new(),
        }
    }

    /// Get the registry for custom metric registration
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    /// Render every registered family in the text exposition format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn counter_vec(&self, name: &str, labels: &[&str]) -> Option<IntCounterVec> {
        family(&self.counters, &self.registry, name, labels, || {
            IntCounterVec::new(Opts::new(name, name), labels)
        })
    }

    fn histogram_vec(&self, name: &str, labels: &[&str]) -> Option<HistogramVec> {
        family(&self.histograms, &self.registry, name, labels, || {
            HistogramVec::new(
                HistogramOpts::new(name, name).buckets(self.buckets.clone()),
                labels,
            )
        })
    }
}

fn family<V, F>(
    families: &DashMap<String, Family<V>>,
    registry: &Registry,
    name: &str,
    labels: &[&str],
    create: F,
) -> Option<V>
where
    V: prometheus::core::Collector + Clone + 'static,
    F: FnOnce() -> Result<V, prometheus::Error>,
{
    match families.entry(name.to_string()) {
        Entry::Occupied(entry) => {
            let family = entry.get();
            if family.labels.iter().map(String::as_str).eq(labels.iter().copied()) {
                Some(family.vec.clone())
            } else {
                warn!(
                    metric = name,
                    expected = ?family.labels,
                    actual = ?labels,
                    "Dropping metric emitted with different tag keys"
                );
                None
            }
        }
        Entry::Vacant(entry) => {
            let registered = create().and_then(|vec| {
                registry.register(Box::new(vec.clone()))?;
                Ok(vec)
            });
            match registered {
                Ok(vec) => {
                    entry.insert(Family {
                        labels: labels.iter().map(|label| label.to_string()).collect(),
                        vec: vec.clone(),
                    });
                    Some(vec)
                }
                Err(e) => {
                    warn!(metric = name, error = %e, "Unable to register metric");
                    None
                }
            }
        }
    }
}

fn split<'a>(tags: &[(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
    tags.iter().copied().unzip()
}

impl MetricsHandler for PrometheusMetricsHandler {
    fn counter(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        let (keys, values) = split(tags);
        if let Some(vec) = self.counter_vec(name, &keys) {
            match vec.get_metric_with_label_values(&values) {
                Ok(counter) => counter.inc_by(value),
                Err(e) => warn!(metric = name, error = %e, "Unable to increment counter"),
            }
        }
    }

    fn record(&self, name: &str, value: i64, tags: &[(&str, &str)]) {
        let (keys, values) = split(tags);
        if let Some(vec) = self.histogram_vec(name, &keys) {
            match vec.get_metric_with_label_values(&values) {
                Ok(histogram) => histogram.observe(value as f64),
                Err(e) => warn!(metric = name, error = %e, "Unable to record observation"),
            }
        }
    }
}

impl std::fmt::Debug for PrometheusMetricsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetricsHandler")
            .field("counters", &self.counters.len())
            .field("histograms", &self.histograms.len())
            .finish()
    }
}
