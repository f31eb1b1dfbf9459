//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Own the process metric registry (one per service instance)
//! - Hand out counter, gauge and histogram handles keyed by name + labels
//! - Render the Prometheus text exposition for `/metrics`
//!
//! # Design Decisions
//! - The registry is an explicit value passed to handlers; no global
//!   recorder is installed, so several services can share one process
//! - Handles are atomics inside the recorder; unrelated label sets never
//!   contend on a common lock
//! - Histogram buckets tuned for typical web latencies

use std::sync::Arc;

use metrics::{Key, KeyName, Label, Level, Metadata, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{
    BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};

/// Bucket boundaries (seconds) for every histogram.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.15, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Swallowed exporter failures, labelled by `signal`.
pub const EXPORT_FAILURES_TOTAL: &str = "telemetry_export_failures_total";

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Kind of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
    Gauge,
}

/// Label list as written at call sites.
pub type Labels<'a> = &'a [(&'static str, &'a str)];

/// Process-wide metric registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(LATENCY_BUCKETS)?
            .build_recorder();
        let handle = recorder.handle();
        let registry = Self {
            recorder: Arc::new(recorder),
            handle,
        };
        registry.describe_counter(
            EXPORT_FAILURES_TOTAL,
            "Telemetry records that could not be handed to a backend",
        );
        Ok(registry)
    }

    fn key(name: &'static str, labels: Labels<'_>) -> Key {
        let labels: Vec<Label> = labels
            .iter()
            .map(|(k, v)| Label::new(*k, v.to_string()))
            .collect();
        Key::from_parts(name, labels)
    }

    pub fn counter(&self, name: &'static str, labels: Labels<'_>) -> metrics::Counter {
        self.recorder.register_counter(&Self::key(name, labels), &METADATA)
    }

    pub fn gauge(&self, name: &'static str, labels: Labels<'_>) -> metrics::Gauge {
        self.recorder.register_gauge(&Self::key(name, labels), &METADATA)
    }

    pub fn histogram(&self, name: &'static str, labels: Labels<'_>) -> metrics::Histogram {
        self.recorder.register_histogram(&Self::key(name, labels), &METADATA)
    }

    pub fn increment_counter(&self, name: &'static str, labels: Labels<'_>) {
        self.counter(name, labels).increment(1);
    }

    pub fn observe(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        self.histogram(name, labels).record(value);
    }

    pub fn set_gauge(&self, name: &'static str, labels: Labels<'_>, value: f64) {
        self.gauge(name, labels).set(value);
    }

    /// Update any series by kind. Counters take the value as an increment and
    /// ignore negative or fractional parts.
    pub fn record(&self, name: &'static str, kind: MetricKind, value: f64, labels: Labels<'_>) {
        match kind {
            MetricKind::Counter => {
                if value > 0.0 {
                    self.counter(name, labels).increment(value as u64);
                }
            }
            MetricKind::Histogram => self.observe(name, labels, value),
            MetricKind::Gauge => self.set_gauge(name, labels, value),
        }
    }

    pub fn describe_counter(&self, name: &'static str, help: &'static str) {
        self.recorder
            .describe_counter(KeyName::from(name), None, SharedString::from(help));
    }

    pub fn describe_gauge(&self, name: &'static str, help: &'static str) {
        self.recorder
            .describe_gauge(KeyName::from(name), None, SharedString::from(help));
    }

    pub fn describe_histogram(&self, name: &'static str, help: &'static str) {
        self.recorder.describe_histogram(
            KeyName::from(name),
            Some(Unit::Seconds),
            SharedString::from(help),
        );
    }

    /// Prometheus text exposition of every registered series.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

/// Sum every sample of `name` whose label block contains all of `filters`
/// (each written as `key="value"`). Used by tests and the traffic report.
pub fn sum_series(exposition: &str, name: &str, filters: &[&str]) -> f64 {
    exposition
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let series_name = series.split('{').next()?;
            if series_name != name || !filters.iter().all(|f| series.contains(f)) {
                return None;
            }
            value.parse::<f64>().ok()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_renders_per_label_set() {
        let registry = MetricsRegistry::new().unwrap();
        registry.increment_counter("demo_requests_total", &[("status", "200")]);
        registry.increment_counter("demo_requests_total", &[("status", "200")]);
        registry.increment_counter("demo_requests_total", &[("status", "500")]);

        let text = registry.render();
        assert_eq!(sum_series(&text, "demo_requests_total", &[]), 3.0);
        assert_eq!(sum_series(&text, "demo_requests_total", &["status=\"200\""]), 2.0);
        assert_eq!(sum_series(&text, "demo_requests_total", &["status=\"500\""]), 1.0);
    }

    #[test]
    fn test_histogram_exposes_count() {
        let registry = MetricsRegistry::new().unwrap();
        registry.observe("demo_duration_seconds", &[("endpoint", "/")], 0.02);
        registry.observe("demo_duration_seconds", &[("endpoint", "/")], 0.3);

        let text = registry.render();
        assert_eq!(sum_series(&text, "demo_duration_seconds_count", &[]), 2.0);
        assert!(text.contains("demo_duration_seconds_bucket"));
    }

    #[test]
    fn test_gauge_holds_latest() {
        let registry = MetricsRegistry::new().unwrap();
        registry.record("demo_active", MetricKind::Gauge, 10.0, &[]);
        registry.record("demo_active", MetricKind::Gauge, 4.0, &[]);
        assert_eq!(sum_series(&registry.render(), "demo_active", &[]), 4.0);
    }

    #[test]
    fn test_registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();
        a.increment_counter("demo_total", &[]);
        assert_eq!(sum_series(&a.render(), "demo_total", &[]), 1.0);
        assert_eq!(sum_series(&b.render(), "demo_total", &[]), 0.0);
    }
}
