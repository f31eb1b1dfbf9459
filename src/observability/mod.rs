//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request handlers produce:
//!     → context.rs (trace ids, traceparent inject/extract)
//!     → span.rs    (spans with parent/child linkage)
//!     → metrics.rs (counters, gauges, histograms)
//!     → logging.rs (structured log records)
//!
//! Consumers:
//!     → otlp.rs     (spans through the OpenTelemetry SDK to an OTLP collector)
//!     → export.rs   (batched Loki logs, in-memory and no-op sinks)
//!     → /metrics    (Prometheus scrape of the registry)
//!     → stdout      (tracing subscriber)
//! ```
//!
//! # Design Decisions
//! - One `Telemetry` value per service, cloned into every handler
//! - The same trace/span ids flow through spans, logs and metric exemplars
//! - Export is fire-and-forget; failures only bump a counter

pub mod context;
pub mod export;
pub mod logging;
pub mod metrics;
pub mod otlp;
pub mod span;

use std::sync::Arc;

use axum::http::HeaderMap;
use thiserror::Error;

pub use context::{extract_context, inject_context, SpanId, TraceContext, TraceId, TRACEPARENT};
pub use export::{ExportError, LogExporter, MemoryExporter, NoopExporter, SpanExporter};
pub use logging::{LogLevel, LogRecord};
pub use metrics::{MetricKind, MetricsRegistry};
pub use span::{AttributeValue, Span, SpanRecord, SpanStatus};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("span {name} ({span_id}) was already closed")]
    SpanAlreadyClosed { name: String, span_id: SpanId },

    #[error("telemetry export failed: {0}")]
    Export(#[from] ExportError),
}

struct Inner {
    service: &'static str,
    registry: MetricsRegistry,
    spans: Arc<dyn SpanExporter>,
    logs: Arc<dyn LogExporter>,
    span_failures: ::metrics::Counter,
    log_failures: ::metrics::Counter,
}

/// Telemetry emitter shared by every handler of one service.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Inner>,
}

impl Telemetry {
    pub fn new(
        service: &'static str,
        registry: MetricsRegistry,
        spans: Arc<dyn SpanExporter>,
        logs: Arc<dyn LogExporter>,
    ) -> Self {
        let span_failures = export::failure_counter(&registry, "traces");
        let log_failures = export::failure_counter(&registry, "logs");
        Self {
            inner: Arc::new(Inner {
                service,
                registry,
                spans,
                logs,
                span_failures,
                log_failures,
            }),
        }
    }

    /// Telemetry that records everything into `sink` with a fresh registry.
    pub fn in_memory(
        service: &'static str,
        sink: &MemoryExporter,
    ) -> Result<Self, ::metrics_exporter_prometheus::BuildError> {
        Ok(Self::new(
            service,
            MetricsRegistry::new()?,
            Arc::new(sink.clone()),
            Arc::new(sink.clone()),
        ))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(service: &'static str, sink: &MemoryExporter) -> Self {
        Self::in_memory(service, sink).expect("registry")
    }

    pub fn service(&self) -> &'static str {
        self.inner.service
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.inner.registry
    }

    /// Open a span. Without a parent this starts a new trace; with one it
    /// joins the parent's trace as its child.
    pub fn start_span(&self, name: impl Into<String>, parent: Option<&TraceContext>) -> Span {
        let context = match parent {
            Some(parent) => parent.child(),
            None => TraceContext::new_root(),
        };
        Span::open(self.clone(), name.into(), context)
    }

    pub fn end_span(&self, span: &mut Span, status: SpanStatus) -> Result<(), TelemetryError> {
        span.end(status)
    }

    pub fn record_metric(
        &self,
        name: &'static str,
        kind: MetricKind,
        value: f64,
        labels: metrics::Labels<'_>,
    ) {
        self.inner.registry.record(name, kind, value, labels);
    }

    /// Emit a structured log record, correlated with `context` when given.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        context: Option<&TraceContext>,
        attributes: &[(&str, String)],
    ) {
        let record = LogRecord::new(self.inner.service, level, message.into(), context, attributes);
        record.emit();
        if let Err(e) = self.inner.logs.export(record) {
            self.inner.log_failures.increment(1);
            tracing::debug!(error = %e, "Dropped log record");
        }
    }

    pub fn inject_context(&self, context: &TraceContext) -> HeaderMap {
        inject_context(context)
    }

    pub fn extract_context(&self, headers: &HeaderMap) -> Option<TraceContext> {
        extract_context(headers)
    }

    pub(crate) fn finish_span(&self, record: SpanRecord) {
        tracing::debug!(
            service = self.inner.service,
            span = %record.name,
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            status = record.status.as_str(),
            duration_ms = record.duration().as_secs_f64() * 1000.0,
            "Span closed"
        );
        if !record.sampled {
            return;
        }
        if let Err(e) = self.inner.spans.export(record) {
            self.inner.span_failures.increment(1);
            tracing::debug!(error = %e, "Dropped span");
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("service", &self.inner.service)
            .finish_non_exhaustive()
    }
}
