//! OTLP span export through the OpenTelemetry SDK.
//!
//! # Data Flow
//! ```text
//! SpanRecord (closed, sampled)
//!     → OtlpSpanExporter::export   (replayed as an SDK span with the same ids and timestamps)
//!     → BatchSpanProcessor         (bounded queue, size or interval flush)
//!     → CountingExporter           (counts failed batches)
//!     → opentelemetry-otlp         (OTLP/HTTP JSON, POST {endpoint}/v1/traces)
//! ```
//!
//! # Design Decisions
//! - One tracer provider per service, its resource carries `service.name`
//! - Ids come from the record, never from the SDK id generator
//! - `shutdown` blocks until the processor has flushed, so call it off the runtime

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use opentelemetry::trace::{
    self as otel, Span as _, SpanKind, TraceContextExt as _, TraceFlags, TraceState, Tracer as _,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, Value};
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanData,
};
use opentelemetry_sdk::Resource;
use thiserror::Error;

use super::export::{BatchSettings, ExportError, SpanExporter};
use super::span::{AttributeValue, SpanRecord, SpanStatus};

#[derive(Debug, Error)]
pub enum OtlpError {
    #[error("failed to build OTLP exporter: {0}")]
    Build(String),

    #[error("failed to build OTLP HTTP client: {0}")]
    Client(String),
}

/// Wraps an SDK exporter and counts the spans of every failed batch.
pub struct CountingExporter<E> {
    inner: E,
    failures: metrics::Counter,
}

impl<E: std::fmt::Debug> std::fmt::Debug for CountingExporter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingExporter")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<E> CountingExporter<E> {
    pub fn new(inner: E, failures: metrics::Counter) -> Self {
        Self { inner, failures }
    }
}

impl<E: opentelemetry_sdk::trace::SpanExporter> opentelemetry_sdk::trace::SpanExporter
    for CountingExporter<E>
{
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        let count = batch.len() as u64;
        let failures = self.failures.clone();
        let export = self.inner.export(batch);
        async move {
            let result = export.await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, dropped = count, "Span export failed");
                failures.increment(count);
            }
            result
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Tracer provider for `service` shipping through `exporter`.
pub fn tracer_provider<E>(
    service: &'static str,
    exporter: E,
    settings: BatchSettings,
    failures: metrics::Counter,
) -> SdkTracerProvider
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    let batch = BatchConfigBuilder::default()
        .with_max_queue_size(settings.queue_capacity.max(1))
        .with_max_export_batch_size(settings.max_batch.max(1))
        .with_scheduled_delay(settings.flush_interval.max(Duration::from_millis(1)))
        .build();
    let processor = BatchSpanProcessor::builder(CountingExporter::new(exporter, failures))
        .with_batch_config(batch)
        .build();
    let resource = Resource::builder_empty()
        .with_service_name(service)
        .with_attributes([KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build();

    SdkTracerProvider::builder()
        .with_span_processor(processor)
        .with_resource(resource)
        .build()
}

/// OTLP/HTTP JSON exporter posting to `{endpoint}/v1/traces`.
pub fn http_exporter(
    endpoint: &str,
    timeout: Duration,
) -> Result<opentelemetry_otlp::SpanExporter, OtlpError> {
    // The blocking client owns a runtime of its own and must not be built
    // on a runtime thread.
    let client = std::thread::spawn(move || {
        reqwest::blocking::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
    })
    .join()
    .map_err(|_| OtlpError::Client("client builder thread panicked".into()))?
    .map_err(|e| OtlpError::Client(e.to_string()))?;

    opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpJson)
        .with_http_client(client)
        .with_endpoint(format!("{}/v1/traces", endpoint.trim_end_matches('/')))
        .with_timeout(timeout)
        .build()
        .map_err(|e| OtlpError::Build(e.to_string()))
}

/// Feeds closed spans into an SDK tracer provider.
#[derive(Clone)]
pub struct OtlpSpanExporter {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl OtlpSpanExporter {
    pub fn new(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
        Self { provider, tracer }
    }

    /// Flush queued spans and stop the processor. Blocking.
    pub fn shutdown(&self) {
        if let Err(e) = self.provider.shutdown() {
            tracing::warn!(error = %e, "Span processor shutdown failed");
        }
    }
}

fn unix_time(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}

fn otel_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => Value::from(s.clone()),
        AttributeValue::Int(i) => Value::from(*i),
        AttributeValue::Float(f) => Value::from(*f),
        AttributeValue::Bool(b) => Value::from(*b),
    }
}

fn trace_id(record: &SpanRecord) -> otel::TraceId {
    otel::TraceId::from_bytes(record.trace_id.0.to_be_bytes())
}

fn span_id(id: super::SpanId) -> otel::SpanId {
    otel::SpanId::from_bytes(id.0.to_be_bytes())
}

impl SpanExporter for OtlpSpanExporter {
    fn export(&self, record: SpanRecord) -> Result<(), ExportError> {
        let parent = match record.parent_span_id {
            Some(parent) => Context::new().with_remote_span_context(otel::SpanContext::new(
                trace_id(&record),
                span_id(parent),
                TraceFlags::SAMPLED,
                true,
                TraceState::default(),
            )),
            None => Context::new(),
        };
        let kind = if record.parent_span_id.is_none() {
            SpanKind::Server
        } else {
            SpanKind::Internal
        };
        let attributes: Vec<KeyValue> = record
            .attributes
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), otel_value(v)))
            .collect();

        let mut span = self
            .tracer
            .span_builder(record.name.clone())
            .with_trace_id(trace_id(&record))
            .with_span_id(span_id(record.span_id))
            .with_kind(kind)
            .with_start_time(unix_time(record.start_unix_nanos))
            .with_attributes(attributes)
            .start_with_context(&self.tracer, &parent);
        span.set_status(match record.status {
            SpanStatus::Ok => otel::Status::Ok,
            SpanStatus::Error => otel::Status::error(""),
        });
        span.end_with_timestamp(unix_time(record.end_unix_nanos));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::context::TraceContext;
    use crate::observability::export::failure_counter;
    use crate::observability::metrics::{sum_series, MetricsRegistry, EXPORT_FAILURES_TOTAL};
    use opentelemetry_sdk::error::OTelSdkError;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    struct Capture {
        spans: Arc<Mutex<Vec<SpanData>>>,
        fail: bool,
    }

    impl opentelemetry_sdk::trace::SpanExporter for Capture {
        fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
            let spans = self.spans.clone();
            let fail = self.fail;
            async move {
                if fail {
                    return Err(OTelSdkError::InternalFailure("collector down".into()));
                }
                spans.lock().unwrap().extend(batch);
                Ok(())
            }
        }
    }

    fn settings() -> BatchSettings {
        BatchSettings {
            queue_capacity: 16,
            max_batch: 4,
            flush_interval: Duration::from_secs(60),
        }
    }

    fn record(name: &str, ctx: &TraceContext, status: SpanStatus) -> SpanRecord {
        SpanRecord {
            service: "database-service".into(),
            name: name.into(),
            trace_id: ctx.trace_id,
            span_id: ctx.span_id,
            parent_span_id: ctx.parent_span_id,
            sampled: true,
            start_unix_nanos: 1_000,
            end_unix_nanos: 5_000,
            attributes: BTreeMap::from([("db.table".to_string(), AttributeValue::from("users"))]),
            status,
        }
    }

    #[test]
    fn test_records_keep_their_ids_and_timing() {
        let registry = MetricsRegistry::new().unwrap();
        let capture = Capture::default();
        let provider = tracer_provider(
            "database-service",
            capture.clone(),
            settings(),
            failure_counter(&registry, "traces"),
        );
        let exporter = OtlpSpanExporter::new(provider);

        let root = TraceContext::new_root();
        let child = root.child();
        SpanExporter::export(&exporter, record("database_get_user", &child, SpanStatus::Error))
            .unwrap();
        exporter.shutdown();

        let spans = capture.spans.lock().unwrap().clone();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "database_get_user");
        assert_eq!(span.span_context.trace_id().to_string(), root.trace_id.to_string());
        assert_eq!(span.span_context.span_id().to_string(), child.span_id.to_string());
        assert_eq!(span.parent_span_id.to_string(), root.span_id.to_string());
        assert_eq!(span.start_time, unix_time(1_000));
        assert_eq!(span.end_time, unix_time(5_000));
        assert!(matches!(span.status, otel::Status::Error { .. }));
        assert!(span
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "db.table" && kv.value.as_str() == "users"));
    }

    #[test]
    fn test_failed_batch_is_counted() {
        let registry = MetricsRegistry::new().unwrap();
        let capture = Capture {
            fail: true,
            ..Capture::default()
        };
        let provider = tracer_provider(
            "backend-service",
            capture,
            settings(),
            failure_counter(&registry, "traces"),
        );
        let exporter = OtlpSpanExporter::new(provider);

        let root = TraceContext::new_root();
        for _ in 0..3 {
            let span = record("backend_get_user", &root.child(), SpanStatus::Ok);
            SpanExporter::export(&exporter, span).unwrap();
        }
        exporter.shutdown();

        let text = registry.render();
        assert_eq!(sum_series(&text, EXPORT_FAILURES_TOTAL, &["signal=\"traces\""]), 3.0);
    }
}
