//! Spans: timed units of work with parent/child linkage.
//!
//! # Lifecycle
//! ```text
//! Telemetry::start_span(name, parent?)
//!     → Span (open, owns its TraceContext)
//!     → set_attribute / log / child spans
//!     → end(status)           closes exactly once, exports a SpanRecord
//!     → Drop without end()    closes with ERROR + cancelled=true
//! ```
//!
//! # Design Decisions
//! - A span is owned by the task that opened it; children borrow its context
//! - Closing twice is reported as `TelemetryError::SpanAlreadyClosed`
//! - Records are immutable once handed to the exporter

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::context::TraceContext;
use super::logging::LogLevel;
use super::{Telemetry, TelemetryError};

/// Final status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
        }
    }
}

/// Attribute value attached to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// A completed span as handed to the trace exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub service: String,
    pub name: String,
    pub trace_id: super::TraceId,
    pub span_id: super::SpanId,
    pub parent_span_id: Option<super::SpanId>,
    pub sampled: bool,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: u64,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub status: SpanStatus,
}

impl SpanRecord {
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.end_unix_nanos.saturating_sub(self.start_unix_nanos))
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

pub(crate) fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// An open span.
pub struct Span {
    telemetry: Telemetry,
    name: String,
    context: TraceContext,
    start_unix_nanos: u64,
    started: Instant,
    attributes: BTreeMap<String, AttributeValue>,
    closed: bool,
}

impl Span {
    pub(crate) fn open(telemetry: Telemetry, name: String, context: TraceContext) -> Self {
        Self {
            telemetry,
            name,
            context,
            start_unix_nanos: unix_nanos(),
            started: Instant::now(),
            attributes: BTreeMap::new(),
            closed: false,
        }
    }

    /// The context children of this span derive from, and the one injected
    /// into outbound calls made while it is open.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Open a child span nested under this one.
    pub fn child(&self, name: impl Into<String>) -> Span {
        self.telemetry.start_span(name, Some(&self.context))
    }

    /// Emit a log record correlated with this span.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, attributes: &[(&str, String)]) {
        self.telemetry.log(level, message, Some(&self.context), attributes);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, &[]);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, &[]);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, &[]);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, &[]);
    }

    /// Close the span. A second call is a usage error and changes nothing.
    pub fn end(&mut self, status: SpanStatus) -> Result<(), TelemetryError> {
        if self.closed {
            tracing::warn!(
                span = %self.name,
                span_id = %self.context.span_id,
                "Span closed more than once"
            );
            return Err(TelemetryError::SpanAlreadyClosed {
                name: self.name.clone(),
                span_id: self.context.span_id,
            });
        }
        self.closed = true;
        if status == SpanStatus::Error {
            self.attributes.insert("error".into(), AttributeValue::Bool(true));
        }

        let record = SpanRecord {
            service: self.telemetry.service().to_string(),
            name: self.name.clone(),
            trace_id: self.context.trace_id,
            span_id: self.context.span_id,
            parent_span_id: self.context.parent_span_id,
            sampled: self.context.is_sampled(),
            start_unix_nanos: self.start_unix_nanos,
            end_unix_nanos: self.start_unix_nanos + duration_nanos(self.started.elapsed()),
            attributes: std::mem::take(&mut self.attributes),
            status,
        };
        self.telemetry.finish_span(record);
        Ok(())
    }

    /// Close with OK. Callers that own the span never close it twice, so the
    /// guard result only matters for misuse and is logged there.
    pub fn ok(mut self) {
        let _ = self.end(SpanStatus::Ok);
    }

    pub fn fail(mut self) {
        let _ = self.end(SpanStatus::Error);
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl Drop for Span {
    fn drop(&mut self) {
        if !self.closed {
            self.attributes.insert("cancelled".into(), AttributeValue::Bool(true));
            let _ = self.end(SpanStatus::Error);
        }
    }
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{MemoryExporter, Telemetry};

    fn telemetry() -> (Telemetry, MemoryExporter) {
        let sink = MemoryExporter::new();
        (Telemetry::for_tests("test-service", &sink), sink)
    }

    #[test]
    fn test_root_and_child_linkage() {
        let (tel, sink) = telemetry();
        let root = tel.start_span("root", None);
        let child = root.child("child");
        let child_ctx = *child.context();
        child.ok();
        let root_ctx = *root.context();
        root.ok();

        let spans = sink.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "child");
        assert_eq!(spans[0].parent_span_id, Some(root_ctx.span_id));
        assert_eq!(spans[0].trace_id, root_ctx.trace_id);
        assert_eq!(spans[0].span_id, child_ctx.span_id);
        assert!(spans[1].parent_span_id.is_none());
        assert!(spans[1].start_unix_nanos <= spans[0].start_unix_nanos);
        assert!(spans[1].end_unix_nanos >= spans[0].end_unix_nanos);
    }

    #[test]
    fn test_double_close_is_an_error() {
        let (tel, sink) = telemetry();
        let mut span = tel.start_span("once", None);
        assert!(span.end(SpanStatus::Ok).is_ok());
        let err = span.end(SpanStatus::Error).unwrap_err();
        assert!(matches!(err, TelemetryError::SpanAlreadyClosed { .. }));

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Ok);
    }

    #[test]
    fn test_dropped_span_closes_with_error() {
        let (tel, sink) = telemetry();
        {
            let mut span = tel.start_span("abandoned", None);
            span.set_attribute("http.route", "/user/{id}");
        }
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(spans[0].attribute("cancelled"), Some(&AttributeValue::Bool(true)));
        assert_eq!(
            spans[0].attribute("http.route"),
            Some(&AttributeValue::String("/user/{id}".into()))
        );
    }

    #[test]
    fn test_logs_carry_span_ids() {
        let (tel, sink) = telemetry();
        let span = tel.start_span("logging", None);
        span.info("inside");
        let ctx = *span.context();
        span.ok();

        let logs = sink.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].trace_id, Some(ctx.trace_id));
        assert_eq!(logs[0].span_id, Some(ctx.span_id));
    }

    #[test]
    fn test_unsampled_span_is_not_exported() {
        let (tel, sink) = telemetry();
        let mut ctx = TraceContext::new_root();
        ctx.flags = 0;
        tel.start_span("quiet", Some(&ctx)).ok();
        assert!(sink.spans().is_empty());
    }
}
