//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process `tracing` subscriber
//! - Define the correlated `LogRecord` shipped to the log backend
//! - Mirror every record onto the local `tracing` output
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and `RUST_LOG`

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::context::{SpanId, TraceContext, TraceId};
use crate::config::schema::{LogFormat, LoggingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_unix_nanos: u64,
    pub level: LogLevel,
    pub service: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<SpanId>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub attributes: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn new(
        service: &str,
        level: LogLevel,
        message: String,
        context: Option<&TraceContext>,
        attributes: &[(&str, String)],
    ) -> Self {
        Self {
            timestamp_unix_nanos: super::span::unix_nanos(),
            level,
            service: service.to_string(),
            message,
            trace_id: context.map(|c| c.trace_id),
            span_id: context.map(|c| c.span_id),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    /// Write the record to the process log.
    pub fn emit(&self) {
        let trace_id = self.trace_id.map(|t| t.to_string()).unwrap_or_default();
        let span_id = self.span_id.map(|s| s.to_string()).unwrap_or_default();
        let attrs = if self.attributes.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&self.attributes).unwrap_or_default()
        };
        match self.level {
            LogLevel::Debug => tracing::debug!(
                service = %self.service,
                trace_id = %trace_id,
                span_id = %span_id,
                attributes = %attrs,
                "{}",
                self.message
            ),
            LogLevel::Info => tracing::info!(
                service = %self.service,
                trace_id = %trace_id,
                span_id = %span_id,
                attributes = %attrs,
                "{}",
                self.message
            ),
            LogLevel::Warn => tracing::warn!(
                service = %self.service,
                trace_id = %trace_id,
                span_id = %span_id,
                attributes = %attrs,
                "{}",
                self.message
            ),
            LogLevel::Error => tracing::error!(
                service = %self.service,
                trace_id = %trace_id,
                span_id = %span_id,
                attributes = %attrs,
                "{}",
                self.message
            ),
        }
    }
}

/// Install the global `tracing` subscriber. Safe to call once per process.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("tiered_telemetry={},tower_http=info", config.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_carries_context_ids() {
        let ctx = TraceContext::new_root();
        let record = LogRecord::new(
            "database-service",
            LogLevel::Warn,
            "Slow query".into(),
            Some(&ctx),
            &[("table", "users".to_string())],
        );
        assert_eq!(record.trace_id, Some(ctx.trace_id));
        assert_eq!(record.span_id, Some(ctx.span_id));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "WARN");
        assert_eq!(json["trace_id"], ctx.trace_id.to_string());
        assert_eq!(json["attributes"]["table"], "users");
    }

    #[test]
    fn test_record_without_context_omits_ids() {
        let record =
            LogRecord::new("frontend-service", LogLevel::Info, "starting".into(), None, &[]);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("trace_id").is_none());
        assert!(json.get("attributes").is_none());
    }
}
