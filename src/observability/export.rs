//! Telemetry exporters.
//!
//! # Data Flow
//! ```text
//! Span::end / Telemetry::log
//!     → SpanExporter / LogExporter::export   (never blocks)
//!     → spans: otlp.rs (OpenTelemetry SDK batch processor)
//!     → logs:  bounded mpsc queue → BatchWorker → LokiTransport
//! ```
//!
//! # Design Decisions
//! - The request path never awaits an exporter
//! - A full queue or failed push is counted, never surfaced to callers
//! - Workers drain and flush their queue when shutdown is signalled, which
//!   happens only after every producer has stopped

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::logging::LogRecord;
use super::metrics::{MetricsRegistry, EXPORT_FAILURES_TOTAL};
use super::span::SpanRecord;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export queue is full")]
    QueueFull,

    #[error("export worker has stopped")]
    Closed,

    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("backend rejected batch with status {0}")]
    Rejected(u16),
}

pub trait SpanExporter: Send + Sync {
    fn export(&self, span: SpanRecord) -> Result<(), ExportError>;
}

pub trait LogExporter: Send + Sync {
    fn export(&self, record: LogRecord) -> Result<(), ExportError>;
}

/// Drops everything. Used when no backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExporter;

impl SpanExporter for NoopExporter {
    fn export(&self, _span: SpanRecord) -> Result<(), ExportError> {
        Ok(())
    }
}

impl LogExporter for NoopExporter {
    fn export(&self, _record: LogRecord) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Keeps every record in memory, in export order.
#[derive(Debug, Clone, Default)]
pub struct MemoryExporter {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
    logs: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl SpanExporter for MemoryExporter {
    fn export(&self, span: SpanRecord) -> Result<(), ExportError> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).push(span);
        Ok(())
    }
}

impl LogExporter for MemoryExporter {
    fn export(&self, record: LogRecord) -> Result<(), ExportError> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).push(record);
        Ok(())
    }
}

/// Delivers one batch to a backend.
pub trait Transport<T>: Send + Sync + 'static {
    fn send(&self, batch: Vec<T>) -> impl Future<Output = Result<(), ExportError>> + Send;
}

/// Batching settings for a worker.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub queue_capacity: usize,
    pub max_batch: usize,
    pub flush_interval: Duration,
}

/// Front half of a batching exporter: a bounded queue.
pub struct BatchExporter<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> BatchExporter<T> {
    /// Spawn the worker and return the exporter feeding it.
    pub fn spawn<X: Transport<T>>(
        transport: X,
        settings: BatchSettings,
        failures: metrics::Counter,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let worker = BatchWorker {
            rx,
            transport,
            settings,
            failures,
        };
        let handle = tokio::spawn(worker.run(shutdown));
        (Self { tx }, handle)
    }

    fn enqueue(&self, item: T) -> Result<(), ExportError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ExportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ExportError::Closed,
        })
    }
}

impl LogExporter for BatchExporter<LogRecord> {
    fn export(&self, record: LogRecord) -> Result<(), ExportError> {
        self.enqueue(record)
    }
}

struct BatchWorker<T, X> {
    rx: mpsc::Receiver<T>,
    transport: X,
    settings: BatchSettings,
    failures: metrics::Counter,
}

impl<T: Send + 'static, X: Transport<T>> BatchWorker<T, X> {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.settings.flush_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        let mut batch = Vec::with_capacity(self.settings.max_batch);

        loop {
            tokio::select! {
                item = self.rx.recv() => {
                    match item {
                        Some(item) => {
                            batch.push(item);
                            if batch.len() >= self.settings.max_batch {
                                self.flush(&mut batch).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
                _ = shutdown.recv() => {
                    while let Ok(item) = self.rx.try_recv() {
                        batch.push(item);
                    }
                    break;
                }
            }
        }

        self.flush(&mut batch).await;
        tracing::debug!("Export worker stopped");
    }

    async fn flush(&self, batch: &mut Vec<T>) {
        if batch.is_empty() {
            return;
        }
        let items = std::mem::take(batch);
        let count = items.len() as u64;
        if let Err(e) = self.transport.send(items).await {
            tracing::warn!(error = %e, dropped = count, "Telemetry export failed");
            self.failures.increment(count);
        }
    }
}

/// Counter for swallowed export failures of one signal.
pub fn failure_counter(registry: &MetricsRegistry, signal: &'static str) -> metrics::Counter {
    registry.counter(EXPORT_FAILURES_TOTAL, &[("signal", signal)])
}

/// Loki push transport (`POST {endpoint}/loki/api/v1/push`).
#[derive(Debug, Clone)]
pub struct LokiTransport {
    client: reqwest::Client,
    url: String,
    environment: String,
    timeout: Duration,
}

impl LokiTransport {
    pub fn new(endpoint: &str, environment: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/loki/api/v1/push", endpoint.trim_end_matches('/')),
            environment: environment.to_string(),
            timeout,
        }
    }
}

/// Group records into Loki streams keyed by `(service, level)`.
pub fn loki_payload(records: &[LogRecord], environment: &str) -> Value {
    let mut streams: Vec<(String, &'static str, Vec<Value>)> = Vec::new();
    for record in records {
        let line = serde_json::to_string(record).unwrap_or_else(|_| record.message.clone());
        let entry = json!([record.timestamp_unix_nanos.to_string(), line]);
        let level = record.level.as_str();
        match streams
            .iter_mut()
            .find(|(service, lvl, _)| *service == record.service && *lvl == level)
        {
            Some((_, _, values)) => values.push(entry),
            None => streams.push((record.service.clone(), level, vec![entry])),
        }
    }

    let streams: Vec<Value> = streams
        .into_iter()
        .map(|(service, level, values)| {
            json!({
                "stream": {
                    "job": service,
                    "service": service,
                    "level": level,
                    "environment": environment,
                },
                "values": values,
            })
        })
        .collect();
    json!({ "streams": streams })
}

impl Transport<LogRecord> for LokiTransport {
    fn send(&self, batch: Vec<LogRecord>) -> impl Future<Output = Result<(), ExportError>> + Send {
        let request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&loki_payload(&batch, &self.environment));
        async move {
            let response = request
                .send()
                .await
                .map_err(|e| ExportError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ExportError::Rejected(response.status().as_u16()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::LogLevel;
    use crate::observability::metrics::sum_series;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_loki_payload_streams_by_level() {
        let records = vec![
            LogRecord::new("database-service", LogLevel::Info, "a".into(), None, &[]),
            LogRecord::new("database-service", LogLevel::Warn, "b".into(), None, &[]),
            LogRecord::new("database-service", LogLevel::Info, "c".into(), None, &[]),
        ];
        let payload = loki_payload(&records, "demo");
        let streams = payload["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0]["stream"]["level"], "INFO");
        assert_eq!(streams[0]["values"].as_array().unwrap().len(), 2);
        assert_eq!(streams[1]["stream"]["environment"], "demo");
    }

    struct CountingTransport {
        delivered: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Transport<LogRecord> for CountingTransport {
        fn send(
            &self,
            batch: Vec<LogRecord>,
        ) -> impl Future<Output = Result<(), ExportError>> + Send {
            let delivered = self.delivered.clone();
            let fail = self.fail;
            async move {
                if fail {
                    return Err(ExportError::Transport("unreachable".into()));
                }
                delivered.fetch_add(batch.len(), Ordering::SeqCst);
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

    #[tokio::test]
    async fn test_worker_flushes_on_shutdown() {
        let registry = MetricsRegistry::new().unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        let (tx, _) = broadcast::channel(1);
        let (exporter, handle) = BatchExporter::spawn(
            CountingTransport { delivered: delivered.clone(), fail: false },
            settings(),
            failure_counter(&registry, "logs"),
            tx.subscribe(),
        );

        for i in 0..6 {
            let record = LogRecord::new("svc", LogLevel::Info, format!("line {i}"), None, &[]);
            LogExporter::export(&exporter, record).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 6);
        assert_eq!(sum_series(&registry.render(), EXPORT_FAILURES_TOTAL, &[]), 0.0);
    }

    #[tokio::test]
    async fn test_failed_push_is_counted() {
        let registry = MetricsRegistry::new().unwrap();
        let (tx, _) = broadcast::channel(1);
        let (exporter, handle) = BatchExporter::spawn(
            CountingTransport { delivered: Arc::new(AtomicUsize::new(0)), fail: true },
            settings(),
            failure_counter(&registry, "logs"),
            tx.subscribe(),
        );

        for _ in 0..4 {
            let record = LogRecord::new("svc", LogLevel::Error, "boom".into(), None, &[]);
            LogExporter::export(&exporter, record).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let text = registry.render();
        assert_eq!(sum_series(&text, EXPORT_FAILURES_TOTAL, &["signal=\"logs\""]), 4.0);
    }
}
