//! Startup orchestration.
//!
//! # Responsibilities
//! - Build one `Telemetry` per tier, with export workers when backends are set
//! - Bind listeners and spawn the HTTP server of each selected tier
//! - Start the traffic generator alongside the edge tier
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Tiers start in dependency order: data, logic, edge
//! - In `all` mode each caller is pointed at the address its callee actually
//!   bound, so ephemeral ports work

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::Shutdown;
use crate::config::schema::{PipelineConfig, TelemetryConfig};
use crate::data::DataService;
use crate::edge::{EdgeService, TrafficGenerator};
use crate::http::HttpServer;
use crate::logic::LogicService;
use crate::observability::export::{failure_counter, BatchExporter, BatchSettings, LokiTransport};
use crate::observability::otlp::{self, OtlpError, OtlpSpanExporter};
use crate::observability::{LogExporter, MetricsRegistry, NoopExporter, SpanExporter, Telemetry};
use crate::sim::{chaos_from_seed, SystemClock};

/// Which tiers this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    Edge,
    Logic,
    Data,
    All,
}

impl Role {
    fn runs_edge(self) -> bool {
        matches!(self, Role::Edge | Role::All)
    }

    fn runs_logic(self) -> bool {
        matches!(self, Role::Logic | Role::All)
    }

    fn runs_data(self) -> bool {
        matches!(self, Role::Data | Role::All)
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("{0}")]
    Otlp(#[from] OtlpError),

    #[error("invalid downstream URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Build the telemetry emitter for one service.
///
/// Spans and logs go to batching workers when an endpoint is configured,
/// otherwise only to the local `tracing` output. The returned handles
/// finish once `exporter_shutdown` fires and the queues are flushed, so
/// fire it only after everything that emits through this `Telemetry` has
/// stopped.
pub fn build_telemetry(
    service: &'static str,
    config: &TelemetryConfig,
    exporter_shutdown: &Shutdown,
) -> Result<(Telemetry, Vec<JoinHandle<()>>), StartupError> {
    let registry = MetricsRegistry::new()?;
    let settings = BatchSettings {
        queue_capacity: config.queue_capacity,
        max_batch: config.max_batch,
        flush_interval: Duration::from_millis(config.flush_interval_ms),
    };
    let timeout = Duration::from_millis(config.export_timeout_ms);
    let mut workers = Vec::new();

    let spans: Arc<dyn SpanExporter> = match &config.traces_endpoint {
        Some(endpoint) => {
            let provider = otlp::tracer_provider(
                service,
                otlp::http_exporter(endpoint, timeout)?,
                settings,
                failure_counter(&registry, "traces"),
            );
            let exporter = OtlpSpanExporter::new(provider);
            let flusher = exporter.clone();
            let mut rx = exporter_shutdown.subscribe();
            workers.push(tokio::spawn(async move {
                let _ = rx.recv().await;
                if let Err(e) = tokio::task::spawn_blocking(move || flusher.shutdown()).await {
                    tracing::error!(error = %e, "Span flush task failed");
                }
            }));
            Arc::new(exporter)
        }
        None => Arc::new(NoopExporter),
    };

    let logs: Arc<dyn LogExporter> = match &config.logs_endpoint {
        Some(endpoint) => {
            let (exporter, worker) = BatchExporter::spawn(
                LokiTransport::new(endpoint, &config.environment, timeout),
                settings,
                failure_counter(&registry, "logs"),
                exporter_shutdown.subscribe(),
            );
            workers.push(worker);
            Arc::new(exporter)
        }
        None => Arc::new(NoopExporter),
    };

    tracing::debug!(
        service,
        traces = config.traces_endpoint.as_deref().unwrap_or("none"),
        logs = config.logs_endpoint.as_deref().unwrap_or("none"),
        "Telemetry configured"
    );
    Ok((Telemetry::new(service, registry, spans, logs), workers))
}

/// The running tiers of this process.
pub struct Pipeline {
    addresses: Vec<(&'static str, SocketAddr)>,
    tasks: Vec<JoinHandle<()>>,
    exporters: Vec<JoinHandle<()>>,
    exporter_shutdown: Shutdown,
}

impl Pipeline {
    /// Address a running tier is bound to.
    pub fn address(&self, service: &str) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|(name, _)| *name == service)
            .map(|(_, addr)| *addr)
    }

    /// Wait for servers and the traffic generator to stop, then stop the
    /// export workers and wait for them to flush.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Pipeline task failed");
            }
        }
        self.exporter_shutdown.trigger();
        for worker in self.exporters {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Export worker failed");
            }
        }
    }
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

fn spawn_server(server: HttpServer, listener: TcpListener, shutdown: &Shutdown) -> JoinHandle<()> {
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        if let Err(e) = server.run(listener, rx).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    })
}

/// Start the tiers selected by `role`.
pub async fn start(
    mut config: PipelineConfig,
    role: Role,
    shutdown: &Shutdown,
) -> Result<Pipeline, StartupError> {
    let chaos = chaos_from_seed(config.simulation.seed);
    let mut pipeline = Pipeline {
        addresses: Vec::new(),
        tasks: Vec::new(),
        exporters: Vec::new(),
        exporter_shutdown: Shutdown::new(),
    };

    if role.runs_data() {
        let (telemetry, workers) = build_telemetry(
            crate::data::SERVICE_NAME,
            &config.telemetry,
            &pipeline.exporter_shutdown,
        )?;
        pipeline.exporters.extend(workers);
        let service = DataService::new(&config.data, telemetry, chaos.clone());

        let listener = bind(&config.data.bind_address).await?;
        let addr = listener.local_addr().map_err(|source| StartupError::Bind {
            address: config.data.bind_address.clone(),
            source,
        })?;
        if role == Role::All {
            config.logic.data_url = format!("http://{addr}");
        }
        let server = HttpServer::new(
            crate::data::SERVICE_NAME,
            service.router(),
            Duration::from_secs(config.data.request_timeout_secs),
        );
        pipeline.tasks.push(spawn_server(server, listener, shutdown));
        pipeline.addresses.push((crate::data::SERVICE_NAME, addr));
    }

    if role.runs_logic() {
        let (telemetry, workers) = build_telemetry(
            crate::logic::SERVICE_NAME,
            &config.telemetry,
            &pipeline.exporter_shutdown,
        )?;
        pipeline.exporters.extend(workers);
        let service =
            LogicService::new(&config.logic, telemetry, chaos.clone(), Arc::new(SystemClock))?;

        let listener = bind(&config.logic.bind_address).await?;
        let addr = listener.local_addr().map_err(|source| StartupError::Bind {
            address: config.logic.bind_address.clone(),
            source,
        })?;
        if role == Role::All {
            config.edge.logic_url = format!("http://{addr}");
        }
        let server = HttpServer::new(
            crate::logic::SERVICE_NAME,
            service.router(),
            Duration::from_secs(config.logic.request_timeout_secs),
        );
        pipeline.tasks.push(spawn_server(server, listener, shutdown));
        pipeline.addresses.push((crate::logic::SERVICE_NAME, addr));
    }

    if role.runs_edge() {
        let (telemetry, workers) = build_telemetry(
            crate::edge::SERVICE_NAME,
            &config.telemetry,
            &pipeline.exporter_shutdown,
        )?;
        pipeline.exporters.extend(workers);
        let service = EdgeService::new(&config.edge, telemetry)?;

        let listener = bind(&config.edge.bind_address).await?;
        let addr = listener.local_addr().map_err(|source| StartupError::Bind {
            address: config.edge.bind_address.clone(),
            source,
        })?;
        let server = HttpServer::new(
            crate::edge::SERVICE_NAME,
            service.router(),
            Duration::from_secs(config.edge.request_timeout_secs),
        );
        pipeline.tasks.push(spawn_server(server, listener, shutdown));
        pipeline.addresses.push((crate::edge::SERVICE_NAME, addr));

        if config.edge.traffic.enabled {
            let generator =
                TrafficGenerator::new(service, chaos.clone(), config.edge.traffic.clone());
            let rx = shutdown.subscribe();
            pipeline.tasks.push(tokio::spawn(async move {
                generator.run(rx).await;
            }));
        }
    }

    for (service, addr) in &pipeline.addresses {
        tracing::info!(service, address = %addr, "Tier started");
    }
    Ok(pipeline)
}
