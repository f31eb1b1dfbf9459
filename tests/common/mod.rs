//! Shared utilities for pipeline integration and load testing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tiered_telemetry::config::schema::{DataConfig, EdgeConfig, LogicConfig, PhaseLatencies};
use tiered_telemetry::data::DataService;
use tiered_telemetry::edge::EdgeService;
use tiered_telemetry::http::HttpServer;
use tiered_telemetry::lifecycle::Shutdown;
use tiered_telemetry::logic::LogicService;
use tiered_telemetry::observability::metrics::sum_series;
use tiered_telemetry::observability::{MemoryExporter, SpanRecord, Telemetry, TraceId};
use tiered_telemetry::sim::{Chaos, FixedChaos, LatencyRange, ManualClock};

/// Knobs a test may turn before the pipeline starts.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub cache_enabled: bool,
    pub logic_fault: f64,
    pub data_fault: f64,
    pub data_latency: PhaseLatencies,
    pub slow_query_threshold_ms: u64,
    pub edge_timeout_ms: u64,
    pub logic_timeout_ms: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            logic_fault: 0.0,
            data_fault: 0.0,
            data_latency: PhaseLatencies::instant(),
            slow_query_threshold_ms: 150,
            edge_timeout_ms: 5000,
            logic_timeout_ms: 5000,
        }
    }
}

/// All three tiers on ephemeral ports, sharing one in-memory sink.
#[allow(dead_code)]
pub struct TestPipeline {
    pub sink: MemoryExporter,
    pub edge: EdgeService,
    pub logic: LogicService,
    pub data: DataService,
    pub edge_url: String,
    pub logic_url: String,
    pub data_url: String,
    pub client: reqwest::Client,
    pub clock: Arc<ManualClock>,
    shutdown: Shutdown,
    servers: Vec<JoinHandle<()>>,
}

async fn serve(
    name: &'static str,
    router: axum::Router,
    shutdown: &Shutdown,
) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(name, router, Duration::from_secs(30));
    let rx = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    (format!("http://{addr}"), handle)
}

#[allow(dead_code)]
impl TestPipeline {
    pub async fn start(options: PipelineOptions) -> Self {
        let sink = MemoryExporter::new();
        let shutdown = Shutdown::new();
        let clock = Arc::new(ManualClock::new());
        let chaos: Arc<dyn Chaos> = Arc::new(FixedChaos::calm());
        let mut servers = Vec::new();

        let data_config = DataConfig {
            fault_probability: options.data_fault,
            latency: options.data_latency,
            slow_query_threshold_ms: options.slow_query_threshold_ms,
            ..DataConfig::default()
        };
        let data = DataService::new(
            &data_config,
            Telemetry::in_memory(tiered_telemetry::data::SERVICE_NAME, &sink).unwrap(),
            chaos.clone(),
        );
        let (data_url, handle) =
            serve(tiered_telemetry::data::SERVICE_NAME, data.router(), &shutdown).await;
        servers.push(handle);

        let mut logic_config = LogicConfig {
            data_url: data_url.clone(),
            downstream_timeout_ms: options.logic_timeout_ms,
            fault_probability: options.logic_fault,
            validation_latency: LatencyRange::ZERO,
            transform_latency: LatencyRange::ZERO,
            ..LogicConfig::default()
        };
        logic_config.cache.enabled = options.cache_enabled;
        let logic = LogicService::new(
            &logic_config,
            Telemetry::in_memory(tiered_telemetry::logic::SERVICE_NAME, &sink).unwrap(),
            chaos.clone(),
            clock.clone(),
        )
        .unwrap();
        let (logic_url, handle) =
            serve(tiered_telemetry::logic::SERVICE_NAME, logic.router(), &shutdown).await;
        servers.push(handle);

        let edge_config = EdgeConfig {
            logic_url: logic_url.clone(),
            downstream_timeout_ms: options.edge_timeout_ms,
            ..EdgeConfig::default()
        };
        let edge = EdgeService::new(
            &edge_config,
            Telemetry::in_memory(tiered_telemetry::edge::SERVICE_NAME, &sink).unwrap(),
        )
        .unwrap();
        let (edge_url, handle) =
            serve(tiered_telemetry::edge::SERVICE_NAME, edge.router(), &shutdown).await;
        servers.push(handle);

        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        Self {
            sink,
            edge,
            logic,
            data,
            edge_url,
            logic_url,
            data_url,
            client,
            clock,
            shutdown,
            servers,
        }
    }

    /// GET `url` and return the status with the JSON body.
    pub async fn get(&self, url: &str) -> (u16, Value) {
        let res = self.client.get(url).send().await.unwrap();
        let status = res.status().as_u16();
        let body = res.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    /// GET `path` on the edge tier.
    pub async fn edge_get(&self, path: &str) -> (u16, Value) {
        self.get(&format!("{}{path}", self.edge_url)).await
    }

    /// Trace id of the most recent edge root span named `name`.
    pub fn last_root(&self, name: &str) -> TraceId {
        self.sink
            .spans()
            .into_iter()
            .filter(|s| s.name == name && s.parent_span_id.is_none())
            .last()
            .map(|s| s.trace_id)
            .unwrap()
    }

    pub fn trace(&self, trace_id: TraceId) -> Vec<SpanRecord> {
        self.sink
            .spans()
            .into_iter()
            .filter(|s| s.trace_id == trace_id)
            .collect()
    }

    /// Sum of `name` in the registry of `service`.
    pub fn metric(&self, service: &str, name: &str, filters: &[&str]) -> f64 {
        let text = match service {
            tiered_telemetry::edge::SERVICE_NAME => self.edge.telemetry().metrics().render(),
            tiered_telemetry::logic::SERVICE_NAME => self.logic.telemetry().metrics().render(),
            _ => self.data.telemetry().metrics().render(),
        };
        sum_series(&text, name, filters)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        for server in self.servers {
            let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
        }
    }
}
