//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::sim::LatencyRange;

/// Root configuration shared by the three tiers.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Edge service (entry point and traffic generator).
    pub edge: EdgeConfig,

    /// Business-logic service (cache, validation, pricing).
    pub logic: LogicConfig,

    /// Data service (simulated database).
    pub data: DataConfig,

    /// Logging and telemetry export.
    pub telemetry: TelemetryConfig,

    /// Randomness settings shared by all tiers.
    pub simulation: SimulationConfig,
}

/// Edge service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Bind address (e.g., "0.0.0.0:8001").
    pub bind_address: String,

    /// Base URL of the business-logic service.
    pub logic_url: String,

    /// Timeout for calls to the business-logic service in milliseconds.
    pub downstream_timeout_ms: u64,

    /// Total time allowed for one inbound request in seconds.
    pub request_timeout_secs: u64,

    /// Background traffic generator.
    pub traffic: TrafficConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8001".to_string(),
            logic_url: "http://127.0.0.1:8002".to_string(),
            downstream_timeout_ms: 5000,
            request_timeout_secs: 30,
            traffic: TrafficConfig::default(),
        }
    }
}

/// Autonomous traffic generator settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Enable the generator.
    pub enabled: bool,

    /// Delay before the first request, letting the other tiers come up.
    pub startup_delay_ms: u64,

    /// Pause between requests, drawn uniformly from this range.
    pub interval: LatencyRange,

    /// Highest user id requested.
    pub max_user_id: u64,

    /// Highest product id requested.
    pub max_product_id: u64,

    /// Range for the simulated active-user gauge.
    pub active_users_min: u64,
    pub active_users_max: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_ms: 10_000,
            interval: LatencyRange::new(1000, 5000),
            max_user_id: 100,
            max_product_id: 50,
            active_users_min: 10,
            active_users_max: 100,
        }
    }
}

/// Business-logic service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogicConfig {
    /// Bind address (e.g., "0.0.0.0:8002").
    pub bind_address: String,

    /// Base URL of the data service.
    pub data_url: String,

    /// Timeout for calls to the data service in milliseconds.
    pub downstream_timeout_ms: u64,

    /// Total time allowed for one inbound request in seconds.
    pub request_timeout_secs: u64,

    /// Response cache.
    pub cache: CacheConfig,

    /// Probability of a simulated internal error per request.
    pub fault_probability: f64,

    /// Simulated latency of input validation.
    pub validation_latency: LatencyRange,

    /// Simulated latency of the business transform.
    pub transform_latency: LatencyRange,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8002".to_string(),
            data_url: "http://127.0.0.1:8003".to_string(),
            downstream_timeout_ms: 5000,
            request_timeout_secs: 30,
            cache: CacheConfig::default(),
            fault_probability: 0.02,
            validation_latency: LatencyRange::new(10, 50),
            transform_latency: LatencyRange::new(20, 80),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Consult the cache at all. Disabled means every lookup is a miss.
    pub enabled: bool,

    /// Entry freshness in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60,
        }
    }
}

/// Data service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataConfig {
    /// Bind address (e.g., "0.0.0.0:8003").
    pub bind_address: String,

    /// Total time allowed for one inbound request in seconds.
    pub request_timeout_secs: u64,

    /// Probability that a query fails after planning.
    pub fault_probability: f64,

    /// Queries whose simulated duration exceeds this are reported as slow.
    pub slow_query_threshold_ms: u64,

    /// Rows generated into `users` at startup.
    pub user_rows: u64,

    /// Rows generated into `products` and `inventory` at startup.
    pub product_rows: u64,

    /// Per-phase latency distributions.
    pub latency: PhaseLatencies,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8003".to_string(),
            request_timeout_secs: 30,
            fault_probability: 0.02,
            slow_query_threshold_ms: 150,
            user_rows: 1000,
            product_rows: 500,
            latency: PhaseLatencies::default(),
        }
    }
}

/// Latency of each simulated query phase.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct PhaseLatencies {
    pub transaction_begin: LatencyRange,
    pub planning: LatencyRange,
    pub execution: LatencyRange,
    pub join: LatencyRange,
    pub transaction_commit: LatencyRange,
}

impl PhaseLatencies {
    /// Every phase completes instantly.
    pub const fn instant() -> Self {
        Self {
            transaction_begin: LatencyRange::ZERO,
            planning: LatencyRange::ZERO,
            execution: LatencyRange::ZERO,
            join: LatencyRange::ZERO,
            transaction_commit: LatencyRange::ZERO,
        }
    }
}

impl Default for PhaseLatencies {
    fn default() -> Self {
        Self {
            transaction_begin: LatencyRange::new(0, 2),
            planning: LatencyRange::new(1, 5),
            execution: LatencyRange::new(10, 200),
            join: LatencyRange::new(5, 20),
            transaction_commit: LatencyRange::new(0, 2),
        }
    }
}

/// Logging and export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Local log output.
    pub logging: LoggingConfig,

    /// OTLP/HTTP endpoint for spans (e.g., "http://tempo:4318"). Unset disables export.
    pub traces_endpoint: Option<String>,

    /// Loki endpoint for logs (e.g., "http://loki:3100"). Unset disables export.
    pub logs_endpoint: Option<String>,

    /// `environment` label attached to exported logs.
    pub environment: String,

    /// Records buffered per signal before new ones are dropped.
    pub queue_capacity: usize,

    /// Records per export request.
    pub max_batch: usize,

    /// Flush interval in milliseconds.
    pub flush_interval_ms: u64,

    /// Timeout for one export request in milliseconds.
    pub export_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            traces_endpoint: None,
            logs_endpoint: None,
            environment: "demo".to_string(),
            queue_capacity: 2048,
            max_batch: 256,
            flush_interval_ms: 1000,
            export_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Randomness settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for reproducible runs. Unset draws from the thread RNG.
    pub seed: Option<u64>,
}
