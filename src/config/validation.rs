//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (probabilities, latencies, timeouts)
//! - Check bind addresses and downstream URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::PipelineConfig;
use crate::sim::LatencyRange;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: probability {value} is outside [0, 1]")]
    Probability { field: &'static str, value: f64 },

    #[error("{field}: min_ms {min_ms} is greater than max_ms {max_ms}")]
    LatencyRange { field: &'static str, min_ms: u64, max_ms: u64 },

    #[error("{field}: must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field}: invalid socket address {value:?}")]
    Address { field: &'static str, value: String },

    #[error("{field}: invalid http url {value:?}")]
    Url { field: &'static str, value: String },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn probability(errors: &mut Vec<ValidationError>, field: &'static str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(ValidationError::Probability { field, value });
    }
}

fn latency(errors: &mut Vec<ValidationError>, field: &'static str, range: &LatencyRange) {
    if !range.is_valid() {
        errors.push(ValidationError::LatencyRange {
            field,
            min_ms: range.min_ms,
            max_ms: range.max_ms,
        });
    }
}

fn non_zero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

fn address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}

fn http_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    let ok = Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false);
    if !ok {
        errors.push(ValidationError::Url {
            field,
            value: value.to_string(),
        });
    }
}

/// Check every semantic constraint and report all violations.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let edge = &config.edge;
    address(&mut errors, "edge.bind_address", &edge.bind_address);
    http_url(&mut errors, "edge.logic_url", &edge.logic_url);
    non_zero(&mut errors, "edge.downstream_timeout_ms", edge.downstream_timeout_ms);
    non_zero(&mut errors, "edge.request_timeout_secs", edge.request_timeout_secs);
    latency(&mut errors, "edge.traffic.interval", &edge.traffic.interval);
    non_zero(&mut errors, "edge.traffic.interval.max_ms", edge.traffic.interval.max_ms);
    non_zero(&mut errors, "edge.traffic.max_user_id", edge.traffic.max_user_id);
    non_zero(&mut errors, "edge.traffic.max_product_id", edge.traffic.max_product_id);
    if edge.traffic.active_users_min > edge.traffic.active_users_max {
        errors.push(ValidationError::Invalid {
            field: "edge.traffic.active_users_min",
            reason: "greater than active_users_max".to_string(),
        });
    }

    let logic = &config.logic;
    address(&mut errors, "logic.bind_address", &logic.bind_address);
    http_url(&mut errors, "logic.data_url", &logic.data_url);
    non_zero(&mut errors, "logic.downstream_timeout_ms", logic.downstream_timeout_ms);
    non_zero(&mut errors, "logic.request_timeout_secs", logic.request_timeout_secs);
    probability(&mut errors, "logic.fault_probability", logic.fault_probability);
    latency(&mut errors, "logic.validation_latency", &logic.validation_latency);
    latency(&mut errors, "logic.transform_latency", &logic.transform_latency);

    let data = &config.data;
    address(&mut errors, "data.bind_address", &data.bind_address);
    non_zero(&mut errors, "data.request_timeout_secs", data.request_timeout_secs);
    probability(&mut errors, "data.fault_probability", data.fault_probability);
    non_zero(&mut errors, "data.user_rows", data.user_rows);
    non_zero(&mut errors, "data.product_rows", data.product_rows);
    latency(&mut errors, "data.latency.transaction_begin", &data.latency.transaction_begin);
    latency(&mut errors, "data.latency.planning", &data.latency.planning);
    latency(&mut errors, "data.latency.execution", &data.latency.execution);
    latency(&mut errors, "data.latency.join", &data.latency.join);
    latency(&mut errors, "data.latency.transaction_commit", &data.latency.transaction_commit);

    let telemetry = &config.telemetry;
    if let Some(endpoint) = &telemetry.traces_endpoint {
        http_url(&mut errors, "telemetry.traces_endpoint", endpoint);
    }
    if let Some(endpoint) = &telemetry.logs_endpoint {
        http_url(&mut errors, "telemetry.logs_endpoint", endpoint);
    }
    non_zero(&mut errors, "telemetry.queue_capacity", telemetry.queue_capacity as u64);
    non_zero(&mut errors, "telemetry.max_batch", telemetry.max_batch as u64);
    non_zero(&mut errors, "telemetry.flush_interval_ms", telemetry.flush_interval_ms);
    non_zero(&mut errors, "telemetry.export_timeout_ms", telemetry.export_timeout_ms);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
