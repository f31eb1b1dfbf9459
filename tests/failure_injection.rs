//! Failure injection tests for the pipeline.

use std::time::Duration;

use tiered_telemetry::config::schema::PhaseLatencies;
use tiered_telemetry::observability::SpanStatus;
use tiered_telemetry::sim::LatencyRange;
use tiered_telemetry::{data, edge, logic};

mod common;

use common::{PipelineOptions, TestPipeline};

fn slow_data(ms: u64) -> PhaseLatencies {
    PhaseLatencies {
        execution: LatencyRange::new(ms, ms),
        ..PhaseLatencies::instant()
    }
}

#[tokio::test]
async fn test_data_timeout_at_business_tier() {
    let pipeline = TestPipeline::start(PipelineOptions {
        data_latency: slow_data(300),
        logic_timeout_ms: 100,
        ..PipelineOptions::default()
    })
    .await;

    let (status, body) = pipeline.edge_get("/user/3").await;
    assert_eq!(status, 502);
    assert_eq!(body["origin"], data::SERVICE_NAME);

    assert_eq!(
        pipeline.metric(logic::SERVICE_NAME, logic::ERRORS_TOTAL, &["type=\"database_timeout\""]),
        1.0
    );
    assert_eq!(
        pipeline.metric(logic::SERVICE_NAME, logic::REQUESTS_TOTAL, &["status=\"504\""]),
        1.0
    );

    // The data tier finishes its own work and still closes its span.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let spans = pipeline.trace(pipeline.last_root("frontend_get_user"));
    let database = spans.iter().find(|s| s.name == "database_get_user").unwrap();
    assert_eq!(database.status, SpanStatus::Ok);
    let business = spans.iter().find(|s| s.name == "backend_get_user").unwrap();
    assert_eq!(business.status, SpanStatus::Error);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_business_timeout_at_edge() {
    let pipeline = TestPipeline::start(PipelineOptions {
        data_latency: slow_data(300),
        edge_timeout_ms: 100,
        ..PipelineOptions::default()
    })
    .await;

    let (status, body) = pipeline.edge_get("/product/9").await;
    assert_eq!(status, 504);
    assert_eq!(body["error"], "downstream_timeout");
    assert_eq!(body["origin"], logic::SERVICE_NAME);
    assert_eq!(
        pipeline.metric(edge::SERVICE_NAME, edge::ERRORS_TOTAL, &["type=\"backend_error\""]),
        1.0
    );

    pipeline.stop().await;
}

#[tokio::test]
async fn test_business_fault_never_reaches_data_tier() {
    let pipeline = TestPipeline::start(PipelineOptions {
        logic_fault: 1.0,
        ..PipelineOptions::default()
    })
    .await;

    let (status, body) = pipeline.edge_get("/").await;
    assert_eq!(status, 502);
    assert_eq!(body["origin"], logic::SERVICE_NAME);

    let spans = pipeline.trace(pipeline.last_root("frontend_home_request"));
    assert!(spans.iter().all(|s| s.service != data::SERVICE_NAME));
    let business = spans.iter().find(|s| s.name == "backend_get_data").unwrap();
    assert_eq!(business.status, SpanStatus::Error);

    assert_eq!(
        pipeline.metric(logic::SERVICE_NAME, logic::ERRORS_TOTAL, &["type=\"simulated_fault\""]),
        1.0
    );
    assert_eq!(pipeline.metric(logic::SERVICE_NAME, logic::CACHE_OPERATIONS_TOTAL, &[]), 0.0);
    assert_eq!(pipeline.metric(data::SERVICE_NAME, data::QUERIES_TOTAL, &[]), 0.0);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_invalid_id_rejected_at_edge() {
    let pipeline = TestPipeline::start(PipelineOptions::default()).await;

    let (status, body) = pipeline.edge_get("/user/abc").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["origin"], "local");

    let spans = pipeline.trace(pipeline.last_root("frontend_get_user"));
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, SpanStatus::Error);
    assert_eq!(
        pipeline.metric(edge::SERVICE_NAME, edge::ERRORS_TOTAL, &["type=\"invalid_request\""]),
        1.0
    );
    assert_eq!(pipeline.metric(logic::SERVICE_NAME, logic::REQUESTS_TOTAL, &[]), 0.0);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_invalid_id_rejected_at_business_tier() {
    let pipeline = TestPipeline::start(PipelineOptions::default()).await;

    let (status, body) = pipeline.get(&format!("{}/api/product/0", pipeline.logic_url)).await;
    assert_eq!(status, 400);
    assert_eq!(body["service"], logic::SERVICE_NAME);

    let spans = pipeline.sink.spans();
    let validate = spans.iter().find(|s| s.name == "validate_product").unwrap();
    assert_eq!(validate.status, SpanStatus::Error);
    assert_eq!(pipeline.metric(data::SERVICE_NAME, data::QUERIES_TOTAL, &[]), 0.0);

    pipeline.stop().await;
}
