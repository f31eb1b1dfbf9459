//! Data service request handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value};

use super::query::{Query, QueryEngine, QueryError};
use super::tables::{Table, Tables};
use super::{
    CONNECTION_POOL_ACTIVE, QUERIES_TOTAL, QUERY_DURATION_SECONDS, SERVICE_NAME, SLOW_QUERIES_TOTAL,
    TABLE_SIZE_BYTES, TRANSACTIONS_TOTAL,
};
use crate::config::schema::DataConfig;
use crate::error::{parse_id, ErrorResponse, ServiceError};
use crate::http::routes::{ops_router, ScrapeHook};
use crate::observability::{Span, Telemetry};
use crate::sim::Chaos;

/// What the caller asked for, before the id is validated.
#[derive(Debug, Clone)]
pub enum DataRequest {
    General,
    User(String),
    Product(String),
}

impl DataRequest {
    fn span_name(&self) -> &'static str {
        match self {
            DataRequest::General => "database_query",
            DataRequest::User(_) => "database_get_user",
            DataRequest::Product(_) => "database_get_product",
        }
    }

    fn route(&self) -> &'static str {
        match self {
            DataRequest::General => "/db/query",
            DataRequest::User(_) => "/db/user/{id}",
            DataRequest::Product(_) => "/db/product/{id}",
        }
    }

    fn table(&self) -> Table {
        match self {
            DataRequest::General => Table::General,
            DataRequest::User(_) => Table::Users,
            DataRequest::Product(_) => Table::Products,
        }
    }

    fn describe(&self) -> String {
        match self {
            DataRequest::General => "general query".to_string(),
            DataRequest::User(id) => format!("user {id}"),
            DataRequest::Product(id) => format!("product {id}"),
        }
    }

    fn parse(&self) -> Result<Query, ServiceError> {
        match self {
            DataRequest::General => Ok(Query::General),
            DataRequest::User(raw) => parse_id("user_id", raw).map(Query::User),
            DataRequest::Product(raw) => parse_id("product_id", raw).map(Query::Product),
        }
    }
}

/// Decrements the pool gauge when the query finishes or is abandoned.
struct InFlight(metrics::Gauge);

impl InFlight {
    fn enter(gauge: metrics::Gauge) -> Self {
        gauge.increment(1.0);
        Self(gauge)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

struct Inner {
    telemetry: Telemetry,
    engine: QueryEngine,
    tables: Arc<Tables>,
}

/// The data tier: a simulated database behind HTTP.
#[derive(Clone)]
pub struct DataService {
    inner: Arc<Inner>,
}

impl DataService {
    pub fn new(config: &DataConfig, telemetry: Telemetry, chaos: Arc<dyn Chaos>) -> Self {
        describe_metrics(&telemetry);
        let tables = Arc::new(Tables::generate(config.user_rows, config.product_rows));
        let engine = QueryEngine::new(
            telemetry.clone(),
            tables.clone(),
            chaos,
            config.latency,
            config.fault_probability,
            Duration::from_millis(config.slow_query_threshold_ms),
        );
        let service = Self {
            inner: Arc::new(Inner {
                telemetry,
                engine,
                tables,
            }),
        };
        service.refresh_gauges();
        service
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }

    /// Router with the query endpoints plus `/health` and `/metrics`.
    pub fn router(&self) -> Router {
        let hook_service = self.clone();
        let hook: ScrapeHook = Arc::new(move |_| hook_service.refresh_gauges());
        Router::new()
            .route("/db/query", get(query_general))
            .route("/db/user/{id}", get(get_user))
            .route("/db/product/{id}", get(get_product))
            .with_state(self.clone())
            .merge(ops_router(self.inner.telemetry.clone(), Some(hook)))
    }

    /// Table sizes are sampled at scrape time.
    pub fn refresh_gauges(&self) {
        let metrics = self.inner.telemetry.metrics();
        for table in Table::ALL {
            if table == Table::General {
                continue;
            }
            metrics.set_gauge(
                TABLE_SIZE_BYTES,
                &[("table", table.as_str())],
                self.inner.tables.size_bytes(table) as f64,
            );
        }
        // Registers the series so it renders before the first query.
        metrics.gauge(CONNECTION_POOL_ACTIVE, &[]).increment(0.0);
    }

    /// Serve one query: open the hop span, validate, execute, record.
    pub async fn handle(
        &self,
        headers: &HeaderMap,
        request: DataRequest,
    ) -> Result<Value, ServiceError> {
        let telemetry = &self.inner.telemetry;
        let started = Instant::now();
        let _in_flight = InFlight::enter(telemetry.metrics().gauge(CONNECTION_POOL_ACTIVE, &[]));

        let parent = telemetry.extract_context(headers);
        let mut hop = telemetry.start_span(request.span_name(), parent.as_ref());
        hop.set_attribute("http.method", "GET");
        hop.set_attribute("http.route", request.route());
        match &request {
            DataRequest::User(id) => hop.set_attribute("user.id", id.as_str()),
            DataRequest::Product(id) => hop.set_attribute("product.id", id.as_str()),
            DataRequest::General => {}
        }
        hop.info(format!("Querying {} from database", request.describe()));

        let table = request.table();
        let query = match request.parse() {
            Ok(query) => query,
            Err(e) => {
                self.record(table, "invalid", started);
                return Err(self.fail(hop, e));
            }
        };

        match self.inner.engine.execute(query, &mut hop).await {
            Ok(result) => {
                self.record(table, "success", started);
                hop.info(format!(
                    "{} query completed in {:.3}s",
                    capitalize(&request.describe()),
                    started.elapsed().as_secs_f64()
                ));
                hop.ok();

                let mut body = Map::new();
                body.insert("database".into(), Value::from(SERVICE_NAME));
                body.insert(query.payload_key().into(), result.value);
                Ok(Value::Object(body))
            }
            Err(QueryError::NotFound { id, .. }) => {
                self.record(table, "not_found", started);
                let resource = match query {
                    Query::Product(_) => "product",
                    _ => "user",
                };
                Err(self.fail(hop, ServiceError::NotFound { resource, id: id.to_string() }))
            }
            Err(QueryError::Fault { .. }) => {
                self.record(table, "error", started);
                Err(self.fail(hop, ServiceError::SimulatedFault("query")))
            }
        }
    }

    fn record(&self, table: Table, status: &'static str, started: Instant) {
        let metrics = self.inner.telemetry.metrics();
        let table = table.as_str();
        metrics.increment_counter(
            QUERIES_TOTAL,
            &[("operation", "SELECT"), ("table", table), ("status", status)],
        );
        metrics.observe(
            QUERY_DURATION_SECONDS,
            &[("operation", "SELECT"), ("table", table)],
            started.elapsed().as_secs_f64(),
        );
    }

    fn fail(&self, hop: Span, error: ServiceError) -> ServiceError {
        hop.error(format!("Query failed: {error}"));
        hop.fail();
        error
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe_metrics(telemetry: &Telemetry) {
    let m = telemetry.metrics();
    m.describe_counter(QUERIES_TOTAL, "Total number of database queries");
    m.describe_histogram(QUERY_DURATION_SECONDS, "Query execution duration in seconds");
    m.describe_gauge(CONNECTION_POOL_ACTIVE, "Number of active database connections");
    m.describe_counter(SLOW_QUERIES_TOTAL, "Number of slow queries detected");
    m.describe_gauge(TABLE_SIZE_BYTES, "Estimated table size in bytes");
    m.describe_counter(TRANSACTIONS_TOTAL, "Total number of transactions");
}

fn respond(result: Result<Value, ServiceError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => ErrorResponse::new(SERVICE_NAME, e).into_response(),
    }
}

async fn query_general(State(service): State<DataService>, headers: HeaderMap) -> Response {
    respond(service.handle(&headers, DataRequest::General).await)
}

async fn get_user(
    State(service): State<DataService>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    respond(service.handle(&headers, DataRequest::User(id)).await)
}

async fn get_product(
    State(service): State<DataService>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    respond(service.handle(&headers, DataRequest::Product(id)).await)
}
