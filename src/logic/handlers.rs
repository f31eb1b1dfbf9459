//! Business-logic service request handlers.

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

use super::transform::{apply_pricing, enrich_user, summarize_inventory};
use super::{
    CACHE_ENTRIES, CACHE_OPERATIONS_TOTAL, DATABASE_CALLS_TOTAL, ERRORS_TOTAL,
    PROCESSING_TIME_SECONDS, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS, SERVICE_NAME,
};
use crate::cache::{CacheLookup, TtlCache};
use crate::config::schema::LogicConfig;
use crate::error::{parse_id, ErrorResponse, ServiceError};
use crate::http::client::{DownstreamClient, DownstreamError};
use crate::http::routes::{ops_router, ScrapeHook};
use crate::observability::{LogLevel, Span, Telemetry};
use crate::sim::{Chaos, Clock, LatencyRange};

/// Name of the tier this service calls.
const DATA_SERVICE: &str = crate::data::SERVICE_NAME;

/// What the caller asked for, before the id is validated.
#[derive(Debug, Clone)]
pub enum LogicRequest {
    Data,
    User(String),
    Product(String),
}

impl LogicRequest {
    fn span_name(&self) -> &'static str {
        match self {
            LogicRequest::Data => "backend_get_data",
            LogicRequest::User(_) => "backend_get_user",
            LogicRequest::Product(_) => "backend_get_product",
        }
    }

    fn route(&self) -> &'static str {
        match self {
            LogicRequest::Data => "/api/data",
            LogicRequest::User(_) => "/api/user/{id}",
            LogicRequest::Product(_) => "/api/product/{id}",
        }
    }

    /// `endpoint` label on request metrics.
    fn endpoint(&self) -> &'static str {
        match self {
            LogicRequest::Data => "/api/data",
            LogicRequest::User(_) => "/api/user",
            LogicRequest::Product(_) => "/api/product",
        }
    }

    fn describe(&self) -> String {
        match self {
            LogicRequest::Data => "general data".to_string(),
            LogicRequest::User(id) => format!("user {id}"),
            LogicRequest::Product(id) => format!("product {id}"),
        }
    }

    /// Keyed on the parsed id so `0123` and `123` share an entry. An id
    /// that does not parse keeps its raw form and fails validation later.
    fn cache_key(&self) -> String {
        let canonical = |raw: &str| {
            raw.parse::<u64>()
                .map(|id| id.to_string())
                .unwrap_or_else(|_| raw.to_string())
        };
        match self {
            LogicRequest::Data => "general_data".to_string(),
            LogicRequest::User(raw) => format!("user_{}", canonical(raw)),
            LogicRequest::Product(raw) => format!("product_{}", canonical(raw)),
        }
    }

    fn payload_key(&self) -> &'static str {
        match self {
            LogicRequest::Data => "data",
            LogicRequest::User(_) => "user",
            LogicRequest::Product(_) => "product",
        }
    }

    /// Key of the row in the data tier's response.
    fn row_key(&self) -> &'static str {
        match self {
            LogicRequest::Data => "result",
            LogicRequest::User(_) => "user",
            LogicRequest::Product(_) => "product",
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            LogicRequest::Data => "query",
            LogicRequest::User(_) => "user",
            LogicRequest::Product(_) => "product",
        }
    }

    fn validate_span(&self) -> &'static str {
        match self {
            LogicRequest::Data => "validate_query",
            LogicRequest::User(_) => "validate_user",
            LogicRequest::Product(_) => "validate_product",
        }
    }

    /// Span name and `operation` label of the business transform.
    fn transform(&self) -> (&'static str, &'static str) {
        match self {
            LogicRequest::Data => ("summarize_inventory", "summary"),
            LogicRequest::User(_) => ("enrich_user", "enrichment"),
            LogicRequest::Product(_) => ("apply_pricing_rules", "pricing"),
        }
    }

    fn apply(&self, row: Value) -> Value {
        match self {
            LogicRequest::Data => summarize_inventory(row),
            LogicRequest::User(_) => enrich_user(row),
            LogicRequest::Product(_) => apply_pricing(row),
        }
    }

    /// Validate the id and build the data tier path.
    fn data_path(&self) -> Result<String, ServiceError> {
        match self {
            LogicRequest::Data => Ok("/db/query".to_string()),
            LogicRequest::User(raw) => parse_id("user_id", raw).map(|id| format!("/db/user/{id}")),
            LogicRequest::Product(raw) => {
                parse_id("product_id", raw).map(|id| format!("/db/product/{id}"))
            }
        }
    }

    fn id(&self) -> String {
        match self {
            LogicRequest::Data => String::new(),
            LogicRequest::User(id) | LogicRequest::Product(id) => id.clone(),
        }
    }
}

struct Inner {
    telemetry: Telemetry,
    cache: TtlCache<Value>,
    data: DownstreamClient,
    chaos: Arc<dyn Chaos>,
    fault_probability: f64,
    validation_latency: LatencyRange,
    transform_latency: LatencyRange,
}

/// The business-logic tier.
#[derive(Clone)]
pub struct LogicService {
    inner: Arc<Inner>,
}

impl LogicService {
    pub fn new(
        config: &LogicConfig,
        telemetry: Telemetry,
        chaos: Arc<dyn Chaos>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, url::ParseError> {
        describe_metrics(&telemetry);
        let data = DownstreamClient::new(
            DATA_SERVICE,
            &config.data_url,
            Duration::from_millis(config.downstream_timeout_ms),
        )?;
        let cache = if config.cache.enabled {
            TtlCache::new(Duration::from_secs(config.cache.ttl_secs), clock)
        } else {
            TtlCache::disabled(clock)
        };
        Ok(Self {
            inner: Arc::new(Inner {
                telemetry,
                cache,
                data,
                chaos,
                fault_probability: config.fault_probability,
                validation_latency: config.validation_latency,
                transform_latency: config.transform_latency,
            }),
        })
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }

    pub fn cache(&self) -> &TtlCache<Value> {
        &self.inner.cache
    }

    /// Router with the API endpoints plus `/health` and `/metrics`.
    pub fn router(&self) -> Router {
        let cache = self.inner.cache.clone();
        let hook: ScrapeHook = Arc::new(move |t: &Telemetry| {
            t.metrics().set_gauge(CACHE_ENTRIES, &[], cache.len() as f64);
        });
        Router::new()
            .route("/api/data", get(get_data))
            .route("/api/user/{id}", get(get_user))
            .route("/api/product/{id}", get(get_product))
            .with_state(self.clone())
            .merge(ops_router(self.inner.telemetry.clone(), Some(hook)))
    }

    /// Serve one request: hop span, fault check, cache, validation, data
    /// call, transform, cache fill.
    pub async fn handle(
        &self,
        headers: &HeaderMap,
        request: LogicRequest,
    ) -> Result<Value, ServiceError> {
        let inner = &self.inner;
        let started = Instant::now();

        let parent = inner.telemetry.extract_context(headers);
        let mut span = inner.telemetry.start_span(request.span_name(), parent.as_ref());
        span.set_attribute("http.method", "GET");
        span.set_attribute("http.route", request.route());
        match &request {
            LogicRequest::User(id) => span.set_attribute("user.id", id.as_str()),
            LogicRequest::Product(id) => span.set_attribute("product.id", id.as_str()),
            LogicRequest::Data => {}
        }
        if parent.is_none() {
            span.debug("No usable trace context on request, starting a new trace");
        }
        span.info(format!("Processing {} request", request.describe()));

        if inner.chaos.chance(inner.fault_probability) {
            self.count_error("simulated_fault");
            let error = ServiceError::SimulatedFault("internal");
            return Err(self.fail(span, &request, started, error));
        }

        let key = request.cache_key();
        match inner.cache.get(&key) {
            CacheLookup::Hit(value) => {
                self.cache_op("hit");
                span.set_attribute("cache.hit", true);
                span.info(format!("Cache hit for {}", request.describe()));
                self.record(&request, "200", started);
                span.ok();
                return Ok(self.body(&request, value, true));
            }
            CacheLookup::Miss(reason) => {
                self.cache_op("miss");
                span.set_attribute("cache.hit", false);
                span.log(
                    LogLevel::Info,
                    format!("Cache miss for {}", request.describe()),
                    &[("reason", reason.as_str().to_string())],
                );
            }
        }

        let validated = self.validate(&span, &request).await;
        let path = match validated {
            Ok(path) => path,
            Err(e) => return Err(self.fail(span, &request, started, e)),
        };

        span.info(format!("Querying database for {}", request.describe()));
        let fetched = inner.data.get_json(&path, span.context()).await;
        let response = match fetched {
            Ok(body) => {
                self.database_call("success");
                body
            }
            Err(e) => {
                let error = self.downstream_failure(&request, e);
                return Err(self.fail(span, &request, started, error));
            }
        };

        let Some(row) = response.get(request.row_key()).cloned() else {
            self.count_error("database_error");
            let error = ServiceError::Downstream(DownstreamError::InvalidBody {
                service: DATA_SERVICE,
                reason: format!("missing `{}` in response", request.row_key()),
            });
            return Err(self.fail(span, &request, started, error));
        };

        let value = self.transform(&span, &request, row).await;

        inner.cache.put(key, value.clone());
        self.cache_op("put");
        inner
            .telemetry
            .metrics()
            .set_gauge(CACHE_ENTRIES, &[], inner.cache.len() as f64);

        self.record(&request, "200", started);
        span.info(format!(
            "Request for {} completed in {:.3}s",
            request.describe(),
            started.elapsed().as_secs_f64()
        ));
        span.ok();
        Ok(self.body(&request, value, false))
    }

    async fn validate(
        &self,
        parent: &Span,
        request: &LogicRequest,
    ) -> Result<String, ServiceError> {
        let span = parent.child(request.validate_span());
        let began = Instant::now();
        pause(self.inner.chaos.latency(&self.inner.validation_latency)).await;
        self.inner.telemetry.metrics().observe(
            PROCESSING_TIME_SECONDS,
            &[("operation", "validation")],
            began.elapsed().as_secs_f64(),
        );
        match request.data_path() {
            Ok(path) => {
                span.debug(format!("Validated {}", request.describe()));
                span.ok();
                Ok(path)
            }
            Err(e) => {
                span.error(format!("Validation failed: {e}"));
                span.fail();
                Err(e)
            }
        }
    }

    async fn transform(&self, parent: &Span, request: &LogicRequest, row: Value) -> Value {
        let (name, operation) = request.transform();
        let span = parent.child(name);
        let began = Instant::now();
        pause(self.inner.chaos.latency(&self.inner.transform_latency)).await;
        let value = request.apply(row);
        self.inner.telemetry.metrics().observe(
            PROCESSING_TIME_SECONDS,
            &[("operation", operation)],
            began.elapsed().as_secs_f64(),
        );
        span.debug(format!("Applied {name} for {}", request.describe()));
        span.ok();
        value
    }

    /// Convert a data tier failure into this tier's error.
    fn downstream_failure(&self, request: &LogicRequest, error: DownstreamError) -> ServiceError {
        if error.is_not_found() {
            self.database_call("not_found");
            return ServiceError::NotFound {
                resource: request.resource(),
                id: request.id(),
            };
        }
        self.database_call("error");
        self.count_error(if error.is_timeout() {
            "database_timeout"
        } else {
            "database_error"
        });
        ServiceError::Downstream(error)
    }

    fn body(&self, request: &LogicRequest, value: Value, from_cache: bool) -> Value {
        let mut body = Map::new();
        body.insert("service".into(), Value::from(SERVICE_NAME));
        body.insert(request.payload_key().into(), value);
        body.insert("from_cache".into(), Value::from(from_cache));
        Value::Object(body)
    }

    fn record(&self, request: &LogicRequest, status: &str, started: Instant) {
        let metrics = self.inner.telemetry.metrics();
        metrics.increment_counter(
            REQUESTS_TOTAL,
            &[("method", "GET"), ("endpoint", request.endpoint()), ("status", status)],
        );
        metrics.observe(
            REQUEST_DURATION_SECONDS,
            &[("endpoint", request.endpoint())],
            started.elapsed().as_secs_f64(),
        );
    }

    fn fail(
        &self,
        span: Span,
        request: &LogicRequest,
        started: Instant,
        error: ServiceError,
    ) -> ServiceError {
        let status = error.status().as_u16().to_string();
        self.record(request, &status, started);
        span.error(format!("Error processing {}: {error}", request.describe()));
        span.fail();
        error
    }

    fn cache_op(&self, operation: &'static str) {
        self.inner
            .telemetry
            .metrics()
            .increment_counter(CACHE_OPERATIONS_TOTAL, &[("operation", operation)]);
    }

    fn database_call(&self, status: &'static str) {
        self.inner.telemetry.metrics().increment_counter(
            DATABASE_CALLS_TOTAL,
            &[("operation", "read"), ("status", status)],
        );
    }

    fn count_error(&self, kind: &'static str) {
        self.inner
            .telemetry
            .metrics()
            .increment_counter(ERRORS_TOTAL, &[("type", kind)]);
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

fn describe_metrics(telemetry: &Telemetry) {
    let m = telemetry.metrics();
    m.describe_counter(REQUESTS_TOTAL, "Total number of backend requests");
    m.describe_histogram(REQUEST_DURATION_SECONDS, "Backend request duration in seconds");
    m.describe_counter(DATABASE_CALLS_TOTAL, "Total number of database calls");
    m.describe_counter(CACHE_OPERATIONS_TOTAL, "Cache operations");
    m.describe_histogram(PROCESSING_TIME_SECONDS, "Time spent in business logic processing");
    m.describe_counter(ERRORS_TOTAL, "Total number of backend errors");
    m.describe_gauge(CACHE_ENTRIES, "Entries currently held in the response cache");
}

fn respond(result: Result<Value, ServiceError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => ErrorResponse::new(SERVICE_NAME, e).into_response(),
    }
}

async fn get_data(State(service): State<LogicService>, headers: HeaderMap) -> Response {
    respond(service.handle(&headers, LogicRequest::Data).await)
}

async fn get_user(
    State(service): State<LogicService>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    respond(service.handle(&headers, LogicRequest::User(id)).await)
}

async fn get_product(
    State(service): State<LogicService>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    respond(service.handle(&headers, LogicRequest::Product(id)).await)
}
