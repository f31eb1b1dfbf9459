//! Edge service request handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value};

use super::{ACTIVE_USERS, ERRORS_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS, SERVICE_NAME};
use crate::config::schema::EdgeConfig;
use crate::error::{parse_id, ErrorResponse, ServiceError};
use crate::http::client::{DownstreamClient, DownstreamError};
use crate::http::routes::ops_router;
use crate::observability::{Span, Telemetry};

/// Name of the tier this service calls.
const LOGIC_SERVICE: &str = crate::logic::SERVICE_NAME;

/// Public routes of the edge service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRoute {
    Home,
    User(String),
    Product(String),
}

impl EdgeRoute {
    fn span_name(&self) -> &'static str {
        match self {
            EdgeRoute::Home => "frontend_home_request",
            EdgeRoute::User(_) => "frontend_get_user",
            EdgeRoute::Product(_) => "frontend_get_product",
        }
    }

    fn route(&self) -> &'static str {
        match self {
            EdgeRoute::Home => "/",
            EdgeRoute::User(_) => "/user/{id}",
            EdgeRoute::Product(_) => "/product/{id}",
        }
    }

    /// `endpoint` label on request metrics.
    pub fn endpoint(&self) -> &'static str {
        match self {
            EdgeRoute::Home => "/",
            EdgeRoute::User(_) => "/user",
            EdgeRoute::Product(_) => "/product",
        }
    }

    /// Concrete request path, e.g. `/user/7`.
    pub fn path(&self) -> String {
        match self {
            EdgeRoute::Home => "/".to_string(),
            EdgeRoute::User(id) => format!("/user/{id}"),
            EdgeRoute::Product(id) => format!("/product/{id}"),
        }
    }

    fn payload_key(&self) -> &'static str {
        match self {
            EdgeRoute::Home => "backend_response",
            EdgeRoute::User(_) => "user_data",
            EdgeRoute::Product(_) => "product_data",
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            EdgeRoute::Home => "data",
            EdgeRoute::User(_) => "user",
            EdgeRoute::Product(_) => "product",
        }
    }

    fn describe(&self) -> String {
        match self {
            EdgeRoute::Home => "home page".to_string(),
            EdgeRoute::User(id) => format!("user {id}"),
            EdgeRoute::Product(id) => format!("product {id}"),
        }
    }

    /// Validate the id and build the business-logic path.
    fn logic_path(&self) -> Result<String, ServiceError> {
        match self {
            EdgeRoute::Home => Ok("/api/data".to_string()),
            EdgeRoute::User(raw) => parse_id("user_id", raw).map(|id| format!("/api/user/{id}")),
            EdgeRoute::Product(raw) => {
                parse_id("product_id", raw).map(|id| format!("/api/product/{id}"))
            }
        }
    }

    fn id(&self) -> String {
        match self {
            EdgeRoute::Home => String::new(),
            EdgeRoute::User(id) | EdgeRoute::Product(id) => id.clone(),
        }
    }
}

struct Inner {
    telemetry: Telemetry,
    logic: DownstreamClient,
}

/// The edge tier: entry point for outside and generated traffic.
#[derive(Clone)]
pub struct EdgeService {
    inner: Arc<Inner>,
}

impl EdgeService {
    pub fn new(config: &EdgeConfig, telemetry: Telemetry) -> Result<Self, url::ParseError> {
        describe_metrics(&telemetry);
        let logic = DownstreamClient::new(
            LOGIC_SERVICE,
            &config.logic_url,
            Duration::from_millis(config.downstream_timeout_ms),
        )?;
        Ok(Self {
            inner: Arc::new(Inner { telemetry, logic }),
        })
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }

    /// Router with the public endpoints plus `/health` and `/metrics`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(home))
            .route("/user/{id}", get(get_user))
            .route("/product/{id}", get(get_product))
            .with_state(self.clone())
            .merge(ops_router(self.inner.telemetry.clone(), None))
    }

    /// Serve one request. Always starts a new trace: nothing outside the
    /// pipeline is trusted to supply a parent.
    pub async fn handle(&self, route: EdgeRoute) -> Result<Value, ServiceError> {
        let inner = &self.inner;
        let started = Instant::now();

        let mut span = inner.telemetry.start_span(route.span_name(), None);
        span.set_attribute("http.method", "GET");
        span.set_attribute("http.route", route.route());
        match &route {
            EdgeRoute::User(id) => span.set_attribute("user.id", id.as_str()),
            EdgeRoute::Product(id) => span.set_attribute("product.id", id.as_str()),
            EdgeRoute::Home => {}
        }
        span.info(format!("Fetching {}", route.describe()));

        let path = match route.logic_path() {
            Ok(path) => path,
            Err(e) => {
                self.count_error("invalid_request");
                return Err(self.fail(span, &route, started, e));
            }
        };

        let fetched = inner.logic.get_json(&path, span.context()).await;
        let payload = match fetched {
            Ok(payload) => payload,
            Err(e) => {
                let error = self.downstream_failure(&route, e);
                return Err(self.fail(span, &route, started, error));
            }
        };

        let duration = started.elapsed().as_secs_f64();
        self.record(&route, "200", duration);
        span.info(format!("Request for {} completed in {duration:.3}s", route.describe()));
        span.ok();

        let mut body = Map::new();
        body.insert("service".into(), Value::from(SERVICE_NAME));
        body.insert(route.payload_key().into(), payload);
        body.insert("duration".into(), Value::from(duration));
        Ok(Value::Object(body))
    }

    /// Set the simulated active-user gauge.
    pub fn set_active_users(&self, users: u64) {
        self.inner
            .telemetry
            .metrics()
            .set_gauge(ACTIVE_USERS, &[], users as f64);
    }

    fn downstream_failure(&self, route: &EdgeRoute, error: DownstreamError) -> ServiceError {
        if error.is_not_found() {
            return ServiceError::NotFound {
                resource: route.resource(),
                id: route.id(),
            };
        }
        self.count_error("backend_error");
        ServiceError::Downstream(error)
    }

    fn record(&self, route: &EdgeRoute, status: &str, duration: f64) {
        let metrics = self.inner.telemetry.metrics();
        metrics.increment_counter(
            REQUESTS_TOTAL,
            &[("method", "GET"), ("endpoint", route.endpoint()), ("status", status)],
        );
        metrics.observe(REQUEST_DURATION_SECONDS, &[("endpoint", route.endpoint())], duration);
    }

    fn fail(
        &self,
        span: Span,
        route: &EdgeRoute,
        started: Instant,
        error: ServiceError,
    ) -> ServiceError {
        let status = error.status().as_u16().to_string();
        self.record(route, &status, started.elapsed().as_secs_f64());
        span.error(format!("Error fetching {}: {error}", route.describe()));
        span.fail();
        error
    }

    fn count_error(&self, kind: &'static str) {
        self.inner
            .telemetry
            .metrics()
            .increment_counter(ERRORS_TOTAL, &[("type", kind)]);
    }
}

fn describe_metrics(telemetry: &Telemetry) {
    let m = telemetry.metrics();
    m.describe_counter(REQUESTS_TOTAL, "Total number of frontend requests");
    m.describe_histogram(REQUEST_DURATION_SECONDS, "Frontend request duration in seconds");
    m.describe_gauge(ACTIVE_USERS, "Number of active users");
    m.describe_counter(ERRORS_TOTAL, "Total number of frontend errors");
}

fn respond(result: Result<Value, ServiceError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => ErrorResponse::new(SERVICE_NAME, e).into_response(),
    }
}

async fn home(State(service): State<EdgeService>) -> Response {
    respond(service.handle(EdgeRoute::Home).await)
}

async fn get_user(State(service): State<EdgeService>, Path(id): Path<String>) -> Response {
    respond(service.handle(EdgeRoute::User(id)).await)
}

async fn get_product(State(service): State<EdgeService>, Path(id): Path<String>) -> Response {
    respond(service.handle(EdgeRoute::Product(id)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::sum_series;
    use crate::observability::{extract_context, MemoryExporter, SpanStatus};
    use axum::http::{HeaderMap, StatusCode};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn service(logic_url: &str) -> (EdgeService, MemoryExporter) {
        let sink = MemoryExporter::new();
        let config = EdgeConfig {
            logic_url: logic_url.to_string(),
            ..EdgeConfig::default()
        };
        let service = EdgeService::new(&config, Telemetry::for_tests(SERVICE_NAME, &sink)).unwrap();
        (service, sink)
    }

    #[tokio::test]
    async fn test_root_span_context_reaches_logic_tier() {
        // Echo back the traceparent the logic tier received.
        let router = Router::new().route(
            "/api/user/{id}",
            get(|headers: HeaderMap| async move {
                let ctx = extract_context(&headers).unwrap();
                Json(json!({
                    "trace_id": ctx.trace_id.to_string(),
                    "parent": ctx.span_id.to_string(),
                }))
            }),
        );
        let base = serve(router).await;
        let (service, sink) = service(&base);

        let body = service.handle(EdgeRoute::User("9".into())).await.unwrap();
        assert_eq!(body["service"], SERVICE_NAME);

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        let root = &spans[0];
        assert_eq!(root.name, "frontend_get_user");
        assert!(root.parent_span_id.is_none());
        assert_eq!(body["user_data"]["trace_id"], root.trace_id.to_string());
        assert_eq!(body["user_data"]["parent"], root.span_id.to_string());

        let text = service.telemetry().metrics().render();
        assert_eq!(
            sum_series(&text, REQUESTS_TOTAL, &["endpoint=\"/user\"", "status=\"200\""]),
            1.0
        );
    }

    #[tokio::test]
    async fn test_bad_id_never_reaches_logic_tier() {
        let (service, sink) = service("http://127.0.0.1:9");
        let err = service.handle(EdgeRoute::Product("x1".into())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(sink.spans()[0].status, SpanStatus::Error);

        let text = service.telemetry().metrics().render();
        assert_eq!(sum_series(&text, REQUESTS_TOTAL, &["status=\"400\""]), 1.0);
    }

    #[tokio::test]
    async fn test_logic_failure_counts_backend_error() {
        let router = Router::new().route(
            "/api/data",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(router).await;
        let (service, _sink) = service(&base);

        let err = service.handle(EdgeRoute::Home).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.origin(), LOGIC_SERVICE);

        let text = service.telemetry().metrics().render();
        assert_eq!(sum_series(&text, ERRORS_TOTAL, &["type=\"backend_error\""]), 1.0);
        assert_eq!(sum_series(&text, REQUESTS_TOTAL, &["status=\"502\""]), 1.0);
    }
}
