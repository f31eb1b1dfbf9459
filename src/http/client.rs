//! Outbound calls to the next tier.
//!
//! # Responsibilities
//! - Issue GET requests with the caller's trace context injected
//! - Bound the whole exchange (connect, headers, body) by one timeout
//! - Classify failures without leaking the callee's raw body upward

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use thiserror::Error;

use crate::error::{ErrorBody, ORIGIN_LOCAL};
use crate::observability::context::{inject_into, TraceContext};

/// Largest response body accepted from a downstream tier.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("{service} did not answer within {timeout:?}")]
    Timeout { service: &'static str, timeout: Duration },

    #[error("{service} unreachable: {reason}")]
    Unreachable { service: &'static str, reason: String },

    #[error("{service} returned {status}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: Option<ErrorBody>,
    },

    #[error("{service} sent an unreadable body: {reason}")]
    InvalidBody { service: &'static str, reason: String },
}

impl DownstreamError {
    pub fn service(&self) -> &'static str {
        match self {
            DownstreamError::Timeout { service, .. }
            | DownstreamError::Unreachable { service, .. }
            | DownstreamError::Status { service, .. }
            | DownstreamError::InvalidBody { service, .. } => service,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DownstreamError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DownstreamError::Timeout { .. })
    }

    /// The tier where the failure started.
    pub fn origin(&self) -> String {
        match self {
            DownstreamError::Status { body: Some(body), .. } => {
                if body.origin == ORIGIN_LOCAL {
                    body.service.clone()
                } else {
                    body.origin.clone()
                }
            }
            other => other.service().to_string(),
        }
    }
}

/// HTTP client bound to one downstream tier.
#[derive(Clone)]
pub struct DownstreamClient {
    client: Client<HttpConnector, Body>,
    base_url: String,
    service: &'static str,
    timeout: Duration,
}

impl DownstreamClient {
    /// `base_url` is the tier's root, e.g. `http://127.0.0.1:8003`.
    pub fn new(
        service: &'static str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(base_url)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            service,
            timeout,
        })
    }

    /// GET `path` and decode a JSON body, carrying `context` as `traceparent`.
    pub async fn get_json(
        &self,
        path: &str,
        context: &TraceContext,
    ) -> Result<Value, DownstreamError> {
        let uri: Uri = format!("{}{}", self.base_url, path)
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| self.unreachable(e))?;

        let mut request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| self.unreachable(e))?;
        inject_into(context, request.headers_mut());

        let exchange = async {
            let response = self.client.request(request).await.map_err(|e| self.unreachable(e))?;
            let status = response.status();
            let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_BODY_BYTES)
                .await
                .map_err(|e| DownstreamError::InvalidBody {
                    service: self.service,
                    reason: e.to_string(),
                })?;
            Ok::<_, DownstreamError>((status, bytes))
        };

        let (status, bytes) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DownstreamError::Timeout {
                    service: self.service,
                    timeout: self.timeout,
                })
            }
        };

        if !status.is_success() {
            return Err(DownstreamError::Status {
                service: self.service,
                status,
                body: serde_json::from_slice(&bytes).ok(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| DownstreamError::InvalidBody {
            service: self.service,
            reason: e.to_string(),
        })
    }

    fn unreachable(&self, e: impl std::fmt::Display) -> DownstreamError {
        DownstreamError::Unreachable {
            service: self.service,
            reason: e.to_string(),
        }
    }
}

impl std::fmt::Debug for DownstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamClient")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::TRACEPARENT;
    use axum::{http::HeaderMap, routing::get, Json, Router};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_traceparent_is_injected() {
        let router = Router::new().route(
            "/echo",
            get(|headers: HeaderMap| async move {
                let tp = headers
                    .get(TRACEPARENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(serde_json::json!({ "traceparent": tp }))
            }),
        );
        let base = serve(router).await;
        let client = DownstreamClient::new("echo-service", &base, Duration::from_secs(2)).unwrap();

        let ctx = TraceContext::new_root();
        let body = client.get_json("/echo", &ctx).await.unwrap();
        assert_eq!(body["traceparent"], ctx.to_traceparent());
    }

    #[tokio::test]
    async fn test_slow_callee_times_out() {
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "late"
            }),
        );
        let base = serve(router).await;
        let client =
            DownstreamClient::new("slow-service", &base, Duration::from_millis(50)).unwrap();

        let err = client.get_json("/slow", &TraceContext::new_root()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.origin(), "slow-service");
    }

    #[tokio::test]
    async fn test_error_status_keeps_structured_body() {
        let router = Router::new().route(
            "/fail",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: "simulated_fault".into(),
                        message: "simulated query fault".into(),
                        service: "database-service".into(),
                        origin: "local".into(),
                    }),
                )
            }),
        );
        let base = serve(router).await;
        let client =
            DownstreamClient::new("database-service", &base, Duration::from_secs(2)).unwrap();

        let err = client.get_json("/fail", &TraceContext::new_root()).await.unwrap_err();
        match &err {
            DownstreamError::Status { status, body, .. } => {
                assert_eq!(*status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.as_ref().map(|b| b.error.as_str()), Some("simulated_fault"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.origin(), "database-service");
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            DownstreamClient::new("gone-service", &format!("http://{addr}"), Duration::from_secs(2))
                .unwrap();
        let err = client.get_json("/", &TraceContext::new_root()).await.unwrap_err();
        assert!(matches!(err, DownstreamError::Unreachable { .. }));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(DownstreamClient::new("x", "not a url", Duration::from_secs(1)).is_err());
    }
}
