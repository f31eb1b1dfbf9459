//! Service error kinds and their HTTP mapping.
//!
//! # Design Decisions
//! - Each tier converts a callee failure into its own `ServiceError` at the
//!   call boundary; raw downstream bodies are never forwarded
//! - `origin` in the body names the tier where the failure started, so a
//!   client can tell "this service failed" from "something behind it failed"

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::client::DownstreamError;

pub const ORIGIN_LOCAL: &str = "local";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("simulated {0} fault")]
    SimulatedFault(&'static str),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::SimulatedFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Downstream(DownstreamError::Timeout { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ServiceError::Downstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable kind string used in error bodies and `type` labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "validation_error",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::SimulatedFault(_) => "simulated_fault",
            ServiceError::Downstream(DownstreamError::Timeout { .. }) => "downstream_timeout",
            ServiceError::Downstream(_) => "downstream_error",
        }
    }

    /// Where the failure started: `local`, or the name of the tier behind us.
    pub fn origin(&self) -> String {
        match self {
            ServiceError::Downstream(e) => e.origin(),
            _ => ORIGIN_LOCAL.to_string(),
        }
    }
}

/// Parse a positive numeric id taken from a request path.
pub fn parse_id(field: &'static str, raw: &str) -> Result<u64, ServiceError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(ServiceError::Validation {
            field,
            reason: "must be positive".into(),
        }),
        Ok(id) => Ok(id),
        Err(e) => Err(ServiceError::Validation {
            field,
            reason: e.to_string(),
        }),
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub service: String,
    pub origin: String,
}

/// A `ServiceError` rendered on behalf of `service`.
#[derive(Debug)]
pub struct ErrorResponse {
    pub service: &'static str,
    pub error: ServiceError,
}

impl ErrorResponse {
    pub fn new(service: &'static str, error: ServiceError) -> Self {
        Self { service, error }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error.kind().to_string(),
            message: self.error.to_string(),
            service: self.service.to_string(),
            origin: self.error.origin(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.error.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let validation = ServiceError::Validation {
            field: "user_id",
            reason: "not a number".into(),
        };
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let missing = ServiceError::NotFound { resource: "user", id: "5000".into() };
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        assert_eq!(
            ServiceError::SimulatedFault("internal").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let timeout = ServiceError::Downstream(DownstreamError::Timeout {
            service: "database-service",
            timeout: Duration::from_millis(50),
        });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.kind(), "downstream_timeout");

        let refused = ServiceError::Downstream(DownstreamError::Unreachable {
            service: "database-service",
            reason: "connection refused".into(),
        });
        assert_eq!(refused.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("user_id", "123").unwrap(), 123);
        assert!(matches!(parse_id("user_id", "0"), Err(ServiceError::Validation { .. })));
        assert!(matches!(parse_id("user_id", "-4"), Err(ServiceError::Validation { .. })));
        assert!(matches!(
            parse_id("product_id", "abc"),
            Err(ServiceError::Validation { field: "product_id", .. })
        ));
    }

    #[test]
    fn test_origin_follows_root_cause() {
        let local = ErrorResponse::new("backend-service", ServiceError::SimulatedFault("internal"));
        assert_eq!(local.body().origin, "local");

        // The business tier reported a failure that began in the data tier.
        let nested = ServiceError::Downstream(DownstreamError::Status {
            service: "backend-service",
            status: StatusCode::BAD_GATEWAY,
            body: Some(ErrorBody {
                error: "downstream_error".into(),
                message: "database-service returned 500".into(),
                service: "backend-service".into(),
                origin: "database-service".into(),
            }),
        });
        let body = ErrorResponse::new("frontend-service", nested).body();
        assert_eq!(body.service, "frontend-service");
        assert_eq!(body.origin, "database-service");
        assert_eq!(body.error, "downstream_error");
    }
}
