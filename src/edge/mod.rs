//! Edge tier: the pipeline's entry point.
//!
//! # Data Flow
//! ```text
//! GET / | /user/{id} | /product/{id}        TrafficGenerator (own task)
//!     → handlers.rs (root span, id check)  ←──────┘
//!     → business-logic call (traceparent = root span)
//!     → { service, <payload>, duration } or an error body
//! ```

pub mod handlers;
pub mod traffic;

pub use handlers::{EdgeRoute, EdgeService};
pub use traffic::TrafficGenerator;

pub const SERVICE_NAME: &str = "frontend-service";

pub const REQUESTS_TOTAL: &str = "frontend_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "frontend_request_duration_seconds";
pub const ACTIVE_USERS: &str = "frontend_active_users";
pub const ERRORS_TOTAL: &str = "frontend_errors_total";
