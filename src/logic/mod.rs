//! Business-logic tier.
//!
//! # Data Flow
//! ```text
//! GET /api/{data | user/{id} | product/{id}}
//!     → extract traceparent, hop span
//!     → simulated internal fault?        → 500, span ERROR
//!     → cache lookup (hit | miss)        → hit: return cached value
//!     → validate_<resource> span         → bad id: 400
//!     → data tier call (traceparent = hop span)
//!     → transform span (pricing | enrichment | summary)
//!     → cache put, respond
//! ```
//!
//! # Design Decisions
//! - Cache outcome is always counted and logged before the request moves on
//! - Data tier failures are re-signalled as this tier's own errors; a 404
//!   stays a 404, anything else becomes a gateway error

pub mod handlers;
pub mod transform;

pub use handlers::{LogicRequest, LogicService};

pub const SERVICE_NAME: &str = "backend-service";

pub const REQUESTS_TOTAL: &str = "backend_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "backend_request_duration_seconds";
pub const DATABASE_CALLS_TOTAL: &str = "backend_database_calls_total";
pub const CACHE_OPERATIONS_TOTAL: &str = "backend_cache_operations_total";
pub const PROCESSING_TIME_SECONDS: &str = "backend_processing_time_seconds";
pub const ERRORS_TOTAL: &str = "backend_errors_total";
pub const CACHE_ENTRIES: &str = "backend_cache_entries";
