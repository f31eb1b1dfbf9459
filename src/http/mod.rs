//! HTTP plumbing shared by the three tiers.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     TCP connection
//!     → server.rs (request id, access log, timeout)
//!     → tier router (edge | logic | data handlers)
//!     → routes.rs (/health, /metrics)
//!
//! Outbound:
//!     tier handler
//!     → client.rs (traceparent injected, bounded by timeout)
//!     → next tier
//! ```

pub mod client;
pub mod routes;
pub mod server;

pub use client::{DownstreamClient, DownstreamError};
pub use routes::{ops_router, ScrapeHook};
pub use server::HttpServer;
