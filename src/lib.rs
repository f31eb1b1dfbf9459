//! Three-tier telemetry demo pipeline library.
//!
//! Edge, business-logic and data services that propagate W3C trace context,
//! emit spans, correlated logs and Prometheus metrics at every hop.

pub mod cache;
pub mod config;
pub mod data;
pub mod edge;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod logic;
pub mod observability;
pub mod sim;

pub use config::schema::PipelineConfig;
pub use http::HttpServer;
pub use lifecycle::{Role, Shutdown};
pub use observability::Telemetry;
