//! Data tier: a simulated database.
//!
//! # Data Flow
//! ```text
//! GET /db/{query | user/{id} | product/{id}}
//!     → handlers.rs (extract traceparent, hop span, id validation)
//!     → query.rs    (begin → planning → execution [→ join] → commit)
//!     → tables.rs   (read-only rows generated at startup)
//!     → JSON row, or an error body with origin "local"
//! ```
//!
//! # Design Decisions
//! - Rows never change after startup; transactions are timing and
//!   telemetry only
//! - Fault injection happens after planning, so failed queries still show
//!   the begin and planning spans

pub mod handlers;
pub mod query;
pub mod tables;

pub use handlers::{DataRequest, DataService};
pub use query::{Query, QueryEngine, QueryError, QueryResult};
pub use tables::{Table, Tables};

pub const SERVICE_NAME: &str = "database-service";

pub const QUERIES_TOTAL: &str = "database_queries_total";
pub const QUERY_DURATION_SECONDS: &str = "database_query_duration_seconds";
pub const CONNECTION_POOL_ACTIVE: &str = "database_connection_pool_active";
pub const SLOW_QUERIES_TOTAL: &str = "database_slow_queries_total";
pub const TABLE_SIZE_BYTES: &str = "database_table_size_bytes";
pub const TRANSACTIONS_TOTAL: &str = "database_transactions_total";
