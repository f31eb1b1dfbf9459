//! Simulated query execution.
//!
//! # State Machine
//! ```text
//! TransactionBegin → QueryPlanning ─┬─ fault → rollback, Err(Fault)
//!                                   └─ QueryExecution [→ JoinInventory]
//!                                        ─┬─ no row → rollback, Err(NotFound)
//!                                         └─ TransactionCommit → Ok
//! ```
//!
//! Every phase is a child span of the hop span passed in by the handler and
//! sleeps for a latency drawn from its configured range. The slow-query
//! check compares the sum of the drawn latencies to the threshold, so a
//! fixed `Chaos` source yields an exact outcome.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use super::tables::{ProductView, Table, Tables};
use super::{SLOW_QUERIES_TOTAL, TRANSACTIONS_TOTAL};
use crate::config::schema::PhaseLatencies;
use crate::observability::{LogLevel, Span, Telemetry};
use crate::sim::{Chaos, LatencyRange};

/// A parsed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    General,
    User(u64),
    Product(u64),
}

impl Query {
    pub fn table(&self) -> Table {
        match self {
            Query::General => Table::General,
            Query::User(_) => Table::Users,
            Query::Product(_) => Table::Products,
        }
    }

    pub fn operation(&self) -> &'static str {
        "SELECT"
    }

    /// Key of the payload in the response body.
    pub fn payload_key(&self) -> &'static str {
        match self {
            Query::General => "result",
            Query::User(_) => "user",
            Query::Product(_) => "product",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("simulated failure on {} after planning", .table.as_str())]
    Fault { table: Table },

    #[error("no row {id} in {}", .table.as_str())]
    NotFound { table: Table, id: u64 },
}

/// Rows returned by a successful query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub value: Value,
    pub simulated: Duration,
    pub slow: bool,
}

pub struct QueryEngine {
    telemetry: Telemetry,
    tables: Arc<Tables>,
    chaos: Arc<dyn Chaos>,
    latency: PhaseLatencies,
    fault_probability: f64,
    slow_threshold: Duration,
}

impl QueryEngine {
    pub fn new(
        telemetry: Telemetry,
        tables: Arc<Tables>,
        chaos: Arc<dyn Chaos>,
        latency: PhaseLatencies,
        fault_probability: f64,
        slow_threshold: Duration,
    ) -> Self {
        Self {
            telemetry,
            tables,
            chaos,
            latency,
            fault_probability,
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Run `query` as a simulated transaction under `hop`.
    pub async fn execute(&self, query: Query, hop: &mut Span) -> Result<QueryResult, QueryError> {
        let table = query.table();
        hop.set_attribute("db.system", "postgresql");
        hop.set_attribute("db.operation", query.operation());
        hop.set_attribute("db.table", table.as_str());

        let mut simulated = Duration::ZERO;

        let (begin, took) = self
            .phase(hop, "transaction_begin", self.latency.transaction_begin)
            .await;
        simulated += took;
        self.transaction("begin");
        begin.debug("Transaction started");
        begin.ok();

        let (planning, took) = self.phase(hop, "query_planning", self.latency.planning).await;
        simulated += took;
        planning.debug(format!("Query plan generated for {}", table.as_str()));
        planning.ok();

        if self.chaos.chance(self.fault_probability) {
            self.transaction("rollback");
            hop.set_attribute("query.simulated_ms", millis(simulated));
            hop.error(format!(
                "Query failed on {}: simulated fault after planning",
                table.as_str()
            ));
            return Err(QueryError::Fault { table });
        }

        let (mut execution, took) = self
            .phase(hop, "query_execution", self.latency.execution)
            .await;
        simulated += took;
        execution.set_attribute("db.table", table.as_str());
        execution.set_attribute("query.simulated_ms", millis(took));

        let rows = match query {
            Query::General => Some(json!({
                "rows": self.chaos.between(1, 100),
                "data": {
                    "id": self.chaos.between(1, 1000),
                    "value": format!("data_{}", self.chaos.between(1, 100)),
                },
            })),
            Query::User(id) => self.tables.user(id).and_then(|u| serde_json::to_value(u).ok()),
            Query::Product(id) => match (self.tables.product(id), self.tables.inventory(id)) {
                (Some(product), Some(inventory)) => {
                    let (join, took) = self
                        .phase(&execution, "join_inventory", self.latency.join)
                        .await;
                    simulated += took;
                    join.debug(format!("Joined product {id} with inventory data"));
                    join.ok();
                    serde_json::to_value(ProductView::join(product, inventory)).ok()
                }
                _ => None,
            },
        };
        execution.ok();

        let Some(value) = rows else {
            self.transaction("rollback");
            self.check_slow(hop, table, simulated);
            hop.set_attribute("query.simulated_ms", millis(simulated));
            let id = match query {
                Query::User(id) | Query::Product(id) => id,
                Query::General => 0,
            };
            return Err(QueryError::NotFound { table, id });
        };

        let (commit, took) = self
            .phase(hop, "transaction_commit", self.latency.transaction_commit)
            .await;
        simulated += took;
        self.transaction("commit");
        commit.debug("Transaction committed");
        commit.ok();

        let slow = self.check_slow(hop, table, simulated);
        hop.set_attribute("query.simulated_ms", millis(simulated));
        Ok(QueryResult {
            value,
            simulated,
            slow,
        })
    }

    async fn phase(
        &self,
        parent: &Span,
        name: &'static str,
        range: LatencyRange,
    ) -> (Span, Duration) {
        let span = parent.child(name);
        let took = self.chaos.latency(&range);
        if !took.is_zero() {
            tokio::time::sleep(took).await;
        }
        (span, took)
    }

    fn transaction(&self, status: &'static str) {
        self.telemetry
            .metrics()
            .increment_counter(TRANSACTIONS_TOTAL, &[("status", status)]);
    }

    fn check_slow(&self, hop: &Span, table: Table, simulated: Duration) -> bool {
        if simulated <= self.slow_threshold {
            return false;
        }
        self.telemetry
            .metrics()
            .increment_counter(SLOW_QUERIES_TOTAL, &[("table", table.as_str())]);
        hop.log(
            LogLevel::Warn,
            format!(
                "Slow query detected on {}: {:.3}s",
                table.as_str(),
                simulated.as_secs_f64()
            ),
            &[
                ("table", table.as_str().to_string()),
                ("duration_ms", format!("{:.1}", simulated.as_secs_f64() * 1000.0)),
            ],
        );
        true
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
