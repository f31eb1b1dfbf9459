//! Autonomous traffic generator.
//!
//! # Responsibilities
//! - Issue requests through the edge service's own handler at random intervals
//! - Spread requests across home, user and product routes
//! - Move the simulated active-user gauge each iteration
//!
//! # Design Decisions
//! - Runs as its own task; it never holds a request-serving slot
//! - Shutdown is checked before every request, so none starts once the
//!   signal has fired; a request already in flight finishes and closes its span

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use super::handlers::{EdgeRoute, EdgeService};
use crate::config::schema::TrafficConfig;
use crate::sim::Chaos;

pub struct TrafficGenerator {
    edge: EdgeService,
    chaos: Arc<dyn Chaos>,
    config: TrafficConfig,
}

impl TrafficGenerator {
    pub fn new(edge: EdgeService, chaos: Arc<dyn Chaos>, config: TrafficConfig) -> Self {
        Self { edge, chaos, config }
    }

    /// Pick the next route to exercise.
    pub fn next_route(&self) -> EdgeRoute {
        match self.chaos.pick(3) {
            0 => EdgeRoute::Home,
            1 => EdgeRoute::User(self.chaos.between(1, self.config.max_user_id).to_string()),
            _ => EdgeRoute::Product(self.chaos.between(1, self.config.max_product_id).to_string()),
        }
    }

    /// Generate traffic until `shutdown` fires. Returns the number of
    /// requests issued.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        tracing::info!(
            startup_delay_ms = self.config.startup_delay_ms,
            min_interval_ms = self.config.interval.min_ms,
            max_interval_ms = self.config.interval.max_ms,
            "Traffic generator starting"
        );

        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!("Traffic generator stopped before first request");
                return 0;
            }
            _ = tokio::time::sleep(Duration::from_millis(self.config.startup_delay_ms)) => {}
        }

        let mut issued = 0u64;
        loop {
            self.edge.set_active_users(
                self.chaos
                    .between(self.config.active_users_min, self.config.active_users_max),
            );

            let route = self.next_route();
            let status = match self.edge.handle(route.clone()).await {
                Ok(_) => 200,
                Err(e) => e.status().as_u16(),
            };
            issued += 1;
            tracing::debug!(path = %route.path(), status, "Traffic simulation request");

            let pause = self.chaos.latency(&self.config.interval);
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(issued, "Traffic generator stopped");
        issued
    }
}
