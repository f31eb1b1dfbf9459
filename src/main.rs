//! Three-tier telemetry demo pipeline (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────────┐
//!                 │                         PIPELINE                             │
//!                 │                                                              │
//!   Client /      │  ┌───────────┐ traceparent ┌───────────┐ traceparent ┌──────┐│
//!   traffic gen ──┼─▶│   edge    │────────────▶│   logic   │────────────▶│ data ││
//!                 │  │ :8001     │             │ :8002     │             │:8003 ││
//!                 │  └───────────┘             │ TTL cache │             └──────┘│
//!                 │                            └───────────┘                     │
//!                 │                                                              │
//!                 │  Every tier: spans → OTLP, logs → Loki, /metrics, /health    │
//!                 └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Run one tier per process (`edge`, `logic`, `data`) or all three with `all`.

use std::path::PathBuf;

use clap::Parser;

use tiered_telemetry::config::load_or_default;
use tiered_telemetry::lifecycle::{start, wait_for_signal, Role, Shutdown};
use tiered_telemetry::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "tiered-telemetry")]
#[command(about = "Three-tier service pipeline with end-to-end telemetry", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tier(s) to run in this process.
    #[arg(value_enum, default_value = "all")]
    role: Role,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Loading validates; every semantic error is reported at once.
    let config = load_or_default(cli.config.as_deref())?;
    init_logging(&config.telemetry.logging);

    tracing::info!("tiered-telemetry v0.1.0 starting");
    tracing::info!(
        role = ?cli.role,
        edge = %config.edge.bind_address,
        logic = %config.logic.bind_address,
        data = %config.data.bind_address,
        traffic = config.edge.traffic.enabled,
        seed = ?config.simulation.seed,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let pipeline = start(config, cli.role, &shutdown).await?;

    let signal = wait_for_signal().await;
    tracing::info!(signal, "Shutdown requested");
    shutdown.trigger();
    pipeline.wait().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
