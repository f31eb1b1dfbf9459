//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Telemetry per tier → Bind listeners → Spawn servers
//!     → Spawn traffic generator (edge only)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → servers stop accepting, drain
//!     → traffic generator stops → all joined
//!     → exporter-only broadcast → exporter workers flush → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: data tier first, edge last, so callers find callees up
//! - One broadcast channel reaches the servers and the traffic generator
//! - Exporters listen on a second channel that `Pipeline::wait` fires only
//!   after the servers and the generator have joined, so spans closed during
//!   drain still ship

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{build_telemetry, start, Pipeline, Role, StartupError};
