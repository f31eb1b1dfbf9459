//! Simulation primitives.
//!
//! # Data Flow
//! ```text
//! config [simulation] seed
//!     → chaos.rs (ThreadChaos | SeededChaos | FixedChaos)
//!     → fault checks, latency draws, traffic path selection
//!
//! clock.rs (SystemClock | ManualClock)
//!     → cache freshness checks
//! ```
//!
//! # Design Decisions
//! - Every source of nondeterminism sits behind a trait object
//! - Latencies are drawn once and then slept; telemetry decisions use the
//!   drawn value so a fixed source gives exact outcomes

pub mod chaos;
pub mod clock;

pub use chaos::{Chaos, FixedChaos, LatencyRange, SeededChaos, ThreadChaos};
pub use clock::{Clock, ManualClock, SystemClock};

use std::sync::Arc;

/// Build the chaos source for a process from an optional seed.
pub fn chaos_from_seed(seed: Option<u64>) -> Arc<dyn Chaos> {
    match seed {
        Some(seed) => Arc::new(SeededChaos::new(seed)),
        None => Arc::new(ThreadChaos),
    }
}
