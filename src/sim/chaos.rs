//! Pluggable randomness for fault and latency injection.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Source of uniform samples in `[0, 1)`.
pub trait Chaos: Send + Sync {
    /// Draw the next sample.
    fn sample(&self) -> f64;

    /// True with probability `p`. `p <= 0` never fires, `p >= 1` always does.
    ///
    /// Fires on the upper tail of the sample, so a low fixed sample is calm
    /// and a high one is faulty.
    fn chance(&self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        self.sample() >= 1.0 - p
    }

    /// Draw a latency from `range`.
    fn latency(&self, range: &LatencyRange) -> Duration {
        let span = range.max_ms.saturating_sub(range.min_ms) as f64;
        let ms = range.min_ms as f64 + span * self.sample();
        Duration::from_secs_f64(ms / 1000.0)
    }

    /// Pick an index in `0..len`. Returns 0 for an empty range.
    fn pick(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        ((self.sample() * len as f64) as usize).min(len - 1)
    }

    /// Pick an integer in `min..=max`. Valid for the full `u64` range.
    fn between(&self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        let width = max - min;
        let offset = (self.sample() * (width as f64 + 1.0)) as u64;
        min + offset.min(width)
    }
}

/// Inclusive latency range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub const ZERO: LatencyRange = LatencyRange { min_ms: 0, max_ms: 0 };

    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn is_valid(&self) -> bool {
        self.min_ms <= self.max_ms
    }
}

impl Default for LatencyRange {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Thread-local fast generator. Default for real runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadChaos;

impl Chaos for ThreadChaos {
    fn sample(&self) -> f64 {
        fastrand::f64()
    }
}

/// Reproducible generator seeded from config.
#[derive(Debug)]
pub struct SeededChaos {
    rng: Mutex<StdRng>,
}

impl SeededChaos {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Chaos for SeededChaos {
    fn sample(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen::<f64>()
    }
}

/// Always returns the same sample. Used by tests to pin outcomes.
#[derive(Debug, Clone, Copy)]
pub struct FixedChaos(pub f64);

impl FixedChaos {
    /// Never fires a fault, always draws the minimum latency.
    pub fn calm() -> Self {
        Self(0.0)
    }

    /// Always fires a fault with any positive probability, draws maximum latency.
    pub fn stormy() -> Self {
        Self(0.999_999)
    }
}

impl Chaos for FixedChaos {
    fn sample(&self) -> f64 {
        self.0.clamp(0.0, 0.999_999)
    }
}
