//! Monotonic time source (component J).
//!
//! The only contracts are monotonic non-decrease and millisecond
//! resolution; wall-time accuracy is only required for telemetry
//! timestamps, never for scheduling. Modeled as a trait so tests can
//! inject a [`FakeClock`] instead of the host clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since an implementation-defined epoch. Strictly
    /// non-decreasing within a boot.
    fn now_ms(&self) -> u64;
}

/// Host clock for the simulation backend, anchored to process start.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Deterministic clock for tests: advances only when told to.
pub struct FakeClock {
    millis: AtomicU64,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self { millis: AtomicU64::new(start_ms) }
    }

    /// Advances the clock by `delta_ms` and returns the new reading.
    pub fn advance(&self, delta_ms: u64) -> u64 {
        self.millis.fetch_add(delta_ms, Ordering::Relaxed) + delta_ms
    }

    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::Relaxed);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }
}
