//! Clock abstractions so time-based policies can be tested deterministically.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds.
///
/// Policies take a `Clock` instead of reading time directly so tests can
/// advance time by hand instead of sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by `Instant`, relative to its own creation.
///
/// Used by the circuit breaker, which only measures elapsed time and must not
/// jump when the wall clock is adjusted.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Wall clock reporting milliseconds since the Unix epoch.
///
/// The rate limiter aligns its windows on epoch time so every process
/// computes the same window index for the same instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
