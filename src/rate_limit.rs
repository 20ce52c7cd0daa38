//! Fixed-window rate limiting over a shared counter store.
//!
//! Architecture:
//! - [`CounterStore`] (in `store`) is the adapter to the shared external
//!   store; its one essential operation is an atomic increment-and-expire.
//! - [`FallbackCounter`] (in `memory`) is the process-local counter used when
//!   the store is unreachable.
//! - [`RateLimiter`] computes allow/deny decisions per key, consulting either
//!   backend transparently.
//! - [`RateLimitLayer`] (in `middleware`) is the tower middleware exposing
//!   decisions as the HTTP 429 contract.
//! - `routes` maps request paths to categories and quotas; `keys` derives the
//!   per-caller, per-endpoint key.
//!
//! The window is fixed, not sliding: time is divided into equal intervals of
//! `window` and the counter resets at every boundary. A burst straddling a
//! boundary can see up to twice the limit; that tradeoff buys a single
//! atomic store-side operation, which is what keeps concurrent increments
//! from many processes correct.

pub mod keys;
pub mod memory;
pub mod middleware;
pub mod routes;
pub mod store;

pub use keys::{client_identity, rate_limit_key, CallerId};
pub use memory::FallbackCounter;
pub use middleware::{RateLimitLayer, RateLimitService};
pub use routes::{PathPattern, RouteCategory, RoutePolicy};
pub use store::{CounterStore, RedisCounterStore, StoreError};

use crate::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Maximum requests per window, or the unbounded sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limit {
    Bounded(u32),
    Unlimited,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    pub fn bound(&self) -> Option<u32> {
        match self {
            Limit::Bounded(max) => Some(*max),
            Limit::Unlimited => None,
        }
    }
}

/// Errors produced when validating a quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    /// A bounded quota needs a positive window.
    ZeroWindow,
}

impl std::fmt::Display for QuotaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaError::ZeroWindow => write!(f, "window must be > 0 for a bounded quota"),
        }
    }
}

impl std::error::Error for QuotaError {}

/// Rate limit configuration for one key: window length, request budget, and
/// an optional operator-facing denial message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    window: Duration,
    max: Limit,
    #[serde(default)]
    message: Option<String>,
}

impl Quota {
    /// Bounded quota of `max` requests per `window`. The window must be
    /// positive.
    pub fn per_window(max: u32, window: Duration) -> Result<Self, QuotaError> {
        if window.is_zero() {
            return Err(QuotaError::ZeroWindow);
        }
        Ok(Self { window, max: Limit::Bounded(max), message: None })
    }

    /// Quota that never denies; counting is skipped entirely.
    pub fn unlimited() -> Self {
        Self { window: Duration::ZERO, max: Limit::Unlimited, message: None }
    }

    pub(crate) fn unchecked(window: Duration, max: Limit, message: Option<&str>) -> Self {
        Self { window, max, message: message.map(str::to_string) }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Replace the request budget, keeping window and message.
    pub fn with_limit(mut self, max: Limit) -> Self {
        self.max = max;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max(&self) -> Limit {
        self.max
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_unlimited(&self) -> bool {
        self.max.is_unlimited()
    }
}

/// Outcome of a rate limit check. Denial is data, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: Limit,
    /// Post-increment count inside the current window.
    pub current: u64,
    /// Requests left in the window, saturating at zero.
    pub remaining: u64,
    /// Next window boundary, in epoch milliseconds.
    pub reset_at_ms: u64,
    /// Time until the window resets; present iff the request was denied.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn exempt(now_ms: u64) -> Self {
        Self {
            allowed: true,
            limit: Limit::Unlimited,
            current: 0,
            remaining: u64::MAX,
            reset_at_ms: now_ms,
            retry_after: None,
        }
    }
}

/// Fixed-window rate limiter over a shared counter store, with an in-process
/// fallback when the store is unreachable.
///
/// Construct one instance at startup and inject it where requests are
/// handled; the limiter holds no global state.
///
/// The fallback only sees this process's traffic, so while the store is down
/// a deployment of N instances effectively multiplies every limit by N. That
/// degradation is deliberate: limiter infrastructure failures must not take
/// the API down with them.
#[derive(Debug)]
pub struct RateLimiter<S> {
    store: Option<Arc<S>>,
    fallback: FallbackCounter,
    clock: Arc<dyn Clock>,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Limiter backed by a shared counter store.
    pub fn new(store: S) -> Self {
        Self {
            store: Some(Arc::new(store)),
            fallback: FallbackCounter::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Limiter using only the process-local counter. Suitable for tests and
    /// single-instance deployments.
    pub fn in_process() -> Self {
        Self {
            store: None,
            fallback: FallbackCounter::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace the fallback counter, e.g. to adjust its capacity.
    pub fn with_fallback(mut self, fallback: FallbackCounter) -> Self {
        self.fallback = fallback;
        self
    }

    /// Decide whether the request identified by `key` fits inside `quota`.
    ///
    /// Never fails: store errors are logged and recovered by counting
    /// in-process instead.
    pub async fn check(&self, key: &str, quota: &Quota) -> RateLimitDecision {
        let now_ms = self.clock.now_millis();
        let Limit::Bounded(max) = quota.max() else {
            return RateLimitDecision::exempt(now_ms);
        };
        let window_ms = quota.window().as_millis() as u64;
        if window_ms == 0 {
            return RateLimitDecision::exempt(now_ms);
        }

        let window_index = now_ms / window_ms;
        let reset_at_ms = (window_index + 1) * window_ms;
        let ttl = Duration::from_millis(reset_at_ms - now_ms);
        let counter_key = format!("{}:{}", key, window_index);

        let current = match &self.store {
            Some(store) => match store.increment(&counter_key, ttl).await {
                Ok(count) => count,
                Err(error) => {
                    tracing::warn!(
                        target: "breakwater::rate_limit",
                        %error,
                        key,
                        "counter store unavailable, falling back to in-process counting"
                    );
                    self.fallback.increment(key, window_index, now_ms, reset_at_ms)
                }
            },
            None => self.fallback.increment(key, window_index, now_ms, reset_at_ms),
        };

        let max = u64::from(max);
        let allowed = current <= max;
        let retry_after = if allowed {
            None
        } else {
            Some(Duration::from_millis(reset_at_ms.saturating_sub(now_ms)))
        };

        RateLimitDecision {
            allowed,
            limit: quota.max(),
            current,
            remaining: max.saturating_sub(current),
            reset_at_ms,
            retry_after,
        }
    }

    /// Whether the shared store is configured and answering.
    pub async fn store_healthy(&self) -> bool {
        match &self.store {
            Some(store) => store.ping().await.is_ok(),
            None => false,
        }
    }
}
