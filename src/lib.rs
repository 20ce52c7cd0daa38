#![forbid(unsafe_code)]

//! # Breakwater
//!
//! Traffic control and resilience primitives for multi-tenant web services:
//! a distributed fixed-window rate limiter backed by a shared counter store
//! (with an in-process fallback), a circuit breaker, an exponential-backoff
//! retry executor, a call debouncer, and a timeout guard.
//!
//! ## Design
//!
//! - **Fail open on infrastructure, fail closed on limits.** When the shared
//!   counter store is unreachable the limiter logs a warning and counts
//!   in-process; an exceeded limit always denies.
//! - **Denial is data.** Rate limit checks return a structured decision,
//!   never an error. The HTTP 429 contract lives in the tower middleware.
//! - **Errors keep their identity.** Retry exhaustion returns the original
//!   error unchanged; policies wrap failures as [`PolicyError::Inner`] so
//!   callers can still branch on their own taxonomy via [`ErrorClass`].
//! - **No hidden singletons.** Limiters, breakers, and stacks are explicit
//!   values constructed at startup and injected where they are used.
//!
//! ## Quick start
//!
//! ```rust
//! use breakwater::{CircuitBreakerPolicy, ErrorClass, PolicyStack};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct UpstreamError;
//! impl std::fmt::Display for UpstreamError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "upstream unavailable")
//!     }
//! }
//! impl std::error::Error for UpstreamError {}
//! impl ErrorClass for UpstreamError {
//!     fn is_external_dependency(&self) -> bool { true }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30)).unwrap();
//! let stack = PolicyStack::<UpstreamError>::builder()
//!     .timeout(Duration::from_secs(10))
//!     .circuit_breaker(breaker)
//!     .build();
//!
//! let result = stack.execute(|| async { Ok::<_, UpstreamError>("response") }).await;
//! assert_eq!(result.unwrap(), "response");
//! # });
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod debounce;
pub mod error;
pub mod jitter;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod stack;
pub mod timeout;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use circuit_breaker::{CircuitBreakerError, CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use debounce::Debouncer;
pub use error::{is_transient, ErrorClass, PolicyError};
pub use jitter::Jitter;
pub use rate_limit::{
    CallerId, CounterStore, FallbackCounter, Limit, Quota, QuotaError, RateLimitDecision,
    RateLimitLayer, RateLimiter, RedisCounterStore, RouteCategory, RoutePolicy, StoreError,
};
pub use retry::{RetryConfigError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{PolicyStack, PolicyStackBuilder};
pub use timeout::TimeoutPolicy;
