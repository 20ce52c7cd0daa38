//! Retry policy for fallible async operations.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - The retry predicate decides whether a failure is worth another attempt;
//!   the default consults the error taxonomy via [`is_transient`].
//! - When attempts run out, or the predicate rejects the error, the
//!   **original error is returned unchanged** so callers can still branch on
//!   its kind.
//! - Backoff computes each delay, jitter optionally randomizes it, and the
//!   [`Sleeper`] applies it (production uses [`TokioSleeper`]; tests inject
//!   [`crate::InstantSleeper`] or [`crate::TrackingSleeper`]).
//!
//! ```rust
//! use breakwater::{Backoff, ErrorClass, RetryPolicy};
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
//! let policy = RetryPolicy::<UpstreamError>::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(Duration::from_millis(10)))
//!     .build()
//!     .unwrap();
//! let result: Result<(), UpstreamError> =
//!     policy.execute(|| async { Err(UpstreamError) }).await;
//! assert!(result.is_err());
//! # });
//! ```

use crate::error::{is_transient, ErrorClass};
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy combining attempt budget, backoff, jitter, predicate, and an
/// optional per-attempt hook.
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    on_retry: Option<Arc<dyn Fn(&E, usize) + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("should_retry", &"<predicate>")
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryConfigError {
    /// `max_attempts` must be > 0.
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for RetryConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryConfigError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for RetryConfigError {}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    /// Construct a builder with defaults: 3 attempts, exponential backoff
    /// from 100ms, no jitter, transient-error predicate.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Run `operation`, retrying on failures the predicate accepts.
    ///
    /// The error returned on exhaustion (or on a non-retryable failure) is
    /// the operation's own error, unwrapped.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, E>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt == self.max_attempts || !(self.should_retry)(&error) {
                        return Err(error);
                    }
                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    tracing::debug!(
                        target: "breakwater::retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, scheduling retry"
                    );
                    if let Some(hook) = &self.on_retry {
                        hook(&error, attempt);
                    }
                    self.sleeper.sleep(delay).await;
                }
            }
        }
        // The final attempt always returns inside the loop.
        debug_assert!(false, "retry loop must return from its final attempt");
        unreachable!()
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    on_retry: Option<Arc<dyn Fn(&E, usize) + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(100)),
            jitter: Jitter::None,
            should_retry: Arc::new(|error: &E| is_transient(error)),
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Total attempts (initial call + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the retry predicate.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Hook invoked with `(error, attempt)` before each scheduled retry.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, usize) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, RetryConfigError> {
        if self.max_attempts == 0 {
            return Err(RetryConfigError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            on_retry: self.on_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Default for RetryPolicy<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    fn default() -> Self {
        // Builder defaults are always valid.
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_millis(100)),
            jitter: Jitter::None,
            should_retry: Arc::new(|error: &E| is_transient(error)),
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}
