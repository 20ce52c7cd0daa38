//! Composition helper wiring retry, timeout, and circuit breaker around one
//! operation, in that order: each attempt is deadline-bounded, and the
//! breaker decides whether the attempt reaches the dependency at all.
//!
//! Open-circuit rejections surface as [`PolicyError::CircuitOpen`] (503,
//! transient), so the retry layer treats them like any other retryable
//! failure and backs off.

use crate::error::{ErrorClass, PolicyError};
use crate::{CircuitBreakerPolicy, RetryPolicy, TimeoutPolicy};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Retry, timeout, and circuit breaker applied together.
#[derive(Debug, Clone)]
pub struct PolicyStack<E> {
    timeout: TimeoutPolicy,
    circuit_breaker: CircuitBreakerPolicy,
    retry: RetryPolicy<PolicyError<E>>,
}

impl<E> PolicyStack<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    pub fn builder() -> PolicyStackBuilder<E> {
        PolicyStackBuilder::new()
    }

    /// Run `operation` under the full stack.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, PolicyError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let operation = Arc::new(Mutex::new(operation));
        let timeout = self.timeout;
        let breaker = self.circuit_breaker.clone();

        self.retry
            .execute(move || {
                let operation = operation.clone();
                let breaker = breaker.clone();
                async move {
                    timeout
                        .guard(breaker.execute(move || {
                            let mut op = operation.lock().unwrap();
                            op()
                        }))
                        .await
                }
            })
            .await
    }
}

impl<E> Default for PolicyStack<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    fn default() -> Self {
        PolicyStackBuilder::new().build()
    }
}

/// Builder for [`PolicyStack`].
pub struct PolicyStackBuilder<E> {
    timeout: Option<TimeoutPolicy>,
    circuit_breaker: Option<CircuitBreakerPolicy>,
    retry: Option<RetryPolicy<PolicyError<E>>>,
}

impl<E> PolicyStackBuilder<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { timeout: None, circuit_breaker: None, retry: None }
    }

    /// Deadline applied to each attempt. Defaults to 30s.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(TimeoutPolicy::new(limit));
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy<PolicyError<E>>) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> PolicyStack<E> {
        PolicyStack {
            timeout: self
                .timeout
                .unwrap_or_else(|| TimeoutPolicy::new(Duration::from_secs(30))),
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
        }
    }
}

impl<E> Default for PolicyStackBuilder<E>
where
    E: std::error::Error + ErrorClass + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
