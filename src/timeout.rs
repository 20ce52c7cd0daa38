//! Timeout policy bounding the wall-clock time of an async operation.
//!
//! This is a logical timeout: when the timer wins the race the caller stops
//! waiting, but the underlying operation's side effects are not rolled back
//! unless the operation itself supports cancellation.

use crate::error::PolicyError;
use std::future::Future;
use std::time::{Duration, Instant};

/// Deadline applied to a guarded operation.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    limit: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Panics if the limit is zero or `Duration::MAX`.
    pub fn new(limit: Duration) -> Self {
        assert!(
            limit > Duration::ZERO && limit < Duration::MAX,
            "timeout limit must be non-zero and finite",
        );
        Self { limit }
    }

    /// The configured deadline.
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Race `operation` against the deadline.
    ///
    /// If the operation settles first, its outcome propagates unchanged
    /// (failures as [`PolicyError::Inner`]); otherwise the call fails with
    /// [`PolicyError::Timeout`].
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.limit, operation()).await {
            Ok(result) => result.map_err(PolicyError::Inner),
            Err(_) => Err(PolicyError::Timeout { elapsed: start.elapsed(), limit: self.limit }),
        }
    }

    /// Race `operation` against the deadline, substituting a caller-supplied
    /// error when the timer fires. The operation's own error type is kept.
    pub async fn execute_or<T, E, Fut, Op, F>(
        &self,
        operation: Op,
        timeout_error: F,
    ) -> Result<T, E>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
        F: FnOnce() -> E + Send,
    {
        match tokio::time::timeout(self.limit, operation()).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error()),
        }
    }

    /// Deadline-guard a future that already speaks [`PolicyError`], without
    /// nesting wrappers. Used when composing with other policies.
    pub async fn guard<T, E>(
        &self,
        future: impl Future<Output = Result<T, PolicyError<E>>> + Send,
    ) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: Send,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.limit, future).await {
            Ok(result) => result,
            Err(_) => Err(PolicyError::Timeout { elapsed: start.elapsed(), limit: self.limit }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn fast_operation_passes_through() {
        let policy = TimeoutPolicy::new(Duration::from_millis(200));
        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, TestError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let policy = TimeoutPolicy::new(Duration::from_millis(50));
        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, TestError>(42)
            })
            .await;

        match result.unwrap_err() {
            PolicyError::Timeout { elapsed, limit } => {
                assert_eq!(limit, Duration::from_millis(50));
                assert!(elapsed >= limit);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn already_failed_operation_rejects_immediately() {
        let policy = TimeoutPolicy::new(Duration::from_secs(3600));
        let start = Instant::now();
        let result = policy
            .execute(|| async { Err::<(), _>(TestError("broken before the deadline")) })
            .await;

        assert_eq!(result.unwrap_err().into_inner().unwrap(), TestError("broken before the deadline"));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn custom_error_replaces_timeout() {
        let policy = TimeoutPolicy::new(Duration::from_millis(50));
        let result = policy
            .execute_or(
                || async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok::<(), _>(())
                },
                || TestError("report generation took too long"),
            )
            .await;

        assert_eq!(result.unwrap_err(), TestError("report generation took too long"));
    }

    #[tokio::test]
    async fn guard_flattens_policy_errors() {
        let policy = TimeoutPolicy::new(Duration::from_millis(200));

        let ok = policy
            .guard(async { Ok::<_, PolicyError<TestError>>(7) })
            .await;
        assert_eq!(ok.unwrap(), 7);

        let slow = policy
            .guard(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, PolicyError<TestError>>(7)
            })
            .await;
        assert!(slow.unwrap_err().is_timeout());
    }
}
