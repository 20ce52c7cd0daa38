//! Circuit breaker guarding one downstream dependency.
//!
//! State machine: `Closed` → (threshold consecutive failures) → `Open` →
//! (retry timeout elapses, next call) → `HalfOpen` → single probe →
//! `Closed` on success, back to `Open` on failure.
//!
//! State lives in lock-free atomics; transitions go through
//! `compare_exchange` so exactly one caller wins each transition. Every trip
//! and reset is logged, since those events are the primary operator signal
//! that a dependency is failing.

use crate::clock::{Clock, MonotonicClock};
use crate::error::PolicyError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Calls are short-circuited until the retry timeout elapses.
    Open,
    /// A single probe call is testing whether the dependency recovered.
    HalfOpen,
}

fn state_from(raw: u8) -> CircuitState {
    match raw {
        STATE_OPEN => CircuitState::Open,
        STATE_HALF_OPEN => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// Failure threshold must be > 0.
    InvalidFailureThreshold { provided: usize },
    /// Retry timeout must be > 0.
    InvalidRetryTimeout(Duration),
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::InvalidFailureThreshold { provided } => {
                write!(f, "failure_threshold must be > 0 (got {})", provided)
            }
            CircuitBreakerError::InvalidRetryTimeout(timeout) => {
                write!(f, "retry_timeout must be > 0 (got {:?})", timeout)
            }
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

#[derive(Debug)]
struct BreakerShared {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
}

/// Outcome of the admission check performed before each call.
enum Admission {
    /// Circuit closed; run the operation.
    Pass,
    /// This caller won the half-open transition and runs the single probe.
    Probe,
    /// Circuit open (or a probe is already in flight); do not run.
    Reject { failure_count: usize, retry_in: Duration },
}

/// Circuit breaker policy for one logical downstream dependency.
///
/// Clones share the same state via `Arc`, so every handle observes the same
/// circuit lifecycle. Create a separate instance per dependency; sharing one
/// breaker across unrelated call sites makes failures in one of them punish
/// the others.
#[derive(Debug, Clone)]
pub struct CircuitBreakerPolicy {
    shared: Arc<BreakerShared>,
    failure_threshold: usize,
    retry_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    /// Create a breaker that opens after `failure_threshold` consecutive
    /// failures and permits a recovery probe after `retry_timeout`.
    pub fn new(
        failure_threshold: usize,
        retry_timeout: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if retry_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidRetryTimeout(retry_timeout));
        }
        Ok(Self::from_parts(failure_threshold, retry_timeout))
    }

    fn from_parts(failure_threshold: usize, retry_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(BreakerShared {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
            }),
            failure_threshold,
            retry_timeout,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current state, for health endpoints and tests.
    pub fn state(&self) -> CircuitState {
        state_from(self.shared.state.load(Ordering::Acquire))
    }

    /// Consecutive failures recorded so far.
    pub fn failure_count(&self) -> usize {
        self.shared.failure_count.load(Ordering::Acquire)
    }

    /// Run `operation` under circuit protection.
    ///
    /// While the circuit is open, fails with [`PolicyError::CircuitOpen`]
    /// without invoking the operation. The operation's own failures come back
    /// as [`PolicyError::Inner`].
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        match self.admit() {
            Admission::Reject { failure_count, retry_in } => {
                Err(PolicyError::CircuitOpen { failure_count, retry_in })
            }
            Admission::Pass | Admission::Probe => match operation().await {
                Ok(value) => {
                    self.on_success();
                    Ok(value)
                }
                Err(error) => {
                    self.on_failure();
                    Err(PolicyError::Inner(error))
                }
            },
        }
    }

    /// Like [`execute`](Self::execute), but a rejected call (circuit open) or
    /// a failed recovery probe resolves to `fallback()` instead, masking the
    /// outage from the caller. The trip stays visible in the logs.
    pub async fn execute_with_fallback<T, E, Fut, Op, FbFut, Fb>(
        &self,
        operation: Op,
        fallback: Fb,
    ) -> Result<T, PolicyError<E>>
    where
        T: Send,
        E: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
        FbFut: Future<Output = Result<T, E>> + Send,
        Fb: FnOnce() -> FbFut + Send,
    {
        match self.admit() {
            Admission::Reject { .. } => fallback().await.map_err(PolicyError::Inner),
            Admission::Pass => match operation().await {
                Ok(value) => {
                    self.on_success();
                    Ok(value)
                }
                Err(error) => {
                    self.on_failure();
                    Err(PolicyError::Inner(error))
                }
            },
            Admission::Probe => match operation().await {
                Ok(value) => {
                    self.on_success();
                    Ok(value)
                }
                Err(_) => {
                    self.on_failure();
                    fallback().await.map_err(PolicyError::Inner)
                }
            },
        }
    }

    fn admit(&self) -> Admission {
        loop {
            match state_from(self.shared.state.load(Ordering::Acquire)) {
                CircuitState::Closed => return Admission::Pass,
                CircuitState::HalfOpen => {
                    // A probe is already in flight; only one call may test
                    // the dependency per recovery window.
                    return Admission::Reject {
                        failure_count: self.failure_count(),
                        retry_in: self.retry_timeout,
                    };
                }
                CircuitState::Open => {
                    let opened_at = self.shared.opened_at_millis.load(Ordering::Acquire);
                    let now = self.clock.now_millis();
                    let elapsed = now.saturating_sub(opened_at);
                    let timeout_ms = self.retry_timeout.as_millis() as u64;

                    if elapsed < timeout_ms {
                        return Admission::Reject {
                            failure_count: self.failure_count(),
                            retry_in: Duration::from_millis(timeout_ms - elapsed),
                        };
                    }

                    match self.shared.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::info!(
                                target: "breakwater::circuit_breaker",
                                "circuit half-open, sending recovery probe"
                            );
                            return Admission::Probe;
                        }
                        // Lost the race; another caller changed state.
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    fn on_success(&self) {
        if state_from(self.shared.state.load(Ordering::Acquire)) == CircuitState::HalfOpen
            && self
                .shared
                .state
                .compare_exchange(
                    STATE_HALF_OPEN,
                    STATE_CLOSED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.shared.failure_count.store(0, Ordering::Release);
            self.shared.opened_at_millis.store(0, Ordering::Release);
            tracing::info!(
                target: "breakwater::circuit_breaker",
                "recovery probe succeeded, circuit closed"
            );
        }
    }

    fn on_failure(&self) {
        let failures = self.shared.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match state_from(self.shared.state.load(Ordering::Acquire)) {
            CircuitState::HalfOpen => {
                if self
                    .shared
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.shared
                        .opened_at_millis
                        .store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(
                        target: "breakwater::circuit_breaker",
                        failures,
                        "recovery probe failed, circuit re-opened"
                    );
                }
            }
            CircuitState::Closed => {
                if failures >= self.failure_threshold
                    && self
                        .shared
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.shared
                        .opened_at_millis
                        .store(self.clock.now_millis(), Ordering::Release);
                    tracing::error!(
                        target: "breakwater::circuit_breaker",
                        failures,
                        threshold = self.failure_threshold,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

impl Default for CircuitBreakerPolicy {
    /// 5 consecutive failures to trip, 30s before the recovery probe.
    fn default() -> Self {
        Self::from_parts(5, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn breaker(threshold: usize, timeout_ms: u64, clock: ManualClock) -> CircuitBreakerPolicy {
        CircuitBreakerPolicy::new(threshold, Duration::from_millis(timeout_ms))
            .expect("valid breaker")
            .with_clock(clock)
    }

    async fn fail(breaker: &CircuitBreakerPolicy) {
        let _ = breaker
            .execute(|| async { Err::<(), _>(TestError("downstream failed")) })
            .await;
    }

    #[test]
    fn rejects_zero_threshold() {
        let err = CircuitBreakerPolicy::new(0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CircuitBreakerError::InvalidFailureThreshold { provided: 0 }));
    }

    #[test]
    fn rejects_zero_retry_timeout() {
        let err = CircuitBreakerPolicy::new(3, Duration::ZERO).unwrap_err();
        assert!(matches!(err, CircuitBreakerError::InvalidRetryTimeout(Duration::ZERO)));
    }

    #[tokio::test]
    async fn starts_closed_and_passes_calls() {
        let breaker = breaker(3, 1_000, ManualClock::new());
        assert_eq!(breaker.state(), CircuitState::Closed);

        let result = breaker
            .execute(|| async { Ok::<_, TestError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = breaker(3, 60_000, ManualClock::new());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);

        // The wrapped operation is not invoked while open.
        let calls_in_op = calls.clone();
        let result = breaker
            .execute(|| {
                let calls = calls_in_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(1)
                }
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn below_threshold_stays_closed() {
        let breaker = breaker(3, 1_000, ManualClock::new());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[tokio::test]
    async fn probe_after_timeout_closes_on_success() {
        let clock = ManualClock::new();
        let breaker = breaker(2, 500, clock.clone());

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(600);
        let result = breaker
            .execute(|| async { Ok::<_, TestError>("recovered") })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn probe_failure_reopens() {
        let clock = ManualClock::new();
        let breaker = breaker(2, 500, clock.clone());

        fail(&breaker).await;
        fail(&breaker).await;
        clock.advance(600);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Still rejecting until another timeout passes.
        let result = breaker
            .execute(|| async { Ok::<_, TestError>(1) })
            .await;
        assert!(result.unwrap_err().is_circuit_open());

        // And recoverable again after that.
        clock.advance(600);
        let result = breaker
            .execute(|| async { Ok::<_, TestError>(2) })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn only_one_probe_runs_in_half_open() {
        let clock = ManualClock::new();
        let breaker = breaker(1, 100, clock.clone());

        fail(&breaker).await;
        clock.advance(200);

        let probes = Arc::new(AtomicUsize::new(0));
        let probes_task = probes.clone();
        let slow_probe = breaker.clone();
        let handle = tokio::spawn(async move {
            slow_probe
                .execute(|| {
                    let probes = probes_task.clone();
                    async move {
                        probes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, TestError>(())
                    }
                })
                .await
        });

        // Give the probe a chance to start, then race a second call.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = breaker
            .execute(|| async { Ok::<_, TestError>(()) })
            .await;

        assert!(second.unwrap_err().is_circuit_open());
        assert!(handle.await.expect("join").is_ok());
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_masks_open_circuit() {
        let clock = ManualClock::new();
        let breaker = breaker(1, 60_000, clock);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker
            .execute_with_fallback(
                || async { Ok::<_, TestError>("live") },
                || async { Ok::<_, TestError>("cached") },
            )
            .await;

        assert_eq!(result.unwrap(), "cached");
    }

    #[tokio::test]
    async fn fallback_covers_failed_probe() {
        let clock = ManualClock::new();
        let breaker = breaker(1, 100, clock.clone());

        fail(&breaker).await;
        clock.advance(200);

        let result = breaker
            .execute_with_fallback(
                || async { Err::<&str, _>(TestError("still down")) },
                || async { Ok::<_, TestError>("cached") },
            )
            .await;

        assert_eq!(result.unwrap(), "cached");
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_error_carries_retry_hint() {
        let clock = ManualClock::new();
        let breaker = breaker(1, 1_000, clock.clone());

        fail(&breaker).await;
        clock.advance(250);

        let err = breaker
            .execute(|| async { Ok::<_, TestError>(()) })
            .await
            .unwrap_err();
        match err {
            PolicyError::CircuitOpen { failure_count, retry_in } => {
                assert_eq!(failure_count, 1);
                assert_eq!(retry_in, Duration::from_millis(750));
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
    }
}
