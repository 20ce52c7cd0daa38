//! Exponential backoff schedule for retry delays.
//!
//! The delay before retry `i` (1-indexed) is `initial × factor^(i−1)`, capped
//! at a configured maximum. A factor of `1.0` yields a constant delay.
//! Attempt `0` means the initial call and always maps to a zero delay.
//!
//! ```rust
//! use breakwater::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(2)).unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(10), Duration::from_secs(2)); // capped
//! ```

use std::fmt;
use std::time::Duration;

/// Cap applied to `exponential` when no explicit maximum is set.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Errors returned when a backoff schedule is misconfigured.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffError {
    /// The growth factor must be at least 1.
    FactorBelowOne(f64),
    /// The cap must not undercut the initial delay.
    MaxBelowInitial {
        initial: Duration,
        max: Duration,
    },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::FactorBelowOne(factor) => {
                write!(f, "backoff factor must be >= 1 (got {})", factor)
            }
            BackoffError::MaxBelowInitial { initial, max } => {
                write!(f, "max delay ({:?}) must be >= initial delay ({:?})", max, initial)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Validated backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    /// Build a schedule, validating `factor >= 1` and `max >= initial`.
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Result<Self, BackoffError> {
        if !(factor >= 1.0) {
            return Err(BackoffError::FactorBelowOne(factor));
        }
        if max < initial {
            return Err(BackoffError::MaxBelowInitial { initial, max });
        }
        Ok(Self { initial, factor, max })
    }

    /// Doubling schedule starting at `initial`, capped at [`DEFAULT_MAX_DELAY`].
    pub fn exponential(initial: Duration) -> Self {
        Self {
            initial,
            factor: 2.0,
            max: DEFAULT_MAX_DELAY.max(initial),
        }
    }

    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { initial: delay, factor: 1.0, max: delay }
    }

    /// Replace the cap, keeping initial delay and factor.
    pub fn with_max(self, max: Duration) -> Result<Self, BackoffError> {
        Self::new(self.initial, self.factor, max)
    }

    /// Replace the growth factor, keeping initial delay and cap.
    pub fn with_factor(self, factor: f64) -> Result<Self, BackoffError> {
        Self::new(self.initial, factor, self.max)
    }

    /// Delay before the retry following failed attempt `attempt` (1-indexed).
    /// `attempt == 0` means the initial call and returns zero.
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
        let scaled = self.initial.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() {
            return self.max;
        }
        let capped = scaled.min(self.max.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max)
    }
}
