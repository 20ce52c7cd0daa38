//! Jitter strategies for spreading retry delays across callers.
//!
//! - `None`: use the exact backoff delay; right for tests and for matching a
//!   documented schedule.
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`, keeping a floor under the delay.

use rand::{rng, Rng};
use std::time::Duration;

/// Randomization applied on top of a backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the backoff delay unchanged.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    /// Apply jitter using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut r = rng();
        self.apply_with_rng(delay, &mut r)
    }

    /// Apply jitter with an injected RNG, for deterministic tests.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(millis / 2..=millis))
            }
        }
    }
}
