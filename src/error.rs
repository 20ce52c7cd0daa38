//! Error types shared by every policy in the crate.
//!
//! Two pieces live here:
//! - [`PolicyError`], the unified error produced by the timeout and circuit
//!   breaker policies, wrapping the caller's own error type as `Inner`.
//! - [`ErrorClass`], the interface this crate expects from an application's
//!   error taxonomy: a declared HTTP-ish status code and a flag marking
//!   failures of external dependencies. The default retry predicate
//!   ([`is_transient`]) is built on it.

use std::fmt;
use std::time::Duration;

/// Message fragments that mark an otherwise unclassified error as transient.
const TRANSIENT_PATTERNS: [&str; 6] = [
    "network",
    "timed out",
    "timeout",
    "connection refused",
    "connection reset",
    "unavailable",
];

/// Classification hooks an application error type can implement so retry and
/// circuit-breaker logic can tell retryable failures from fatal ones.
///
/// Both methods have conservative defaults: an error with no declared status
/// and no external-dependency flag is only retried if its message matches a
/// known transient pattern.
pub trait ErrorClass {
    /// The HTTP status this error would surface as, if it declares one.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Whether this error wraps a failure of an external dependency
    /// (downstream API, database, message broker).
    fn is_external_dependency(&self) -> bool {
        false
    }
}

/// Default retry predicate over the error taxonomy.
///
/// Retries external-dependency failures, errors with a declared 5xx status,
/// and errors whose message matches a known transient pattern. Validation and
/// other 4xx-class errors fail fast.
pub fn is_transient<E>(error: &E) -> bool
where
    E: ErrorClass + fmt::Display,
{
    if error.is_external_dependency() {
        return true;
    }
    if let Some(status) = error.status() {
        if (500..600).contains(&status) {
            return true;
        }
    }
    let message = error.to_string().to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|pattern| message.contains(pattern))
}

/// Unified error for policy-guarded operations.
///
/// `Timeout` and `CircuitOpen` are produced by the policies themselves;
/// `Inner` carries the wrapped operation's own error unchanged so callers can
/// still branch on their taxonomy.
#[derive(Debug, Clone)]
pub enum PolicyError<E> {
    /// The operation exceeded its deadline.
    Timeout {
        /// Wall-clock time spent before giving up.
        elapsed: Duration,
        /// The configured deadline.
        limit: Duration,
    },
    /// The circuit breaker refused the call.
    CircuitOpen {
        /// Consecutive failures recorded when the circuit tripped.
        failure_count: usize,
        /// Time remaining until the next recovery probe is permitted.
        retry_in: Duration,
    },
    /// The wrapped operation failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for PolicyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, limit } => {
                write!(f, "operation timed out after {:?} (limit {:?})", elapsed, limit)
            }
            Self::CircuitOpen { failure_count, retry_in } => write!(
                f,
                "service unavailable: circuit open after {} failures (retry in {:?})",
                failure_count, retry_in
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PolicyError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: ErrorClass> ErrorClass for PolicyError<E> {
    fn status(&self) -> Option<u16> {
        match self {
            Self::Timeout { .. } => Some(408),
            Self::CircuitOpen { .. } => Some(503),
            Self::Inner(e) => e.status(),
        }
    }

    fn is_external_dependency(&self) -> bool {
        match self {
            Self::Inner(e) => e.is_external_dependency(),
            _ => false,
        }
    }
}

impl<E> PolicyError<E> {
    /// Check whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check whether this error came from an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check whether this error wraps the operation's own failure.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Extract the wrapped error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the wrapped error, if any.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
