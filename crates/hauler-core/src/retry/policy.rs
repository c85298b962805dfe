use std::time::Duration;

use crate::config::RetryConfig;

/// High-level classification of an error for retry purposes.
///
/// Callers map HTTP status codes, curl errors and IO failures into these
/// kinds; retry and adaptive decisions never look past the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeout, connection reset, DNS failure, throttling or 5xx.
    Network,
    /// File busy, access denied, exclusive lock held by another process.
    Lock,
    /// Rename failed or destination missing after the write.
    Integrity,
    /// Unexpected status code or missing headers. Not retried.
    Protocol,
    /// Explicit abort. Never retried.
    Cancelled,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
    /// Abandon because the caller cancelled.
    Cancelled,
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base * factor^(attempt-1)`, capped.
    Exponential { factor: f64 },
    /// `base * attempt`, capped.
    Linear,
}

/// Backoff policy with a separate (longer) base delay for lock-class errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for network and integrity errors.
    pub base_delay: Duration,
    /// Base delay for lock/permission errors.
    pub lock_base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Per-file policy built from the `[retry]` config section.
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            lock_base_delay: Duration::from_secs_f64(cfg.lock_base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs_f64(cfg.max_delay_secs.max(0.0)),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }

    /// Per-chunk policy: one second times the attempt number.
    pub fn for_chunks(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            lock_base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            backoff: Backoff::Linear,
        }
    }

    /// Same delays with a different attempt cap (used by the final pass).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Compute the next backoff delay for a given attempt and error kind.
    ///
    /// `attempt` is 1-based (1 = first attempt). Returns `RetryDecision::NoRetry`
    /// when we should stop retrying.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::Cancelled => return RetryDecision::Cancelled,
            ErrorKind::Protocol => return RetryDecision::NoRetry,
            ErrorKind::Network | ErrorKind::Lock | ErrorKind::Integrity => {}
        }
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let base = if kind == ErrorKind::Lock {
            self.lock_base_delay
        } else {
            self.base_delay
        };
        let n = attempt.max(1);
        let raw = match self.backoff {
            Backoff::Exponential { factor } => {
                let exp = factor.max(1.0).powi(n.saturating_sub(1).min(16) as i32);
                base.mul_f64(exp)
            }
            Backoff::Linear => base.saturating_mul(n),
        };
        RetryDecision::RetryAfter(raw.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay(d: RetryDecision) -> Duration {
        match d {
            RetryDecision::RetryAfter(d) => d,
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn no_retry_for_protocol() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Protocol), RetryDecision::NoRetry);
    }

    #[test]
    fn cancelled_always_wins() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Cancelled), RetryDecision::Cancelled);
        assert_eq!(p.decide(99, ErrorKind::Cancelled), RetryDecision::Cancelled);
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let mut p = RetryPolicy::default();
        p.max_attempts = 20;
        let d1 = delay(p.decide(1, ErrorKind::Network));
        let d2 = delay(p.decide(2, ErrorKind::Network));
        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
        let d_last = delay(p.decide(10, ErrorKind::Network));
        assert_eq!(d_last, p.max_delay);
    }

    #[test]
    fn lock_errors_wait_longer() {
        let p = RetryPolicy::default();
        let net = delay(p.decide(1, ErrorKind::Network));
        let lock = delay(p.decide(1, ErrorKind::Lock));
        assert!(lock > net);
        assert_eq!(lock, Duration::from_secs(5));
    }

    #[test]
    fn respects_max_attempts() {
        let mut p = RetryPolicy::default();
        p.max_attempts = 3;
        assert!(matches!(
            p.decide(1, ErrorKind::Lock),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            p.decide(2, ErrorKind::Network),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(3, ErrorKind::Network), RetryDecision::NoRetry);
    }

    #[test]
    fn chunk_policy_is_linear() {
        let p = RetryPolicy::for_chunks(5);
        assert_eq!(delay(p.decide(1, ErrorKind::Network)), Duration::from_secs(1));
        assert_eq!(delay(p.decide(3, ErrorKind::Network)), Duration::from_secs(3));
        assert_eq!(p.decide(5, ErrorKind::Network), RetryDecision::NoRetry);
    }
}
