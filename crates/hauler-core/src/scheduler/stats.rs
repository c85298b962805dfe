//! Batch counters and the final batch result.

use std::time::{Duration, Instant};

/// Aggregate counters for the running (or last) batch. Written only by the
/// orchestrator; observers get cloned snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub total_requested: usize,
    pub completed: usize,
    /// Requests that failed for a reason other than cancellation.
    pub failed: usize,
    pub cancelled_requests: usize,
    /// Sum of the caller's size hints.
    pub total_bytes_expected: u64,
    /// Bytes of completed requests.
    pub total_bytes_transferred: u64,
    pub started_at: Option<Instant>,
}

impl BatchStats {
    pub(crate) fn start(total_requested: usize, total_bytes_expected: u64, now: Instant) -> Self {
        Self {
            total_requested,
            total_bytes_expected,
            started_at: Some(now),
            ..Self::default()
        }
    }

    /// Requests that have their completion.
    pub fn resolved(&self) -> usize {
        self.completed + self.failed + self.cancelled_requests
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }
}

/// Returned by `submit_batch` once every request has its completion.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub total_requested: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled_requests: usize,
    /// The batch was cancelled before it finished.
    pub cancelled: bool,
    pub duration: Duration,
}

impl BatchResult {
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed == 0 && self.cancelled_requests == 0
    }
}
