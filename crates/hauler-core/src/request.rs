//! Transfer requests and their per-batch outcomes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::retry::{ErrorKind, TransferError};

/// One file to fetch. Identity is the destination path, which must be unique
/// within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: String,
    pub destination: PathBuf,
    /// Size advertised by the caller's manifest; drives strategy selection
    /// and largest-first ordering.
    pub expected_size: Option<u64>,
    /// Tie-breaker among equal sizes; higher runs first.
    pub priority: i32,
}

impl TransferRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            expected_size: None,
            priority: 0,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// Final result for one request. Emitted exactly once per request per batch.
#[derive(Debug)]
pub struct TransferOutcome {
    pub request: Arc<TransferRequest>,
    pub bytes_transferred: u64,
    pub error: Option<TransferError>,
    /// Attempts across the main pass and the final pass.
    pub attempts: u32,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(TransferError::Cancelled))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(TransferError::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_fields() {
        let r = TransferRequest::new("http://h/a", "/tmp/a")
            .with_expected_size(42)
            .with_priority(3);
        assert_eq!(r.expected_size, Some(42));
        assert_eq!(r.priority, 3);
        assert_eq!(r.destination(), Path::new("/tmp/a"));
    }

    #[test]
    fn outcome_flags() {
        let req = Arc::new(TransferRequest::new("http://h/a", "/tmp/a"));
        let ok = TransferOutcome {
            request: req.clone(),
            bytes_transferred: 10,
            error: None,
            attempts: 1,
        };
        assert!(ok.is_success());
        let cancelled = TransferOutcome {
            request: req,
            bytes_transferred: 0,
            error: Some(TransferError::Cancelled),
            attempts: 1,
        };
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.error_kind(), Some(ErrorKind::Cancelled));
    }
}
