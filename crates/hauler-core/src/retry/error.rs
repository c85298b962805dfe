//! Per-file transfer error type for retry classification.

use std::io;
use std::path::PathBuf;

/// Error returned by a single transfer attempt (fetch, write or promote).
/// Retry and adaptive decisions look only at its [`ErrorKind`](super::ErrorKind).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Curl reported an error (timeout, connection reset, DNS, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Body ended before the advertised length (server closed early).
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Disk/storage operation failed (busy file, permission denied, disk full).
    #[error("storage: {op} {}: {source}", path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Rename failed or destination missing after the write.
    #[error("integrity: {0}")]
    Integrity(String),
    /// Unexpected response shape (ignored range, missing content-length, bad URL).
    #[error("protocol: {0}")]
    Protocol(String),
    /// Explicit abort by the caller.
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub(crate) fn storage(op: &'static str, path: &std::path::Path, source: io::Error) -> Self {
        TransferError::Storage {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Retry classification of this error.
    pub fn kind(&self) -> super::ErrorKind {
        super::classify(self)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}
