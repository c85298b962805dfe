//! Single-file transfer strategies.
//!
//! Every strategy writes to the destination's `.part` sibling and promotes it
//! atomically; every failure or cancellation path removes the temp file, so
//! a destination is either the complete new file or exactly what it was.
//!
//! - `buffered`: whole body in memory, then one write. Small known sizes.
//! - `streamed`: body written as it arrives. Unknown or mid-sized files.
//! - `chunked`: parallel range requests into a pre-sized temp file. Large
//!   files on range-capable servers; falls back to `streamed`.

pub mod body;
mod buffered;
mod chunked;
mod streamed;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EngineConfig;
use crate::request::TransferRequest;
use crate::retry::TransferError;
use crate::scheduler::{ConcurrencyLimiter, LimiterPermit};

/// How one file is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Buffered,
    Streamed,
    Chunked,
}

impl Strategy {
    /// Pick a strategy from the caller-supplied size hint.
    pub fn select(request: &TransferRequest, config: &EngineConfig) -> Strategy {
        match request.expected_size {
            Some(size) if size > 0 && size < config.memory_threshold_bytes => Strategy::Buffered,
            Some(size) if config.chunked_enabled && size >= config.chunk_threshold_bytes => {
                Strategy::Chunked
            }
            _ => Strategy::Streamed,
        }
    }
}

/// Byte progress of one request as seen by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerProgress {
    pub index: usize,
    pub file_bytes: u64,
    pub file_total: Option<u64>,
}

/// Forwards byte progress of one request to the orchestrator.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    index: usize,
    tx: Option<mpsc::UnboundedSender<WorkerProgress>>,
}

impl ProgressReporter {
    pub(crate) fn new(index: usize, tx: mpsc::UnboundedSender<WorkerProgress>) -> Self {
        Self {
            index,
            tx: Some(tx),
        }
    }

    /// A reporter that drops everything.
    pub fn noop() -> Self {
        Self { index: 0, tx: None }
    }

    /// `file_bytes` is the running total for this request, not a delta.
    pub fn report(&self, file_bytes: u64, file_total: Option<u64>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(WorkerProgress {
                index: self.index,
                file_bytes,
                file_total,
            });
        }
    }
}

/// Everything a strategy needs besides the request itself. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TransferContext {
    pub config: Arc<EngineConfig>,
    pub network: ConcurrencyLimiter,
    pub io: ConcurrencyLimiter,
    pub cancel: CancellationToken,
}

/// Run one attempt for `request` with the strategy its size calls for.
/// `admitted` is the network slot the request was admitted with; the
/// strategy holds it for its first network operation. Returns the number of
/// body bytes written.
pub async fn transfer(
    ctx: &TransferContext,
    request: &TransferRequest,
    progress: &ProgressReporter,
    admitted: LimiterPermit,
) -> Result<u64, TransferError> {
    if ctx.cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    let strategy = Strategy::select(request, &ctx.config);
    debug!(
        path = %request.destination.display(),
        ?strategy,
        size = ?request.expected_size,
        "starting transfer"
    );
    match strategy {
        Strategy::Buffered => buffered::run(ctx, request, progress, admitted).await,
        Strategy::Streamed => streamed::run(ctx, request, progress, admitted).await,
        Strategy::Chunked => chunked::run(ctx, request, progress, admitted).await,
    }
}
