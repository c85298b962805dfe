//! Parallel byte-range transfer of one large object.
//!
//! Probe, size the temp file, fetch fixed-size ranges concurrently through
//! the network gate and write each one at its own offset through the I/O
//! gate. A failing chunk retries on its own; once one exhausts its attempts
//! the siblings are cancelled and the whole file fails (or falls back to a
//! plain streamed transfer for protocol/integrity trouble).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{body, streamed, ProgressReporter, TransferContext};
use crate::fetch_head;
use crate::request::TransferRequest;
use crate::retry::{run_with_retry, ErrorKind, RetryPolicy, TransferError};
use crate::scheduler::LimiterPermit;
use crate::segmenter::{plan_chunks, ChunkDescriptor};
use crate::storage::{discard, promote, temp_path, write_chunk, StorageWriterBuilder};

pub(super) async fn run(
    ctx: &TransferContext,
    request: &TransferRequest,
    progress: &ProgressReporter,
    net: LimiterPermit,
) -> Result<u64, TransferError> {
    let head = match fetch_head::probe(&request.source, &ctx.config.http, &ctx.cancel).await {
        Ok(head) => head,
        Err(e) if falls_back(&e) => {
            info!(path = %request.destination.display(), error = %e, "probe failed, using streamed transfer");
            return streamed::run(ctx, request, progress, net).await;
        }
        Err(e) => return Err(e),
    };

    let size = match head.content_length {
        Some(size) if head.accept_ranges && size >= ctx.config.chunk_threshold_bytes => size,
        _ => {
            debug!(
                path = %request.destination.display(),
                accept_ranges = head.accept_ranges,
                size = ?head.content_length,
                "no ranges or below chunking threshold, using streamed transfer"
            );
            return streamed::run(ctx, request, progress, net).await;
        }
    };
    // Chunks queue for their own slots.
    drop(net);

    match run_chunks(ctx, request, size, progress).await {
        Err(e) if falls_back(&e) && !ctx.cancel.is_cancelled() => {
            warn!(path = %request.destination.display(), error = %e, "chunked transfer failed, falling back to streamed");
            progress.report(0, Some(size));
            let net = ctx.network.acquire(&ctx.cancel).await?;
            streamed::run(ctx, request, progress, net).await
        }
        other => other,
    }
}

fn falls_back(e: &TransferError) -> bool {
    matches!(e.kind(), ErrorKind::Protocol | ErrorKind::Integrity)
}

async fn run_chunks(
    ctx: &TransferContext,
    request: &TransferRequest,
    size: u64,
    progress: &ProgressReporter,
) -> Result<u64, TransferError> {
    let temp = temp_path(&request.destination);
    let res = fetch_all(ctx, request, &temp, size, progress).await;
    let res = match res {
        Ok(()) => promote(&temp, &request.destination, ctx.config.settle_delay(), &ctx.cancel)
            .await
            .map(|()| size),
        Err(e) => Err(e),
    };
    if res.is_err() {
        discard(&temp).await;
    }
    res
}

async fn fetch_all(
    ctx: &TransferContext,
    request: &TransferRequest,
    temp: &Path,
    size: u64,
    progress: &ProgressReporter,
) -> Result<(), TransferError> {
    let temp_owned = temp.to_path_buf();
    let writer = ctx
        .io
        .admit(
            &ctx.cancel,
            async move {
                tokio::task::spawn_blocking(move || {
                    let mut builder = StorageWriterBuilder::create(&temp_owned)?;
                    builder.preallocate(size)?;
                    Ok::<_, TransferError>(builder.build())
                })
                .await
            },
        )
        .await?
        .map_err(|e| TransferError::Protocol(format!("preallocate worker failed: {e}")))??;

    let chunks = plan_chunks(size, ctx.config.chunk_size_bytes);
    info!(
        path = %request.destination.display(),
        size,
        chunks = chunks.len(),
        "starting chunked transfer"
    );
    progress.report(0, Some(size));

    let siblings = ctx.cancel.child_token();
    let written = Arc::new(AtomicU64::new(0));
    let policy = RetryPolicy::for_chunks(ctx.config.retry.chunk_max_attempts);
    let mut set = JoinSet::new();
    for chunk in chunks {
        let job = ChunkJob {
            ctx: ctx.clone(),
            url: request.source.clone(),
            temp: temp.to_path_buf(),
            chunk,
            cancel: siblings.clone(),
            written: written.clone(),
            progress: progress.clone(),
            size,
        };
        set.spawn(async move { job.run(policy).await });
    }

    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        let res = joined.unwrap_or_else(|e| {
            Err(TransferError::Protocol(format!("chunk task failed: {e}")))
        });
        if let Err(e) = res {
            if first_err.is_none() {
                if !e.is_cancelled() {
                    warn!(path = %request.destination.display(), error = %e, "chunk failed, abandoning siblings");
                }
                siblings.cancel();
                first_err = Some(e);
            }
        }
    }
    if ctx.cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    if let Some(e) = first_err {
        return Err(e);
    }
    ctx.io
        .admit(&ctx.cancel, async move {
            tokio::task::spawn_blocking(move || writer.sync()).await
        })
        .await?
        .map_err(|e| TransferError::Protocol(format!("sync worker failed: {e}")))?
}

struct ChunkJob {
    ctx: TransferContext,
    url: String,
    temp: PathBuf,
    chunk: ChunkDescriptor,
    cancel: CancellationToken,
    written: Arc<AtomicU64>,
    progress: ProgressReporter,
    size: u64,
}

impl ChunkJob {
    async fn run(mut self, policy: RetryPolicy) -> Result<(), TransferError> {
        let cancel = self.cancel.clone();
        let (res, attempts) = run_with_retry(&policy, &cancel, "chunk", |_| self.attempt()).await;
        match &res {
            Ok(()) => {
                self.chunk.bytes_written = self.chunk.len();
                debug!(chunk = self.chunk.index, attempts, "chunk written");
            }
            Err(e) if !e.is_cancelled() => {
                warn!(chunk = self.chunk.index, attempts, error = %e, "chunk exhausted its attempts");
            }
            Err(_) => {}
        }
        res
    }

    async fn attempt(&self) -> Result<(), TransferError> {
        let data = {
            let _net = self.ctx.network.acquire(&self.cancel).await?;
            let stream =
                body::open(&self.url, Some(&self.chunk), &self.ctx.config.http, &self.cancel).await?;
            stream.read_to_end(|_| {}).await?
        };

        let temp = self.temp.clone();
        let offset = self.chunk.start;
        let len = data.len() as u64;
        self.ctx
            .io
            .admit(
                &self.cancel,
                async move {
                    tokio::task::spawn_blocking(move || write_chunk(&temp, offset, &data)).await
                },
            )
            .await?
            .map_err(|e| TransferError::Protocol(format!("chunk writer failed: {e}")))??;

        let total = self.written.fetch_add(len, Ordering::Relaxed) + len;
        self.progress.report(total, Some(self.size));
        Ok(())
    }
}
