//! Write the body to the temp file as it arrives.
//!
//! The network permit is held until the last body byte is in. Received data
//! is staged in memory and written out under an I/O permit every
//! `FLUSH_BYTES`, so a slow connection never sits on a disk slot.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::body;
use super::{ProgressReporter, TransferContext};
use crate::request::TransferRequest;
use crate::retry::TransferError;
use crate::scheduler::LimiterPermit;
use crate::storage::{discard, promote, temp_path};

const FLUSH_BYTES: usize = 1024 * 1024;

pub(super) async fn run(
    ctx: &TransferContext,
    request: &TransferRequest,
    progress: &ProgressReporter,
    net: LimiterPermit,
) -> Result<u64, TransferError> {
    let temp = temp_path(&request.destination);
    let res = fetch_to(ctx, request, &temp, progress, net).await;
    if res.is_err() {
        discard(&temp).await;
    }
    res
}

async fn fetch_to(
    ctx: &TransferContext,
    request: &TransferRequest,
    temp: &Path,
    progress: &ProgressReporter,
    net: LimiterPermit,
) -> Result<u64, TransferError> {
    let mut stream = body::open(&request.source, None, &ctx.config.http, &ctx.cancel).await?;
    let total = stream.expected_len();
    let mut out = TempSink::new(temp);
    let mut staged = Vec::with_capacity(FLUSH_BYTES);
    progress.report(0, total);
    while let Some(data) = stream.next_chunk().await? {
        staged.extend_from_slice(&data);
        progress.report(stream.received(), total);
        if staged.len() >= FLUSH_BYTES {
            let _io = ctx.io.acquire(&ctx.cancel).await?;
            out.write(&staged).await?;
            staged.clear();
        }
    }
    let received = stream.received();
    drop(stream);
    drop(net);

    let _io = ctx.io.acquire(&ctx.cancel).await?;
    out.write(&staged).await?;
    out.finish().await?;
    promote(temp, &request.destination, ctx.config.settle_delay(), &ctx.cancel).await?;
    Ok(received)
}

/// Temp file opened on first write, so an empty body still yields a file.
struct TempSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
}

impl TempSink {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
        }
    }

    async fn file(&mut self) -> Result<&mut tokio::fs::File, TransferError> {
        let file = match self.file.take() {
            Some(file) => file,
            None => tokio::fs::File::create(&self.path)
                .await
                .map_err(|e| TransferError::storage("create", &self.path, e))?,
        };
        Ok(self.file.insert(file))
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransferError> {
        if data.is_empty() {
            return Ok(());
        }
        let path = self.path.clone();
        self.file()
            .await?
            .write_all(data)
            .await
            .map_err(|e| TransferError::storage("write", &path, e))
    }

    async fn finish(mut self) -> Result<(), TransferError> {
        let path = self.path.clone();
        let file = self.file().await?;
        file.flush()
            .await
            .map_err(|e| TransferError::storage("flush", &path, e))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::storage("sync", &path, e))
    }
}
