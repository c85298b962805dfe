//! Small files: fetch the whole body into memory, then write it in one go.

use tokio::io::AsyncWriteExt;

use super::{body, ProgressReporter, TransferContext};
use crate::request::TransferRequest;
use crate::retry::TransferError;
use crate::scheduler::LimiterPermit;
use crate::storage::{discard, promote, temp_path};

pub(super) async fn run(
    ctx: &TransferContext,
    request: &TransferRequest,
    progress: &ProgressReporter,
    net: LimiterPermit,
) -> Result<u64, TransferError> {
    let data = {
        let _net = net;
        let stream = body::open(&request.source, None, &ctx.config.http, &ctx.cancel).await?;
        let total = stream.expected_len().or(request.expected_size);
        stream
            .read_to_end(|received| progress.report(received, total))
            .await?
    };

    let temp = temp_path(&request.destination);
    let res = ctx
        .io
        .admit(&ctx.cancel, async {
            write_all(&temp, &data).await?;
            promote(&temp, &request.destination, ctx.config.settle_delay(), &ctx.cancel).await
        })
        .await
        .and_then(|res| res);
    if let Err(e) = res {
        discard(&temp).await;
        return Err(e);
    }
    Ok(data.len() as u64)
}

async fn write_all(temp: &std::path::Path, data: &[u8]) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::create(temp)
        .await
        .map_err(|e| TransferError::storage("create", temp, e))?;
    file.write_all(data)
        .await
        .map_err(|e| TransferError::storage("write", temp, e))?;
    file.sync_all()
        .await
        .map_err(|e| TransferError::storage("sync", temp, e))?;
    Ok(())
}
