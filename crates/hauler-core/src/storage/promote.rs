//! Atomic promote and best-effort cleanup of temp files.
//!
//! Third-party scanners (antivirus, indexers) briefly hold freshly written
//! files; every step that touches the destination waits a settle delay and
//! retries removals with a growing back-off.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::writer::StorageWriter;
use crate::retry::TransferError;

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_BACKOFF: Duration = Duration::from_millis(800);

/// Remove `path`, retrying `REMOVE_ATTEMPTS` times with 800 ms × attempt
/// back-off. A missing file counts as removed.
pub async fn remove_with_retry(path: &Path) -> Result<(), TransferError> {
    remove_with_backoff(path, REMOVE_ATTEMPTS, REMOVE_BACKOFF).await
}

async fn remove_with_backoff(
    path: &Path,
    attempts: u32,
    backoff: Duration,
) -> Result<(), TransferError> {
    let attempts = attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match tokio::fs::remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                debug!(path = %path.display(), attempt, error = %e, "remove failed");
                last = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }
    let err = last.unwrap_or_else(|| io::Error::other("remove failed"));
    Err(TransferError::storage("remove", path, err))
}

/// Best-effort temp cleanup for failure and cancellation paths.
pub async fn discard(temp: &Path) {
    if let Err(e) = remove_with_retry(temp).await {
        warn!(path = %temp.display(), error = %e, "could not remove temp file");
    }
}

/// Replace `dest` with `temp`: settle, rename over the destination, and if
/// the rename is refused remove the destination and rename again. Verifies
/// the destination exists afterwards.
///
/// Cancellation is honoured only during the settle delay; once the rename
/// starts it runs to completion so the destination is never left half-replaced.
pub async fn promote(
    temp: &Path,
    dest: &Path,
    settle: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    if !settle.is_zero() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep(settle) => {}
        }
    }
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    if let Err(first) = tokio::fs::rename(temp, dest).await {
        warn!(
            dest = %dest.display(),
            error = %first,
            "rename refused, removing destination and retrying"
        );
        if tokio::fs::metadata(temp).await.is_err() {
            return Err(TransferError::Integrity(format!(
                "temp file {} vanished before rename",
                temp.display()
            )));
        }
        remove_with_retry(dest).await?;
        tokio::fs::rename(temp, dest)
            .await
            .map_err(|e| TransferError::storage("rename", dest, e))?;
    }

    match tokio::fs::metadata(dest).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(TransferError::Integrity(format!(
            "destination {} missing after rename",
            dest.display()
        ))),
    }
}

/// Open-write-close one chunk at its offset in an already-sized temp file.
pub fn write_chunk(temp: &Path, offset: u64, data: &[u8]) -> Result<(), TransferError> {
    let writer = StorageWriter::open_existing(temp)?;
    writer.write_at(offset, data)
}

/// Create every distinct parent directory of `destinations`. Failures are
/// logged and returned; the affected transfers fail later on their own.
pub async fn ensure_dirs<'a, I>(destinations: I) -> Vec<(PathBuf, io::Error)>
where
    I: IntoIterator<Item = &'a Path>,
{
    let parents: BTreeSet<PathBuf> = destinations
        .into_iter()
        .filter_map(|p| p.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .collect();

    let mut failures = Vec::new();
    for dir in parents {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "could not create directory");
            failures.push((dir, e));
        }
    }
    failures
}
