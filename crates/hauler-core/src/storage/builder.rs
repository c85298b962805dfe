//! Builder for creating and preallocating temp download files.

use std::fs::File;
use std::path::{Path, PathBuf};

use super::writer::StorageWriter;
use crate::retry::TransferError;
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Builder for a new temp download file. Call `preallocate` then `build` to get
/// a `StorageWriter` that supports concurrent `write_at` from multiple tasks.
pub struct StorageWriterBuilder {
    file: File,
    temp_path: PathBuf,
}

impl StorageWriterBuilder {
    /// Create a new temp file at `temp_path` (e.g. `destination.part`).
    /// Overwrites if the path already exists.
    pub fn create(temp_path: &Path) -> Result<Self, TransferError> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| TransferError::storage("create", temp_path, e))?;
        Ok(StorageWriterBuilder {
            file,
            temp_path: temp_path.to_path_buf(),
        })
    }

    /// Size the file to exactly `size` bytes. On Linux tries `posix_fallocate`
    /// for real block allocation; falls back to `set_len` elsewhere or on failure.
    pub fn preallocate(&mut self, size: u64) -> Result<(), TransferError> {
        #[cfg(target_os = "linux")]
        if size > 0 {
            let fd = self.file.as_raw_fd();
            // SAFETY: fd is owned by self.file and stays open for the call.
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file
            .set_len(size)
            .map_err(|e| TransferError::storage("preallocate", &self.temp_path, e))
    }

    /// Finish building and return a writer that can be shared for concurrent writes.
    pub fn build(self) -> StorageWriter {
        StorageWriter::from_file_and_path(self.file, self.temp_path)
    }
}
