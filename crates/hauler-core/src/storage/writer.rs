//! Offset writer for temp download files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::retry::TransferError;

/// Writer for a temp download file. Safe to clone and use from multiple
/// threads; each `write_at` is independent (pwrite-style).
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    temp_path: PathBuf,
}

impl StorageWriter {
    pub(crate) fn from_file_and_path(file: File, temp_path: PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            temp_path,
        }
    }

    /// Open an already-sized temp file for writing without truncation.
    pub fn open_existing(temp_path: &Path) -> Result<Self, TransferError> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(temp_path)
            .map_err(|e| TransferError::storage("open", temp_path, e))?;
        Ok(Self::from_file_and_path(file, temp_path.to_path_buf()))
    }

    /// Write all of `data` at `offset`. Does not move any shared cursor.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        self.write_all_at(offset, data)
            .map_err(|e| TransferError::storage("write", &self.temp_path, e))
    }

    #[cfg(unix)]
    fn write_all_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(data, offset)
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut offset: u64, mut data: &[u8]) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !data.is_empty() {
            let n = self.file.seek_write(data, offset)?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            data = &data[n..];
            offset += n as u64;
        }
        Ok(())
    }

    /// Sync file data to disk.
    pub fn sync(&self) -> Result<(), TransferError> {
        self.file
            .sync_all()
            .map_err(|e| TransferError::storage("sync", &self.temp_path, e))
    }
}
