//! Disk I/O and file lifecycle.
//!
//! Every transfer writes to a `.part` sibling of its destination, sized up
//! front for chunked writes, and is promoted with an atomic rename once the
//! body is complete. Failure paths remove the temp file.

mod builder;
mod promote;
mod writer;

use std::path::{Path, PathBuf};

pub use builder::StorageWriterBuilder;
pub use promote::{discard, ensure_dirs, promote, remove_with_retry, write_chunk};
pub use writer::StorageWriter;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("file.iso"));
        assert_eq!(p.to_string_lossy(), "file.iso.part");
        let p2 = temp_path(Path::new("/tmp/archive.zip"));
        assert_eq!(p2.to_string_lossy(), "/tmp/archive.zip.part");
    }

    #[test]
    fn preallocate_then_chunk_writes_land_at_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let tp = dir.path().join("out.bin.part");

        let mut builder = StorageWriterBuilder::create(&tp).unwrap();
        builder.preallocate(20).unwrap();
        let writer = builder.build();
        assert_eq!(std::fs::metadata(&tp).unwrap().len(), 20);

        write_chunk(&tp, 10, b"bbbb").unwrap();
        write_chunk(&tp, 0, b"aaaa").unwrap();
        writer.write_at(4, b"cccc").unwrap();
        writer.sync().unwrap();

        let buf = std::fs::read(&tp).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[0..4], b"aaaa");
        assert_eq!(&buf[4..8], b"cccc");
        assert_eq!(&buf[10..14], b"bbbb");
    }

    #[test]
    fn write_chunk_requires_existing_temp() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_chunk(&dir.path().join("missing.part"), 0, b"x").unwrap_err();
        assert!(matches!(err, crate::retry::TransferError::Storage { .. }));
    }

    #[tokio::test]
    async fn promote_replaces_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.txt");
        let tp = temp_path(&dest);
        std::fs::write(&dest, b"old").unwrap();
        std::fs::write(&tp, b"new").unwrap();

        promote(&tp, &dest, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        assert!(!tp.exists());
    }

    #[tokio::test]
    async fn cancelled_promote_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.txt");
        let tp = temp_path(&dest);
        std::fs::write(&dest, b"old").unwrap();
        std::fs::write(&tp, b"new").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = promote(&tp, &dest, Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");

        discard(&tp).await;
        assert!(!tp.exists());
    }

    #[tokio::test]
    async fn promote_without_temp_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.txt");
        let err = promote(&temp_path(&dest), &dest, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::retry::TransferError::Integrity(_) | crate::retry::TransferError::Storage { .. }
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn remove_with_retry_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        remove_with_retry(&dir.path().join("nope")).await.unwrap();
    }

    #[tokio::test]
    async fn ensure_dirs_creates_unique_parents() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("x/y/a.bin");
        let b = dir.path().join("x/y/b.bin");
        let c = dir.path().join("z/c.bin");
        let failures = ensure_dirs([a.as_path(), b.as_path(), c.as_path()]).await;
        assert!(failures.is_empty());
        assert!(dir.path().join("x/y").is_dir());
        assert!(dir.path().join("z").is_dir());
    }
}
