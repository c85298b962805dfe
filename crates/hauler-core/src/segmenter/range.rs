//! Chunk type and range planning.

/// A single chunk: byte range [start, end) (half-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Position within the plan, 0-based.
    pub index: usize,
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
    /// Bytes of this chunk written to disk so far.
    pub bytes_written: u64,
}

impl ChunkDescriptor {
    /// Length of this chunk in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.len()
    }

    /// HTTP Range header value (inclusive end): `bytes=start-(end-1)`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}", self.curl_range())
    }

    /// Range in the form libcurl's `CURLOPT_RANGE` takes: `start-(end-1)`.
    pub fn curl_range(&self) -> String {
        if self.start >= self.end {
            "0-0".to_string()
        } else {
            format!("{}-{}", self.start, self.end - 1)
        }
    }
}

/// Partitions `[0, total_size)` into contiguous chunks of `chunk_size` bytes;
/// the last chunk may be shorter.
///
/// Returns an empty vec if `total_size` is 0 or `chunk_size` is 0.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
    if total_size == 0 || chunk_size == 0 {
        return Vec::new();
    }

    let count = total_size.div_ceil(chunk_size);
    let mut out = Vec::with_capacity(count as usize);
    let mut offset = 0u64;

    while offset < total_size {
        let end = offset.saturating_add(chunk_size).min(total_size);
        out.push(ChunkDescriptor {
            index: out.len(),
            start: offset,
            end,
            bytes_written: 0,
        });
        offset = end;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_covers_exactly(chunks: &[ChunkDescriptor], size: u64) {
        let mut expected_start = 0;
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.start, expected_start, "gap or overlap at chunk {i}");
            assert!(c.end > c.start);
            expected_start = c.end;
        }
        assert_eq!(expected_start, size);
        assert_eq!(chunks.iter().map(ChunkDescriptor::len).sum::<u64>(), size);
    }

    #[test]
    fn fifty_mib_in_ten_mib_chunks() {
        let chunks = plan_chunks(50 * MIB, 10 * MIB);
        assert_eq!(chunks.len(), 5);
        assert_covers_exactly(&chunks, 50 * MIB);
        assert!(chunks.iter().all(|c| c.len() == 10 * MIB));
    }

    #[test]
    fn uneven_last_chunk_is_shorter() {
        let chunks = plan_chunks(10, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[2].start, chunks[2].end), (8, 10));
        assert_covers_exactly(&chunks, 10);
    }

    #[test]
    fn disjoint_for_many_shapes() {
        for size in [1u64, 2, 7, 999, 1000, 1001, 20 * MIB + 3] {
            for chunk in [1u64, 3, 10, 1000, MIB, 10 * MIB, u64::MAX] {
                if size / chunk > 100_000 {
                    continue;
                }
                let chunks = plan_chunks(size, chunk);
                assert_covers_exactly(&chunks, size);
            }
        }
    }

    #[test]
    fn plan_chunks_empty() {
        assert!(plan_chunks(0, 4).is_empty());
        assert!(plan_chunks(100, 0).is_empty());
    }

    #[test]
    fn chunk_range_header() {
        let c = ChunkDescriptor {
            index: 0,
            start: 0,
            end: 99,
            bytes_written: 0,
        };
        assert_eq!(c.range_header_value(), "bytes=0-98");
        assert_eq!(c.curl_range(), "0-98");
        assert_eq!(c.len(), 99);
        assert!(!c.is_complete());
    }

    #[test]
    fn chunk_range_single_byte() {
        let c = ChunkDescriptor {
            index: 3,
            start: 42,
            end: 43,
            bytes_written: 1,
        };
        assert_eq!(c.range_header_value(), "bytes=42-42");
        assert!(c.is_complete());
    }
}
