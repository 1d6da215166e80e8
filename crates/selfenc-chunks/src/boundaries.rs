//! Size-defined chunk boundaries
//!
//! Boundaries depend only on the total input length, never on content, so
//! byte-identical inputs always chunk identically.
//!
//! Layout rules:
//!   - fewer than 3 bytes: rejected (three non-empty chunks are impossible)
//!   - up to `3 * max_chunk_size`: exactly 3 chunks sized
//!     `t/3`, `t/3`, `t - 2*(t/3)` (also covers the `< 3 * min_chunk_size` case).
//!     The third chunk can be up to two bytes over `max_chunk_size`.
//!   - larger: `ceil(t / max_chunk_size)` chunks of balanced size, the last
//!     `t mod n` of them one byte longer. Every chunk is at least
//!     `ChunkingConfig::shortest_balanced_chunk()` bytes, which config
//!     validation keeps at or above `min_chunk_size`, so no short tail chunk
//!     is ever emitted.

use bytes::Bytes;
use selfenc_core::config::MIN_ENCRYPTABLE_BYTES;
use selfenc_core::{SelfEncError, SelfEncResult};

/// Chunk size configuration
pub use selfenc_core::config::ChunkingConfig as ChunkSizes;

/// Position of one chunk within the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u32,
    /// Byte offset within the input
    pub offset: u64,
    /// Chunk length in bytes
    pub length: u64,
}

impl ChunkSpan {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A plaintext chunk sliced from the input. Never persisted.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub index: u32,
    pub content: Bytes,
}

/// Number of chunks an input of `total_size` bytes splits into.
///
/// Returns 0 for inputs too small to self-encrypt.
pub fn num_chunks(total_size: u64, sizes: ChunkSizes) -> u64 {
    if total_size < MIN_ENCRYPTABLE_BYTES {
        return 0;
    }
    let max = u64::from(sizes.max_chunk_size.max(1));
    if total_size <= 3 * max {
        3
    } else {
        total_size.div_ceil(max)
    }
}

/// Layout parameters for `chunk_span`
struct Layout {
    count: u64,
    base: u64,
    /// Index of the first chunk that carries one extra byte (balanced layout)
    first_long: u64,
}

fn layout(total_size: u64, sizes: ChunkSizes) -> Layout {
    let count = num_chunks(total_size, sizes);
    if count == 3 {
        Layout {
            count,
            base: total_size / 3,
            first_long: 3,
        }
    } else {
        let base = total_size / count;
        Layout {
            count,
            base,
            first_long: count - total_size % count,
        }
    }
}

/// Span of chunk `index` without materializing the full layout.
///
/// `index` must be below `num_chunks(total_size, sizes)`.
pub fn chunk_span(total_size: u64, index: u32, sizes: ChunkSizes) -> ChunkSpan {
    let l = layout(total_size, sizes);
    let i = u64::from(index);
    let (offset, length) = if l.count == 3 {
        let length = if i < 2 { l.base } else { total_size - 2 * l.base };
        (i * l.base, length)
    } else {
        let extra = i.saturating_sub(l.first_long);
        let length = l.base + u64::from(i >= l.first_long);
        (i * l.base + extra, length)
    };
    ChunkSpan {
        index,
        offset,
        length,
    }
}

/// Ordered chunk boundaries for an input of `total_size` bytes.
pub fn chunk_boundaries(total_size: u64, sizes: ChunkSizes) -> SelfEncResult<Vec<ChunkSpan>> {
    let count = num_chunks(total_size, sizes);
    if count == 0 {
        return Err(SelfEncError::InputTooSmall {
            size: total_size,
            min: MIN_ENCRYPTABLE_BYTES,
        });
    }
    if count > u64::from(u32::MAX) {
        return Err(SelfEncError::Config(format!(
            "{total_size} bytes needs {count} chunks; raise max_chunk_size"
        )));
    }
    Ok((0..count as u32)
        .map(|i| chunk_span(total_size, i, sizes))
        .collect())
}

/// Slice `data` into raw chunks along its boundaries (zero-copy).
pub fn split_bytes(data: &Bytes, sizes: ChunkSizes) -> SelfEncResult<Vec<RawChunk>> {
    let spans = chunk_boundaries(data.len() as u64, sizes)?;
    tracing::trace!(bytes = data.len(), chunks = spans.len(), "split input");
    Ok(spans
        .into_iter()
        .map(|s| RawChunk {
            index: s.index,
            content: data.slice(s.offset as usize..s.end() as usize),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sizes(min: u32, max: u32) -> ChunkSizes {
        ChunkSizes {
            min_chunk_size: min,
            max_chunk_size: max,
        }
    }

    fn lengths(total: u64, s: ChunkSizes) -> Vec<u64> {
        chunk_boundaries(total, s)
            .unwrap()
            .iter()
            .map(|c| c.length)
            .collect()
    }

    #[test]
    fn below_three_bytes_is_too_small() {
        for total in 0..3 {
            let err = chunk_boundaries(total, ChunkSizes::default()).unwrap_err();
            assert!(matches!(err, SelfEncError::InputTooSmall { size, .. } if size == total));
        }
    }

    #[test]
    fn three_bytes_split_into_single_bytes() {
        let data = Bytes::from_static(b"abc");
        let chunks = split_bytes(&data, sizes(1, 1024)).unwrap();
        let contents: Vec<&[u8]> = chunks.iter().map(|c| c.content.as_ref()).collect();
        assert_eq!(contents, vec![b"a".as_ref(), b"b".as_ref(), b"c".as_ref()]);
    }

    #[test]
    fn tiny_input_below_min_still_gets_three_chunks() {
        assert_eq!(lengths(10, sizes(100, 1000)), vec![3, 3, 4]);
    }

    #[test]
    fn three_chunks_up_to_three_max() {
        let s = sizes(1, 1_000_000);
        assert_eq!(lengths(3_000_000, s), vec![1_000_000; 3]);
        assert_eq!(lengths(2_999_999, s), vec![999_999, 999_999, 1_000_001]);
    }

    #[test]
    fn large_input_is_balanced() {
        let s = sizes(1, 10);
        // 39 bytes -> 4 chunks, last 3 one byte longer
        assert_eq!(lengths(39, s), vec![9, 10, 10, 10]);
        assert_eq!(lengths(31, s), vec![7, 8, 8, 8]);
        assert_eq!(lengths(40, s), vec![10; 4]);
    }

    #[test]
    fn third_chunk_may_exceed_max_by_two() {
        assert_eq!(lengths(3 * 10 - 1, sizes(1, 10)), vec![9, 9, 11]);
        assert_eq!(lengths(3 * 10 - 2, sizes(1, 10)), vec![9, 9, 10]);
    }

    #[test]
    fn chunk_count_grows_linearly() {
        let s = sizes(1, 1024);
        assert_eq!(num_chunks(3 * 1024, s), 3);
        assert_eq!(num_chunks(3 * 1024 + 1, s), 4);
        assert_eq!(num_chunks(100 * 1024, s), 100);
        assert_eq!(num_chunks(100 * 1024 + 1, s), 101);
    }

    proptest! {
        /// Same length -> same boundaries
        #[test]
        fn boundaries_are_deterministic(total in 3u64..=200_000, max in 1u32..=4096) {
            let s = sizes(1, max);
            prop_assert_eq!(chunk_boundaries(total, s).unwrap(), chunk_boundaries(total, s).unwrap());
        }

        /// Chunks must cover the full input without gaps or overlap
        #[test]
        fn chunks_cover_full_input(total in 3u64..=200_000, max in 1u32..=4096) {
            let s = sizes(1, max);
            let spans = chunk_boundaries(total, s).unwrap();
            prop_assert!(spans.len() >= 3);
            let mut expected_offset = 0u64;
            for (i, span) in spans.iter().enumerate() {
                prop_assert_eq!(span.index as usize, i);
                prop_assert_eq!(span.offset, expected_offset, "chunks must be contiguous");
                prop_assert!(span.length > 0);
                expected_offset += span.length;
            }
            prop_assert_eq!(expected_offset, total);
        }

        /// Beyond three chunks, no chunk exceeds the maximum or undercuts the minimum
        #[test]
        fn balanced_chunks_respect_bounds(total in 3u64..=200_000, max in 4u32..=4096) {
            let s = sizes(max / 4, max);
            let spans = chunk_boundaries(total, s).unwrap();
            if spans.len() > 3 {
                for span in &spans {
                    prop_assert!(span.length <= u64::from(max));
                    prop_assert!(span.length >= u64::from(s.min_chunk_size));
                }
            }
        }

        /// The largest minimum that passes config validation is never undercut
        #[test]
        fn validated_minimum_holds(total in 3u64..=200_000, max in 1u32..=4096) {
            let s = sizes(sizes(1, max).shortest_balanced_chunk(), max);
            let cfg = selfenc_core::CodecConfig { chunking: s, ..Default::default() };
            prop_assert!(cfg.validate().is_ok());
            let spans = chunk_boundaries(total, s).unwrap();
            if spans.len() > 3 {
                for span in &spans {
                    prop_assert!(span.length >= u64::from(s.min_chunk_size));
                }
            }
        }
    }
}
