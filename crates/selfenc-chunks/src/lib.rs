//! selfenc-chunks: size-defined chunk boundaries and BLAKE3 content hashing
//!
//! # Overview
//! - `blake3`: deterministic slice hashing (pre/post hashes, content addresses)
//! - `boundaries`: splits a byte length into the ordered chunk layout used by
//!   the self-encryptor; a pure function of the total size

pub mod blake3;
pub mod boundaries;

// Convenience re-exports for the most common operations
pub use blake3::{hash_bytes, hash_from_hex, hash_to_hex, Hash, HASH_SIZE};
pub use boundaries::{
    chunk_boundaries, chunk_span, num_chunks, split_bytes, ChunkSizes, ChunkSpan, RawChunk,
};
