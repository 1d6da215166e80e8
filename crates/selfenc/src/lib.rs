//! selfenc: convergent self-encryption of byte sequences
//!
//! An input is split into at least three chunks. Each chunk is encrypted with
//! key material derived from the plaintext hashes of its two cyclic
//! successors, then stored under the hash of its ciphertext. The resulting
//! [`DataMap`] plus the chunk store is all that is needed to get the bytes
//! back; identical inputs always produce identical maps and chunks.
//!
//! # Overview
//! - `data_map`: the [`DataMap`] index and its JSON/hex encodings
//! - `encrypt`: whole-buffer encryption, optionally straight into a store
//! - `stream`: [`StreamEncryptor`] and reader-driven encryption into a sink
//! - `decrypt`: whole, streaming and range decryption with verification
//! - `pack`: wraps oversized maps into `Packed` maps and back

pub mod data_map;
pub mod decrypt;
pub mod encrypt;
pub mod pack;
pub mod stream;

pub use data_map::{ChunkInfo, ChunkTable, DataMap};
pub use decrypt::{decrypt, decrypt_chunk_at, decrypt_range, decrypt_to_writer};
pub use encrypt::{encrypt, encrypt_and_pack, encrypt_to_store, EncryptedChunk};
pub use pack::{pack, unpack};
pub use stream::{encrypt_with_sink, ChunkSink, StoreSink, StreamEncryptor};

pub use selfenc_core::{CodecConfig, SelfEncError, SelfEncResult};
pub use selfenc_storage::{ChunkStore, MemoryStore, StoreError};
