//! selfenc-crypto: key derivation and chunk cipher for self-encryption
//!
//! Every chunk is encrypted with material derived from the plaintext hashes
//! of its two cyclic successors, so no external secret is ever needed:
//! ```text
//! pre_hash[i+1] || pre_hash[i+2]   (indices mod N)
//!   ├── key  (256-bit): HKDF-SHA256(salt=index, ikm=bytes[0..48],  info="selfenc-chunk-key")
//!   ├── iv   ( 96-bit): HKDF-SHA256(salt=index, ikm=bytes[16..64], info="selfenc-chunk-iv")
//!   └── pad  (chunk length): BLAKE3 XOF, derive-key mode, over index || bytes
//!
//! ciphertext = ChaCha20(key, iv) ⊕ (plaintext ⊕ pad)
//! ```
//!
//! Integrity is not checked here; callers compare the recovered plaintext's
//! hash with the pre-hash recorded in the data map.

pub mod cipher;
pub mod keys;

pub use cipher::{decrypt_chunk, encrypt_chunk, post_hash};
pub use keys::{derive_from_successors, derive_key_material, successor_indices, KeyMaterial};

/// Size of a chunk key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20 nonce (96-bit)
pub const IV_SIZE: usize = 12;

/// Fewest chunks the key chaining works with
pub const MIN_CHUNKS: usize = 3;
