//! Neighbour-chained key derivation
//!
//! Chunk `i` takes its key, IV and XOR pad from the pre-hashes of chunks
//! `(i+1) mod N` and `(i+2) mod N`. Its own pre-hash never participates.

use hkdf::Hkdf;
use selfenc_chunks::{Hash, HASH_SIZE};
use selfenc_core::{SelfEncError, SelfEncResult};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{IV_SIZE, KEY_SIZE, MIN_CHUNKS};

const KEY_INFO: &[u8] = b"selfenc-chunk-key";
const IV_INFO: &[u8] = b"selfenc-chunk-iv";
const PAD_CONTEXT: &str = "selfenc 2024 chunk pad";

/// Key, IV and XOR pad for one chunk. Zeroized on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
    pad: Vec<u8>,
}

impl KeyMaterial {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// XOR pad, exactly as long as the chunk it was derived for
    pub fn pad(&self) -> &[u8] {
        &self.pad
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
        self.pad.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .field("pad_len", &self.pad.len())
            .finish()
    }
}

/// The two cyclic successors whose pre-hashes key chunk `index`.
pub fn successor_indices(index: usize, count: usize) -> (usize, usize) {
    ((index + 1) % count, (index + 2) % count)
}

/// Derive the key material for chunk `index` of a `pre_hashes.len()`-chunk input.
///
/// `chunk_len` is the plaintext length of that chunk and sizes the XOR pad.
pub fn derive_key_material(
    index: u32,
    pre_hashes: &[Hash],
    chunk_len: usize,
) -> SelfEncResult<KeyMaterial> {
    let count = pre_hashes.len();
    if count < MIN_CHUNKS {
        return Err(SelfEncError::DataMapMalformed(format!(
            "key derivation needs at least {MIN_CHUNKS} chunks, got {count}"
        )));
    }
    let i = index as usize;
    if i >= count {
        return Err(SelfEncError::DataMapMalformed(format!(
            "chunk index {index} out of range for {count} chunks"
        )));
    }

    let (n1, n2) = successor_indices(i, count);
    derive_from_successors(index, &pre_hashes[n1], &pre_hashes[n2], chunk_len)
}

/// Derive key material from the pre-hashes of chunk `index`'s two successors.
///
/// Used directly by the streaming encryptor, which knows the successors'
/// hashes before it knows every hash of the input.
pub fn derive_from_successors(
    index: u32,
    first: &Hash,
    second: &Hash,
    chunk_len: usize,
) -> SelfEncResult<KeyMaterial> {
    let mut chained = [0u8; 2 * HASH_SIZE];
    chained[..HASH_SIZE].copy_from_slice(first.as_bytes());
    chained[HASH_SIZE..].copy_from_slice(second.as_bytes());

    let salt = index.to_be_bytes();

    let mut key = [0u8; KEY_SIZE];
    hkdf_derive(&salt, &chained[..48], KEY_INFO, &mut key)?;

    let mut iv = [0u8; IV_SIZE];
    hkdf_derive(&salt, &chained[16..], IV_INFO, &mut iv)?;

    let mut pad = vec![0u8; chunk_len];
    let mut hasher = blake3::Hasher::new_derive_key(PAD_CONTEXT);
    hasher.update(&salt);
    hasher.update(&chained);
    hasher.finalize_xof().fill(&mut pad);

    chained.zeroize();
    tracing::trace!(index, pad_len = chunk_len, "derived chunk key material");

    Ok(KeyMaterial { key, iv, pad })
}

/// HKDF-SHA256 expansion with a domain-specific info string.
fn hkdf_derive(salt: &[u8], ikm: &[u8], info: &[u8], okm: &mut [u8]) -> SelfEncResult<()> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, okm)
        .map_err(|e| SelfEncError::CipherInput(format!("HKDF expand failed: {e}")))
}
