//! BLAKE3 content hashing for chunk plaintexts and ciphertexts
//!
//! Pre-hashes (plaintext) feed key derivation; post-hashes (ciphertext) are
//! the content addresses under which chunks are stored.

use selfenc_core::{SelfEncError, SelfEncResult};

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = blake3::Hash;

/// Width of a digest in bytes
pub const HASH_SIZE: usize = blake3::OUT_LEN;

/// Inputs at least this large are hashed with rayon (`update_rayon`).
const PARALLEL_HASH_THRESHOLD: usize = 128 * 1024;

/// Hash a byte slice in memory.
///
/// Slices >= 128KB are hashed in parallel using blake3's rayon support.
pub fn hash_bytes(data: &[u8]) -> Hash {
    if data.len() >= PARALLEL_HASH_THRESHOLD {
        let mut hasher = blake3::Hasher::new();
        hasher.update_rayon(data);
        hasher.finalize()
    } else {
        blake3::hash(data)
    }
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &Hash) -> String {
    hash.to_hex().to_string()
}

/// Parse a 64-char hex string into a Hash
pub fn hash_from_hex(hex: &str) -> SelfEncResult<Hash> {
    blake3::Hash::from_hex(hex)
        .map_err(|e| SelfEncError::Serialization(format!("invalid BLAKE3 hex '{hex}': {e}")))
}

/// Serde adapter that writes a [`Hash`] as a 64-char hex string.
///
/// Use with `#[serde(with = "selfenc_chunks::blake3::serde_hex")]`.
pub mod serde_hex {
    use super::Hash;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(hash.to_hex().as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; super::HASH_SIZE];
        hex::decode_to_slice(&s, &mut bytes)
            .map_err(|e| D::Error::custom(format!("invalid hash '{s}': {e}")))?;
        Ok(Hash::from_bytes(bytes))
    }
}
