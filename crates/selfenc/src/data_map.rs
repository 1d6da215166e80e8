//! DataMap: the index that, together with a chunk store, reconstructs an input
//!
//! JSON on the wire, hashes as lowercase hex, tagged by `"kind"`:
//! ```json
//! {"kind":"raw","chunks":[{"index":0,"pre_hash":"…","post_hash":"…","size":1}, …],"original_size":3}
//! ```
//! A `packed` map has the same shape but describes the serialized bytes of
//! another DataMap rather than user data.

use selfenc_chunks::blake3::serde_hex;
use selfenc_chunks::Hash;
use selfenc_core::{SelfEncError, SelfEncResult};
use selfenc_crypto::MIN_CHUNKS;
use serde::{Deserialize, Serialize};

/// Per-chunk metadata recorded in a DataMap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u32,
    /// BLAKE3 of the plaintext chunk
    #[serde(with = "serde_hex")]
    pub pre_hash: Hash,
    /// BLAKE3 of the encrypted chunk; its storage address
    #[serde(with = "serde_hex")]
    pub post_hash: Hash,
    /// Plaintext (and ciphertext) length in bytes
    pub size: u32,
}

/// Ordered chunk list plus the length of the bytes it describes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTable {
    pub chunks: Vec<ChunkInfo>,
    pub original_size: u64,
}

impl ChunkTable {
    /// Starting offset of every chunk, by index
    pub fn offsets(&self) -> Vec<u64> {
        self.chunks
            .iter()
            .scan(0u64, |acc, c| {
                let start = *acc;
                *acc += u64::from(c.size);
                Some(start)
            })
            .collect()
    }

    /// Pre-hashes in index order
    pub fn pre_hashes(&self) -> Vec<Hash> {
        self.chunks.iter().map(|c| c.pre_hash).collect()
    }

    /// Structural validation; a table that passes can be decrypted without
    /// consulting any chunker configuration.
    pub fn validate(&self) -> SelfEncResult<()> {
        let n = self.chunks.len();
        if n < MIN_CHUNKS {
            return Err(SelfEncError::DataMapMalformed(format!(
                "{n} chunks listed, at least {MIN_CHUNKS} required"
            )));
        }
        if n > u32::MAX as usize {
            return Err(SelfEncError::DataMapMalformed(format!(
                "{n} chunks exceeds the u32 index space"
            )));
        }
        let mut total = 0u64;
        for (pos, info) in self.chunks.iter().enumerate() {
            if info.index as usize != pos {
                return Err(SelfEncError::DataMapMalformed(format!(
                    "chunk at position {pos} carries index {}",
                    info.index
                )));
            }
            if info.size == 0 {
                return Err(SelfEncError::DataMapMalformed(format!(
                    "chunk {} has zero size",
                    info.index
                )));
            }
            total += u64::from(info.size);
        }
        if total != self.original_size {
            return Err(SelfEncError::DataMapMalformed(format!(
                "chunk sizes sum to {total}, map claims {} bytes",
                self.original_size
            )));
        }
        Ok(())
    }
}

/// Self-encryption index, either over user data or over another map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataMap {
    /// Describes user data
    Raw(ChunkTable),
    /// Describes the serialized bytes of another DataMap
    Packed(ChunkTable),
}

impl DataMap {
    pub fn table(&self) -> &ChunkTable {
        match self {
            DataMap::Raw(t) | DataMap::Packed(t) => t,
        }
    }

    pub fn into_table(self) -> ChunkTable {
        match self {
            DataMap::Raw(t) | DataMap::Packed(t) => t,
        }
    }

    pub fn infos(&self) -> &[ChunkInfo] {
        &self.table().chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.table().chunks.len()
    }

    /// Length of the bytes this map describes (user data for `Raw`, the
    /// serialized inner map for `Packed`)
    pub fn original_size(&self) -> u64 {
        self.table().original_size
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, DataMap::Packed(_))
    }

    pub fn validate(&self) -> SelfEncResult<()> {
        self.table().validate()
    }

    /// Serialize to compact JSON.
    pub fn to_bytes(&self) -> SelfEncResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SelfEncError::Serialization(format!("serializing data map: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> SelfEncResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| SelfEncError::Serialization(format!("parsing data map: {e}")))
    }

    pub fn serialized_size(&self) -> SelfEncResult<usize> {
        Ok(self.to_bytes()?.len())
    }

    /// Hex of the JSON encoding, a single-token handle for shells and logs
    pub fn to_hex(&self) -> SelfEncResult<String> {
        Ok(hex::encode(self.to_bytes()?))
    }

    pub fn from_hex(s: &str) -> SelfEncResult<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| SelfEncError::Serialization(format!("data map is not hex: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfenc_chunks::hash_bytes;

    fn table(sizes: &[u32]) -> ChunkTable {
        let chunks = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| ChunkInfo {
                index: i as u32,
                pre_hash: hash_bytes(&[i as u8]),
                post_hash: hash_bytes(&[i as u8, 0xff]),
                size,
            })
            .collect();
        ChunkTable {
            chunks,
            original_size: sizes.iter().map(|&s| u64::from(s)).sum(),
        }
    }

    #[test]
    fn json_carries_kind_tag_and_hex_hashes() {
        let map = DataMap::Raw(table(&[1, 1, 1]));
        let json = String::from_utf8(map.to_bytes().unwrap()).unwrap();
        assert!(json.starts_with(r#"{"kind":"raw","chunks":["#));
        assert!(json.contains(&hash_bytes(&[0]).to_hex().to_string()));
        assert!(json.ends_with(r#""original_size":3}"#));

        let packed = DataMap::Packed(table(&[1, 1, 1]));
        let json = String::from_utf8(packed.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""kind":"packed""#));
    }

    #[test]
    fn bytes_and_hex_roundtrip() {
        let map = DataMap::Packed(table(&[4, 5, 6, 7]));
        assert_eq!(DataMap::from_bytes(&map.to_bytes().unwrap()).unwrap(), map);
        assert_eq!(DataMap::from_hex(&map.to_hex().unwrap()).unwrap(), map);
        assert_eq!(map.serialized_size().unwrap(), map.to_bytes().unwrap().len());
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            DataMap::from_bytes(b"not json"),
            Err(SelfEncError::Serialization(_))
        ));
        assert!(matches!(
            DataMap::from_hex("zz"),
            Err(SelfEncError::Serialization(_))
        ));
    }

    #[test]
    fn offsets_are_prefix_sums() {
        assert_eq!(table(&[3, 3, 4]).offsets(), vec![0, 3, 6]);
    }

    #[test]
    fn valid_table_passes() {
        assert!(table(&[1, 2, 3]).validate().is_ok());
    }

    #[test]
    fn too_few_chunks_is_malformed() {
        let err = table(&[5, 5]).validate().unwrap_err();
        assert!(matches!(err, SelfEncError::DataMapMalformed(_)));
    }

    #[test]
    fn out_of_order_index_is_malformed() {
        let mut t = table(&[1, 1, 1]);
        t.chunks.swap(0, 1);
        assert!(matches!(
            t.validate(),
            Err(SelfEncError::DataMapMalformed(_))
        ));
    }

    #[test]
    fn zero_sized_chunk_is_malformed() {
        let t = table(&[1, 0, 2]);
        assert!(matches!(
            t.validate(),
            Err(SelfEncError::DataMapMalformed(_))
        ));
    }

    #[test]
    fn size_mismatch_is_malformed() {
        let mut t = table(&[1, 1, 1]);
        t.original_size = 4;
        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 3"));
    }
}
