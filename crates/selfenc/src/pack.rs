//! Map-of-maps packing
//!
//! A large DataMap is itself self-encrypted and replaced by a `Packed` map
//! describing its serialized bytes, layer by layer, until it fits inline.

use bytes::Bytes;
use selfenc_core::{CodecConfig, SelfEncError, SelfEncResult};
use selfenc_storage::ChunkStore;
use tracing::debug;

use crate::data_map::DataMap;
use crate::decrypt::decrypt_table;
use crate::encrypt::encrypt_to_store;

/// Pack `map` until its serialized size is at most `inline_threshold`.
///
/// Stops after `max_depth` layers, or earlier once a layer no longer shrinks
/// the map. Chunks of every layer are written to `store`.
pub async fn pack<S>(map: DataMap, store: &S, cfg: &CodecConfig) -> SelfEncResult<DataMap>
where
    S: ChunkStore + ?Sized,
{
    let threshold = cfg.packing.inline_threshold;
    let mut current = map;
    let mut size = current.serialized_size()?;
    let mut depth = 0;

    while size > threshold && depth < cfg.packing.max_depth {
        let bytes = Bytes::from(current.to_bytes()?);
        let candidate = DataMap::Packed(encrypt_to_store(bytes, store, cfg).await?.into_table());
        let packed_size = candidate.serialized_size()?;
        if packed_size >= size {
            debug!(depth, size, packed_size, "packing layer does not shrink the map");
            break;
        }
        depth += 1;
        debug!(depth, from = size, to = packed_size, "packed data map");
        current = candidate;
        size = packed_size;
    }
    Ok(current)
}

/// Unwrap packed layers until a Raw map remains.
pub async fn unpack<S>(map: DataMap, store: &S, cfg: &CodecConfig) -> SelfEncResult<DataMap>
where
    S: ChunkStore + ?Sized,
{
    let mut current = map;
    let mut depth = 0;
    while let DataMap::Packed(table) = &current {
        if depth >= cfg.packing.max_depth {
            return Err(SelfEncError::DataMapMalformed(format!(
                "more than {} packed layers",
                cfg.packing.max_depth
            )));
        }
        let bytes = decrypt_table(table, store, cfg).await?;
        current = DataMap::from_bytes(&bytes)?;
        depth += 1;
        debug!(depth, "unpacked data map layer");
    }
    Ok(current)
}
